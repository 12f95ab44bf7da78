use std::{fmt, sync::Arc};

use crate::{Headers, Transport};

/// Destination of a request.
///
/// A provider is evaluated at every dispatch, so retries and recurrences may
/// go to different URLs.
#[derive(Clone)]
pub enum Target {
    /// Fixed URL.
    Static(String),
    /// Produces the URL at dispatch time.
    Provider(Arc<dyn Fn() -> String + Send + Sync>),
}

impl Target {
    /// Builds a provider target.
    pub fn provider<F>(f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self::Provider(Arc::new(f))
    }

    /// Resolves the URL for one dispatch.
    pub fn resolve(&self) -> String {
        match self {
            Target::Static(url) => url.clone(),
            Target::Provider(f) => f(),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Static(url) => f.debug_tuple("Static").field(url).finish(),
            Target::Provider(_) => f.write_str("Provider(<fn>)"),
        }
    }
}

impl From<String> for Target {
    fn from(url: String) -> Self {
        Self::Static(url)
    }
}

impl From<&str> for Target {
    fn from(url: &str) -> Self {
        Self::Static(url.to_owned())
    }
}

/// What to send for one logical request.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
    /// HTTP method name, e.g. `"GET"`.
    pub method: String,
    pub target: Target,
    pub headers: Headers,
    /// Opaque body text.
    pub body: Option<String>,
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, target: impl Into<Target>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Creates a `GET` descriptor.
    pub fn get(target: impl Into<Target>) -> Self {
        Self::new("GET", target)
    }

    /// Creates a `POST` descriptor with a body.
    pub fn post(target: impl Into<Target>, body: impl Into<String>) -> Self {
        Self::new("POST", target).with_body(body)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// The most recently dispatched attempt, as resolved at dispatch time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    pub transport: Transport,
}
