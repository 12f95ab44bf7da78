//! Per-attempt transport selection.

use url::Url;

use crate::{Transport, TransportMode};

/// What the hosting runtime can do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    /// Origin of the current context (the page URL in a browser).
    pub origin: Option<Url>,
    /// Whether credentialed cross-origin requests are supported.
    pub credentialed_cors: bool,
}

impl Environment {
    /// A native process: no origin and no cross-origin restrictions.
    pub fn native() -> Self {
        Self {
            origin: None,
            credentialed_cors: true,
        }
    }

    /// A browsing context at `origin`.
    pub fn browser(origin: Url, credentialed_cors: bool) -> Self {
        Self {
            origin: Some(origin),
            credentialed_cors,
        }
    }

    /// Makes a relative `target` absolute against the origin. Targets are
    /// returned unchanged when there is no origin or joining fails.
    pub fn resolve(&self, target: &str) -> String {
        match self.origin.as_ref().map(|origin| origin.join(target)) {
            Some(Ok(resolved)) => resolved.into(),
            _ => target.to_owned(),
        }
    }

    /// Returns `true` when `target` shares scheme, host, and port with the
    /// origin. Relative targets are same-origin.
    pub fn is_same_origin(&self, target: &str) -> bool {
        match &self.origin {
            Some(origin) => match origin.join(target) {
                Ok(resolved) => {
                    resolved.scheme() == origin.scheme()
                        && resolved.host_str() == origin.host_str()
                        && resolved.port_or_known_default() == origin.port_or_known_default()
                }
                Err(_) => false,
            },
            None => matches!(
                Url::parse(target),
                Err(url::ParseError::RelativeUrlWithoutBase)
            ),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::native()
    }
}

/// Chooses a transport for one attempt.
pub fn choose_transport(mode: TransportMode, target: &str, env: &Environment) -> Transport {
    match mode {
        TransportMode::Direct => Transport::Direct,
        TransportMode::Fallback => Transport::Fallback,
        TransportMode::Auto => {
            if env.credentialed_cors || env.is_same_origin(target) {
                Transport::Direct
            } else {
                Transport::Fallback
            }
        }
    }
}

/// Transport selection bound to an environment and the channels installed
/// on a controller.
#[derive(Clone, Debug)]
pub struct TransportSelector {
    env: Environment,
    direct_available: bool,
    fallback_available: bool,
}

impl TransportSelector {
    pub fn new(env: Environment, direct_available: bool, fallback_available: bool) -> Self {
        Self {
            env,
            direct_available,
            fallback_available,
        }
    }

    /// Chooses a transport, or [`Transport::Invalid`] when the chosen channel
    /// is not installed.
    pub fn choose(&self, mode: TransportMode, target: &str) -> Transport {
        match choose_transport(mode, target, &self.env) {
            Transport::Direct if self.direct_available => Transport::Direct,
            Transport::Fallback if self.fallback_available => Transport::Fallback,
            _ => Transport::Invalid,
        }
    }

    /// Resolves `target` against the environment's origin.
    pub fn resolve(&self, target: &str) -> String {
        self.env.resolve(target)
    }
}
