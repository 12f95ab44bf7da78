//! The contract every transport channel implements.

use std::{future::Future, pin::Pin};

use crate::Headers;

/// One attempt as handed to a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRequest {
    pub method: String,
    /// Fully resolved URL.
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
    /// Send ambient credentials with cross-origin requests.
    pub credentialed: bool,
}

/// Completion of one attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelResponse {
    /// HTTP status, or `0` when no response was obtained.
    pub code: u16,
    pub reason: Option<String>,
    pub headers: Headers,
    pub body: String,
}

impl ChannelResponse {
    /// A response with `code` and `body` and nothing else.
    pub fn new(code: u16, body: impl Into<String>) -> Self {
        Self {
            code,
            body: body.into(),
            ..Self::default()
        }
    }

    /// The completion reported when the transport itself failed.
    pub fn failed() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Future resolving to an attempt's completion.
pub type ChannelFuture = Pin<Box<dyn Future<Output = ChannelResponse> + Send + 'static>>;

/// A transport that carries one attempt at a time.
///
/// Dropping the returned future cancels the attempt: in-flight I/O is torn
/// down and no completion is delivered afterwards.
pub trait TransportChannel: Send + Sync {
    fn open(&self, request: ChannelRequest) -> ChannelFuture;
}
