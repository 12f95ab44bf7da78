use std::fmt;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An error-code expression entry is neither an integer nor a `min-max` range.
    #[error("invalid error code entry '{entry}' in '{expression}'")]
    InvalidErrorCodes {
        /// The full expression being parsed.
        expression: String,
        /// The offending comma-separated entry.
        entry: String,
    },
    /// Configuration value outside its allowed domain.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// No tokio runtime was available when building a controller.
    #[error("no async runtime available: {0}")]
    Runtime(String),
    /// A target could not be parsed as a URL.
    #[error("invalid url '{url}': {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    /// Payload or configuration decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

/// A controller method was called in a state that does not allow it.
///
/// The call is a no-op. The error is logged and returned, never raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("start() called on a controller that is currently running")]
    AlreadyRunning,
    #[error("retry() called on a controller that has never been started")]
    NeverStarted,
    #[error("retry() called on a controller that is currently running")]
    RetryWhileRunning,
}

/// Reason carried by a terminal `error` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorReason {
    /// No usable response was obtained and the retry budget is spent.
    Transport,
    /// The last allowed attempt hit the per-attempt timeout.
    Timeout,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::Transport => f.write_str("transport error"),
            ErrorReason::Timeout => f.write_str("timeout error"),
        }
    }
}
