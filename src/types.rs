use std::collections::BTreeMap;

/// Header name to value mapping, used for requests and responses.
pub type Headers = BTreeMap<String, String>;

/// Decoded response body delivered with a `finished` event.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Body parsed as JSON.
    Json(serde_json::Value),
    /// Raw body text (raw mode, or the body was not valid JSON).
    Text(String),
}

impl Payload {
    /// Returns the JSON value when the body was parsed.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// Returns the raw text when the body was not parsed.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Json(_) => None,
            Payload::Text(text) => Some(text.as_str()),
        }
    }
}

/// Which channel variant carries an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Native HTTP request.
    Direct,
    /// Script-injection tunnel with a correlated callback.
    Fallback,
    /// No usable channel; the attempt is not dispatched.
    Invalid,
}

/// Externally visible lifecycle state of a controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestState {
    /// Never started.
    #[default]
    Idle,
    /// Waiting for the first attempt of a logical request.
    Scheduled,
    /// An attempt is in flight.
    Connecting,
    /// Waiting for the backoff delay before the next attempt.
    RetryScheduled,
    /// The last logical request delivered a `finished` event.
    Succeeded,
    /// The last logical request delivered an `error` event.
    Failed,
    /// The last logical request was aborted.
    Aborted,
}
