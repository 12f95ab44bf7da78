use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{EngineError, ErrorCodes, Result};

/// Which transport a controller may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Direct when the environment allows it, otherwise fallback.
    #[default]
    Auto,
    /// Always the native HTTP channel.
    #[serde(alias = "xhr")]
    Direct,
    /// Always the script-injection channel.
    #[serde(alias = "jsonp")]
    Fallback,
}

impl FromStr for TransportMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "direct" | "xhr" => Ok(Self::Direct),
            "fallback" | "jsonp" => Ok(Self::Fallback),
            other => Err(EngineError::Config(format!("unknown transport '{other}'"))),
        }
    }
}

/// Controller configuration. Immutable once a controller is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestConfig {
    /// Transport selection mode.
    pub transport: TransportMode,
    /// Deliver bodies as text without attempting JSON parsing.
    pub raw_response: bool,
    /// Attempts per logical request. `None` means unlimited (`-1` in JSON).
    #[serde(
        serialize_with = "serialize_max_tries",
        deserialize_with = "deserialize_max_tries"
    )]
    pub max_tries: Option<u32>,
    /// Jitter ceiling in milliseconds.
    #[serde(rename = "maxDelay")]
    pub max_delay_ms: u64,
    /// Restart automatically after every 2xx `finished`.
    pub recurring: bool,
    /// Ask the direct channel to send credentials cross-origin.
    #[serde(alias = "withCredentials")]
    pub credentialed: bool,
    /// Per-attempt timeout in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: u64,
    /// Codes that are retried, e.g. `"500-599,429"`.
    pub error_codes: ErrorCodes,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::Auto,
            raw_response: false,
            max_tries: Some(1),
            max_delay_ms: 1_000,
            recurring: false,
            credentialed: false,
            timeout_ms: 60_000,
            error_codes: ErrorCodes::default(),
        }
    }
}

impl RequestConfig {
    /// Parses a JSON configuration object. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| EngineError::Decode(format!("invalid request config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value domains that the type system does not enforce.
    pub fn validate(&self) -> Result<()> {
        if self.max_tries == Some(0) {
            return Err(EngineError::Config(
                "maxTries must be at least 1, or -1 for unlimited".to_owned(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::Config("timeout must be positive".to_owned()));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportMode) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_raw_response(mut self, raw: bool) -> Self {
        self.raw_response = raw;
        self
    }

    #[must_use]
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    #[must_use]
    pub fn with_unlimited_tries(mut self) -> Self {
        self.max_tries = None;
        self
    }

    #[must_use]
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    #[must_use]
    pub fn with_recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, credentialed: bool) -> Self {
        self.credentialed = credentialed;
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the retried codes from an expression such as `"500-599,429"`.
    pub fn with_error_codes(mut self, expression: &str) -> Result<Self> {
        self.error_codes = ErrorCodes::parse(expression)?;
        Ok(self)
    }
}

fn serialize_max_tries<S: Serializer>(
    value: &Option<u32>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(max) => serializer.serialize_i64(i64::from(*max)),
        None => serializer.serialize_i64(-1),
    }
}

fn deserialize_max_tries<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<u32>, D::Error> {
    let raw = i64::deserialize(deserializer)?;
    match raw {
        -1 => Ok(None),
        n if n >= 0 => u32::try_from(n)
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("maxTries {n} is too large"))),
        n => Err(serde::de::Error::custom(format!(
            "maxTries must be -1 or positive, got {n}"
        ))),
    }
}
