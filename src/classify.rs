//! Response classification against a configured error-code expression.
//!
//! An expression is a comma-separated list of single codes (`429`) and
//! inclusive ranges (`500-599`). A status matching any entry is retried.

use std::{fmt, ops::RangeInclusive, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Outcome of classifying one response code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Non-retryable 2xx response. Eligible for recurrence.
    Success,
    /// No response (code 0) or a code in the configured error set.
    Retryable,
    /// Any other non-retryable code. Delivered to the caller like a success.
    Terminal,
}

/// Parsed error-code expression, e.g. `"500-599,429"`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ErrorCodes {
    expression: String,
    ranges: Vec<RangeInclusive<u16>>,
}

impl ErrorCodes {
    /// Parses an expression, rejecting malformed entries.
    ///
    /// Blank entries are ignored, so `""` and `"500-599,"` are valid.
    pub fn parse(expression: &str) -> Result<Self, EngineError> {
        let mut ranges = Vec::new();
        for entry in expression.split(',') {
            if entry.trim().is_empty() {
                continue;
            }
            match parse_entry(entry) {
                Some(range) if range.start() <= range.end() => ranges.push(range),
                _ => {
                    return Err(EngineError::InvalidErrorCodes {
                        expression: expression.to_owned(),
                        entry: entry.to_owned(),
                    })
                }
            }
        }
        Ok(Self {
            expression: expression.to_owned(),
            ranges,
        })
    }

    /// Parses an expression, silently skipping malformed entries.
    pub fn parse_lenient(expression: &str) -> Self {
        Self {
            expression: expression.to_owned(),
            ranges: expression.split(',').filter_map(parse_entry).collect(),
        }
    }

    /// Returns `true` when `code` falls in any entry.
    pub fn matches(&self, code: u16) -> bool {
        self.ranges.iter().any(|range| range.contains(&code))
    }

    /// The expression text this value was parsed from.
    pub fn as_str(&self) -> &str {
        &self.expression
    }
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self {
            expression: "500-599".to_owned(),
            ranges: vec![500..=599],
        }
    }
}

impl FromStr for ErrorCodes {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ErrorCodes {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ErrorCodes> for String {
    fn from(value: ErrorCodes) -> Self {
        value.expression
    }
}

impl fmt::Display for ErrorCodes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_entry(entry: &str) -> Option<RangeInclusive<u16>> {
    let entry = entry.trim();
    match entry.split_once('-') {
        Some((min, max)) => {
            let min = min.trim().parse().ok()?;
            let max = max.trim().parse().ok()?;
            Some(min..=max)
        }
        None => {
            let code = entry.parse().ok()?;
            Some(code..=code)
        }
    }
}

/// Classifies `code` against an expression, skipping malformed entries.
pub fn classify(code: u16, expression: &str) -> Classification {
    classify_with(code, &ErrorCodes::parse_lenient(expression))
}

/// Classifies `code` against an already parsed expression.
pub fn classify_with(code: u16, error_codes: &ErrorCodes) -> Classification {
    if code == 0 || error_codes.matches(code) {
        Classification::Retryable
    } else if (200..300).contains(&code) {
        Classification::Success
    } else {
        Classification::Terminal
    }
}
