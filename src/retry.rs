//! Retry budget and backoff schedule.
//!
//! The base delay starts at one second on the first retry and doubles on each
//! following retry until the eighth try, after which it holds at 64 seconds.
//! A uniform jitter in `[0, max_delay)` is added on top of the base.

use std::time::Duration;

use rand::{thread_rng, Rng};

/// Try count from which the backoff exponent stops doubling.
pub const BACKOFF_HOLD_TRIES: u32 = 8;

/// Backoff exponent carried across the retries of one controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Backoff {
    exponent_secs: u64,
}

impl Backoff {
    /// Advances the exponent for a failure observed at `tries_so_far` and
    /// returns the base delay (without jitter).
    pub fn advance(&mut self, tries_so_far: u32) -> Duration {
        if tries_so_far <= 1 {
            self.exponent_secs = 1;
        } else if tries_so_far < BACKOFF_HOLD_TRIES {
            self.exponent_secs = self.exponent_secs.saturating_mul(2);
        }
        Duration::from_secs(self.exponent_secs)
    }

    /// Advances the exponent and returns the full delay including jitter.
    pub fn next_delay(&mut self, tries_so_far: u32, max_delay_ms: u64) -> Duration {
        self.advance(tries_so_far) + jitter(max_delay_ms)
    }

    /// Current exponent in seconds.
    pub fn exponent_secs(&self) -> u64 {
        self.exponent_secs
    }
}

/// Uniform random delay in `[0, max_delay_ms)`.
pub fn jitter(max_delay_ms: u64) -> Duration {
    if max_delay_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(thread_rng().gen_range(0..max_delay_ms))
}

/// Computes the next retry delay in milliseconds, advancing `backoff`.
pub fn next_delay_ms(tries_so_far: u32, backoff: &mut Backoff, max_delay_ms: u64) -> u64 {
    let delay = backoff.next_delay(tries_so_far, max_delay_ms);
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Returns `true` while another attempt fits in the budget.
///
/// `None` means unlimited attempts.
pub fn permits_retry(tries_so_far: u32, max_tries: Option<u32>) -> bool {
    match max_tries {
        None => true,
        Some(max) => tries_so_far < max,
    }
}
