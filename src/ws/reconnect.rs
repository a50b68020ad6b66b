//! Backoff-governed retry scheduling.

use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;

use super::config::ReconnectConfig;

/// Why no retry was armed.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Veto {
    /// The manager was manually disconnected
    ManualDisconnect,
    /// The attempt budget ran out
    AttemptsExhausted,
}

/// Computes capped exponential retry delays and guards retry eligibility.
///
/// The delay for attempt `n` is exactly `min(initial * multiplier^n, max)`:
/// the backoff source is configured without randomization, keeping the retry
/// cadence deterministic. Reachability gating and teardown cancellation are
/// the connection loop's responsibility.
#[derive(Debug)]
pub(crate) struct ReconnectScheduler {
    config: ReconnectConfig,
    backoff: ExponentialBackoff,
}

impl ReconnectScheduler {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        let backoff = config.clone().into();
        Self { config, backoff }
    }

    /// Decide whether the given attempt may be retried and, if so, after what
    /// delay.
    pub(crate) fn schedule(&mut self, attempt: u32, manual_disconnect: bool) -> Result<Duration, Veto> {
        if manual_disconnect {
            return Err(Veto::ManualDisconnect);
        }
        if let Some(max) = self.config.max_attempts
            && attempt >= max
        {
            return Err(Veto::AttemptsExhausted);
        }
        Ok(self.backoff.next_backoff().unwrap_or(self.config.max_backoff))
    }

    /// Restart the delay sequence after a successful connection.
    pub(crate) fn reset(&mut self) {
        self.backoff.reset();
    }
}
