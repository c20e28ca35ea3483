//! Exponential backoff for the stream tier.

use collection_core::config::StreamConfig;
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: StdDuration,
    /// Consecutive failed reconnects tolerated before the stream is abandoned.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            base_delay: StdDuration::from_millis(config.base_delay_ms),
            max_attempts: config.max_attempts,
        }
    }

    /// `base_delay * 2^(attempt - 1)`, saturating.
    pub fn delay_for(&self, attempt: u32) -> StdDuration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&StreamConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { attempt: u32, delay: StdDuration },
    /// Give up on the stream for the rest of the process.
    FallBack,
}

/// Tracks consecutive disconnects.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: ReconnectPolicy,
    attempt: u32,
    disabled: bool,
}

impl ReconnectController {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            disabled: false,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// A session delivered at least one frame. A handshake alone does not count.
    pub fn on_stable_session(&mut self) {
        self.attempt = 0;
    }

    /// The connection dropped or never came up.
    pub fn on_disconnect(&mut self) -> ReconnectDecision {
        if self.disabled {
            return ReconnectDecision::FallBack;
        }

        self.attempt += 1;
        if self.attempt > self.policy.max_attempts {
            self.disabled = true;
            return ReconnectDecision::FallBack;
        }

        ReconnectDecision::Retry {
            attempt: self.attempt,
            delay: self.policy.delay_for(self.attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: StdDuration::from_millis(5000),
            max_attempts: 5,
        }
    }

    #[test]
    fn test_delays_double() {
        let mut controller = ReconnectController::new(policy());
        let delays: Vec<u128> = (0..3)
            .map(|_| match controller.on_disconnect() {
                ReconnectDecision::Retry { delay, .. } => delay.as_millis(),
                ReconnectDecision::FallBack => panic!("fell back early"),
            })
            .collect();
        assert_eq!(delays, vec![5000, 10000, 20000]);
    }

    #[test]
    fn test_exhaustion_is_permanent() {
        let mut controller = ReconnectController::new(policy());
        for expected in 1..=5 {
            assert!(matches!(
                controller.on_disconnect(),
                ReconnectDecision::Retry { attempt, .. } if attempt == expected
            ));
        }
        assert_eq!(controller.on_disconnect(), ReconnectDecision::FallBack);
        assert!(controller.is_disabled());

        controller.on_stable_session();
        assert_eq!(controller.on_disconnect(), ReconnectDecision::FallBack);
    }

    #[test]
    fn test_stable_session_resets_attempts() {
        let mut controller = ReconnectController::new(policy());
        controller.on_disconnect();
        controller.on_disconnect();
        controller.on_stable_session();
        assert_eq!(controller.attempt(), 0);

        assert_eq!(
            controller.on_disconnect(),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: StdDuration::from_millis(5000)
            }
        );
    }

    #[test]
    fn test_delay_saturates() {
        assert_eq!(policy().delay_for(200), StdDuration::from_millis(5000) * (1 << 31));
    }
}
