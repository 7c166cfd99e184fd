//! Bounded retry accounting for the reconnect watchdog.

/// Counts failed reconnect attempts against an optional ceiling.
///
/// A `max_attempts` of zero means "retry forever". The exhaustion notice is
/// reported exactly once per exhaustion; only [`reset`](Self::reset) re-arms
/// it.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    max_attempts: u32,
    attempts: u32,
    notified: bool,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: 0,
            notified: false,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Failed attempts since the last reset.
    pub fn attempt_count(&self) -> u32 {
        self.attempts
    }

    /// Whether the budget is spent.
    pub fn should_stop_retrying(&self) -> bool {
        self.max_attempts > 0 && self.attempts >= self.max_attempts
    }

    /// Record one failed attempt.
    ///
    /// Returns `true` the first time the ceiling is reached, which is the
    /// caller's cue to publish the give-up notice.
    pub fn register_attempt(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if self.should_stop_retrying() && !self.notified {
            self.notified = true;
            return true;
        }
        false
    }

    /// Called after any successful send or connect.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.notified = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_reported_once() {
        let mut policy = ReconnectPolicy::new(3);
        assert!(!policy.should_stop_retrying());
        assert!(!policy.register_attempt());
        assert!(!policy.register_attempt());
        assert!(policy.register_attempt());
        assert!(policy.should_stop_retrying());
        // Further failures never re-notify.
        assert!(!policy.register_attempt());
        assert_eq!(policy.attempt_count(), 4);
    }

    #[test]
    fn test_zero_means_unlimited() {
        let mut policy = ReconnectPolicy::new(0);
        for _ in 0..1000 {
            assert!(!policy.register_attempt());
        }
        assert!(!policy.should_stop_retrying());
    }

    #[test]
    fn test_reset_rearms_notice() {
        let mut policy = ReconnectPolicy::new(1);
        assert!(policy.register_attempt());
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert!(!policy.should_stop_retrying());
        assert!(policy.register_attempt());
    }
}
