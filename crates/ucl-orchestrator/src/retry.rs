//! Retry policy (C8): exponential backoff consulted only for errors whose
//! `UclError::retryable()` is true (§7). Non-retryable errors fail the
//! operation immediately, no policy involved.

use std::time::Duration;

use ucl_core::UclError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// `None` when the error is non-retryable or attempts are exhausted.
    pub fn next_delay(&self, error: &UclError, attempt: u32) -> Option<Duration> {
        if !error.retryable() || attempt >= self.max_attempts {
            return None;
        }
        let backoff = self.base.saturating_mul(1 << attempt.min(20));
        Some(backoff.min(self.cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucl_core::ErrorCode;

    #[test]
    fn non_retryable_codes_never_get_a_delay() {
        let policy = RetryPolicy::default();
        let err = UclError::new(ErrorCode::AuthInvalid, "bad creds");
        assert!(policy.next_delay(&err, 0).is_none());
    }

    #[test]
    fn retryable_codes_back_off_exponentially_up_to_cap() {
        let policy = RetryPolicy::default();
        let err = UclError::new(ErrorCode::EndpointUnreachable, "unreachable");
        assert_eq!(policy.next_delay(&err, 0), Some(Duration::from_secs(1)));
        assert_eq!(policy.next_delay(&err, 1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(&err, 9), Some(Duration::from_secs(300)));
    }

    #[test]
    fn exhausted_attempts_stop_retrying() {
        let policy = RetryPolicy::default();
        let err = UclError::new(ErrorCode::Timeout, "slow");
        assert!(policy.next_delay(&err, policy.max_attempts).is_none());
    }
}
