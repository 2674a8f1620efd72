//! Retry policy and per-request retry budget.
//!
//! Two kinds of errors are retried:
//! - rate limits whose message carries `Please try again in <N>s.`: wait a
//!   multiple of N, attempt budget untouched
//! - anything else: fixed fallback wait, one attempt consumed
//!
//! Both kinds count toward an iteration ceiling and a total-wait ceiling, so
//! an endless stream of rate-limit errors still terminates.

use crate::models::RetryConfig;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static RETRY_AFTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Please try again in (\d+)s\.").expect("valid retry-after pattern")
});

/// Server-suggested delay embedded in an error message, in whole seconds.
pub fn parse_retry_after(message: &str) -> Option<u64> {
    RETRY_AFTER_RE
        .captures(message)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

/// Retry bounds for one logical request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub fallback_wait: Duration,
    pub rate_limit_multiplier: f64,
    pub max_total_wait: Duration,
    pub max_iterations: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            fallback_wait: saturating_secs(config.fallback_wait_secs),
            rate_limit_multiplier: config.rate_limit_multiplier,
            max_total_wait: saturating_secs(config.max_total_wait_secs),
            max_iterations: config.max_iterations,
        }
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

impl RetryPolicy {
    /// Wait applied for a server-suggested delay of `secs` seconds.
    ///
    /// `None` when the product does not fit in a `Duration`.
    pub fn rate_limit_wait(&self, secs: u64) -> Option<Duration> {
        Duration::try_from_secs_f64(secs as f64 * self.rate_limit_multiplier.max(0.0)).ok()
    }

    pub fn budget(&self) -> RetryBudget {
        RetryBudget::new(self.clone())
    }
}

/// Why a budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    Attempts,
    Iterations,
    TotalWait,
}

/// Counters scoped to a single logical request.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    attempts: u32,
    iterations: u32,
    waited: Duration,
}

impl RetryBudget {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            iterations: 0,
            waited: Duration::ZERO,
        }
    }

    /// Unknown-error attempts consumed.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Request cycles issued.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Account for a request about to be issued.
    pub fn begin_iteration(&mut self) -> Result<(), Exhaustion> {
        if self.attempts >= self.policy.max_attempts {
            return Err(Exhaustion::Attempts);
        }
        if self.iterations >= self.policy.max_iterations {
            return Err(Exhaustion::Iterations);
        }
        self.iterations += 1;
        Ok(())
    }

    /// Plan the wait after a rate-limit error. Does not consume an attempt.
    pub fn rate_limited(&mut self, retry_after_secs: u64) -> Result<Duration, Exhaustion> {
        let wait = self
            .policy
            .rate_limit_wait(retry_after_secs)
            .ok_or(Exhaustion::TotalWait)?;
        self.reserve(wait)
    }

    /// Plan the wait after an unrecognized error. Consumes one attempt.
    pub fn unknown_error(&mut self) -> Result<Duration, Exhaustion> {
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            return Err(Exhaustion::Attempts);
        }
        self.reserve(self.policy.fallback_wait)
    }

    fn reserve(&mut self, wait: Duration) -> Result<Duration, Exhaustion> {
        match self.waited.checked_add(wait) {
            Some(total) if total <= self.policy.max_total_wait => {
                self.waited = total;
                Ok(wait)
            }
            _ => Err(Exhaustion::TotalWait),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_parse_retry_after() {
        let msg = "Rate limit reached for gpt-4o. Limit 10000, Used 9000. Please try again in 10s. Visit ...";
        assert_eq!(parse_retry_after(msg), Some(10));
        assert_eq!(parse_retry_after("Please try again in 250ms."), None);
        assert_eq!(parse_retry_after("Please try again in 1.5s."), None);
        assert_eq!(parse_retry_after("Internal server error"), None);
    }

    #[test]
    fn test_backoff_arithmetic() {
        let policy = RetryPolicy::default();
        let wait = policy
            .rate_limit_wait(parse_retry_after("Please try again in 10s.").unwrap())
            .unwrap();
        assert_eq!(wait.as_secs_f64(), 15.0);
    }

    #[test]
    fn test_rate_limits_do_not_consume_attempts() {
        let mut budget = policy(2).budget();
        for _ in 0..5 {
            budget.begin_iteration().unwrap();
            budget.rate_limited(1).unwrap();
        }
        assert_eq!(budget.attempts(), 0);
        assert_eq!(budget.iterations(), 5);
    }

    #[test]
    fn test_unknown_errors_exhaust_attempts() {
        let mut budget = policy(3).budget();
        budget.begin_iteration().unwrap();
        assert_eq!(budget.unknown_error().unwrap(), Duration::from_secs(20));
        budget.begin_iteration().unwrap();
        budget.unknown_error().unwrap();
        budget.begin_iteration().unwrap();
        assert_eq!(budget.unknown_error(), Err(Exhaustion::Attempts));
        assert_eq!(budget.begin_iteration(), Err(Exhaustion::Attempts));
        assert_eq!(budget.attempts(), 3);
    }

    #[test]
    fn test_total_wait_ceiling() {
        let mut budget = RetryPolicy {
            max_total_wait: Duration::from_secs(60),
            ..RetryPolicy::default()
        }
        .budget();

        // 15s per wait: four fit into 60s, the fifth does not.
        for _ in 0..4 {
            budget.begin_iteration().unwrap();
            budget.rate_limited(10).unwrap();
        }
        budget.begin_iteration().unwrap();
        assert_eq!(budget.rate_limited(10), Err(Exhaustion::TotalWait));
        assert_eq!(budget.waited(), Duration::from_secs(60));
    }

    #[test]
    fn test_huge_retry_after_exhausts_total_wait() {
        let secs = parse_retry_after("Rate limit reached. Please try again in 18446744073709551615s.");
        assert_eq!(secs, Some(u64::MAX));
        assert_eq!(RetryPolicy::default().rate_limit_wait(u64::MAX), None);

        let mut budget = RetryPolicy {
            max_total_wait: Duration::MAX,
            ..RetryPolicy::default()
        }
        .budget();
        budget.begin_iteration().unwrap();
        assert_eq!(budget.rate_limited(u64::MAX), Err(Exhaustion::TotalWait));
        assert_eq!(budget.waited(), Duration::ZERO);

        // A representable wait can still overflow the running total.
        let mut budget = RetryPolicy {
            rate_limit_multiplier: 1.0,
            max_total_wait: Duration::MAX,
            ..RetryPolicy::default()
        }
        .budget();
        budget.begin_iteration().unwrap();
        budget.rate_limited(u64::MAX / 2).unwrap();
        budget.begin_iteration().unwrap();
        assert_eq!(budget.rate_limited(u64::MAX / 2 + 1), Err(Exhaustion::TotalWait));
    }

    #[test]
    fn test_iteration_ceiling() {
        let mut budget = RetryPolicy {
            max_iterations: 3,
            ..RetryPolicy::default()
        }
        .budget();
        for _ in 0..3 {
            budget.begin_iteration().unwrap();
            budget.rate_limited(0).unwrap();
        }
        assert_eq!(budget.begin_iteration(), Err(Exhaustion::Iterations));
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            max_attempts: 4,
            fallback_wait_secs: 2.5,
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.fallback_wait, Duration::from_millis(2500));
        assert_eq!(policy.rate_limit_multiplier, 1.5);
    }
}
