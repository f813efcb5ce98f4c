use std::time::Duration;

use tokio::time::Instant;

use crate::config::FetcherConfig;
use crate::error::AbrError;

/// Where a single segment fetch stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    /// Attempt number `attempt` (0-indexed) is running or about to run.
    Attempting { attempt: u32 },
    /// Waiting `backoff` before attempt number `attempt`.
    Retry { attempt: u32, backoff: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Exhausted { .. })
    }
}

/// Retry state machine for one segment.
///
/// `max_attempts` bounds the total number of attempts, the first one included.
/// The delay before attempt `n + 1` is `base * 2^n`, capped at `max_backoff`.
#[derive(Debug)]
pub struct FetchAttempt {
    state: FetchState,
    max_attempts: u32,
    backoff_base: Duration,
    max_backoff: Duration,
    retry_at: Option<Instant>,
    last_error: Option<AbrError>,
}

impl FetchAttempt {
    pub fn new(config: &FetcherConfig) -> Self {
        Self {
            state: FetchState::Attempting { attempt: 0 },
            max_attempts: config.max_retries.max(1),
            backoff_base: config.backoff_base(),
            max_backoff: config.max_backoff(),
            retry_at: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> FetchState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_error(&self) -> Option<&AbrError> {
        self.last_error.as_ref()
    }

    /// Delay after failed attempt `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(multiplier)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Enter the next attempt, returning its number.
    ///
    /// Returns `None` once the machine is terminal.
    pub fn begin_attempt(&mut self) -> Option<u32> {
        match self.state {
            FetchState::Attempting { attempt } => Some(attempt),
            FetchState::Retry { attempt, .. } => {
                self.retry_at = None;
                self.state = FetchState::Attempting { attempt };
                Some(attempt)
            }
            FetchState::Succeeded { .. } | FetchState::Exhausted { .. } => None,
        }
    }

    pub fn record_success(&mut self) -> FetchState {
        if let FetchState::Attempting { attempt } = self.state {
            self.state = FetchState::Succeeded {
                attempts: attempt + 1,
            };
        }
        self.state
    }

    /// Record a failed attempt. Non-retryable errors and a spent attempt budget
    /// exhaust the machine, anything else schedules a retry.
    pub fn record_failure(&mut self, error: AbrError) -> FetchState {
        let FetchState::Attempting { attempt } = self.state else {
            return self.state;
        };
        let made = attempt + 1;

        self.state = if !error.is_retryable() || made >= self.max_attempts {
            FetchState::Exhausted { attempts: made }
        } else {
            let backoff = self.backoff_for(attempt);
            self.retry_at = Some(Instant::now() + backoff);
            FetchState::Retry {
                attempt: made,
                backoff,
            }
        };
        self.last_error = Some(error);
        self.state
    }

    /// Remaining wait before the next attempt may start, if one is scheduled.
    pub fn time_to_next_attempt(&self) -> Option<Duration> {
        match self.state {
            FetchState::Retry { .. } => self
                .retry_at
                .map(|at| at.saturating_duration_since(Instant::now())),
            _ => None,
        }
    }

    /// Error describing an exhausted fetch of `segment`.
    ///
    /// A non-retryable failure is returned as is; a spent budget is wrapped in
    /// [`AbrError::RetriesExhausted`].
    pub fn into_error(self, segment: &str) -> AbrError {
        let attempts = match self.state {
            FetchState::Exhausted { attempts } => attempts,
            FetchState::Attempting { attempt } | FetchState::Retry { attempt, .. } => attempt,
            FetchState::Succeeded { attempts } => attempts,
        };
        match self.last_error {
            Some(error) if !error.is_retryable() => error,
            Some(error) => AbrError::RetriesExhausted {
                segment: segment.to_string(),
                attempts,
                source: Box::new(error),
            },
            None => AbrError::transient(segment, "fetch ended without an attempt"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> FetchAttempt {
        FetchAttempt::new(&FetcherConfig::default())
    }

    fn transient() -> AbrError {
        AbrError::transient("seg-0.ts", "timeout")
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let m = machine();
        assert_eq!(m.backoff_for(0), Duration::from_secs(1));
        assert_eq!(m.backoff_for(1), Duration::from_secs(2));
        assert_eq!(m.backoff_for(2), Duration::from_secs(4));
    }

    #[test]
    fn backoff_is_capped() {
        let m = machine();
        assert_eq!(m.backoff_for(10), Duration::from_secs(30));
        assert_eq!(m.backoff_for(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_exhaust_after_three_attempts() {
        let mut m = machine();
        assert_eq!(m.begin_attempt(), Some(0));
        assert_eq!(
            m.record_failure(transient()),
            FetchState::Retry {
                attempt: 1,
                backoff: Duration::from_secs(1)
            }
        );
        assert_eq!(m.time_to_next_attempt(), Some(Duration::from_secs(1)));

        assert_eq!(m.begin_attempt(), Some(1));
        assert_eq!(m.time_to_next_attempt(), None);
        assert_eq!(
            m.record_failure(transient()),
            FetchState::Retry {
                attempt: 2,
                backoff: Duration::from_secs(2)
            }
        );

        assert_eq!(m.begin_attempt(), Some(2));
        assert_eq!(
            m.record_failure(transient()),
            FetchState::Exhausted { attempts: 3 }
        );
        assert_eq!(m.begin_attempt(), None);

        let err = m.into_error("seg-0.ts");
        assert!(matches!(
            err,
            AbrError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn time_to_next_attempt_counts_down() {
        let mut m = machine();
        m.begin_attempt();
        m.record_failure(transient());
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(m.time_to_next_attempt(), Some(Duration::from_millis(600)));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(m.time_to_next_attempt(), Some(Duration::ZERO));
    }

    #[test]
    fn not_found_exhausts_immediately() {
        let mut m = machine();
        m.begin_attempt();
        assert_eq!(
            m.record_failure(AbrError::not_found("seg-9.ts")),
            FetchState::Exhausted { attempts: 1 }
        );
        let err = m.into_error("seg-9.ts");
        assert!(matches!(err, AbrError::ResourceNotFound { .. }));
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn success_after_retry_counts_attempts() {
        let mut m = machine();
        m.begin_attempt();
        m.record_failure(transient());
        m.begin_attempt();
        assert_eq!(m.record_success(), FetchState::Succeeded { attempts: 2 });
        assert!(m.state().is_terminal());
        assert_eq!(m.begin_attempt(), None);
    }

    #[test]
    fn single_attempt_budget_never_retries() {
        let config = FetcherConfig {
            max_retries: 1,
            ..FetcherConfig::default()
        };
        let mut m = FetchAttempt::new(&config);
        m.begin_attempt();
        assert_eq!(
            m.record_failure(transient()),
            FetchState::Exhausted { attempts: 1 }
        );
    }
}
