use super::SendError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

/// Bounded retry schedule for one outbound send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
}

#[derive(Debug, Error)]
#[error("gave up after {attempts} attempt(s): {last}")]
pub struct RetryError {
    pub attempts: u32,
    #[source]
    pub last: SendError,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff: Backoff::Linear,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            backoff: Backoff::Exponential,
        }
    }

    /// Same schedule with a per-action attempt override.
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        if let Some(n) = max_attempts {
            self.max_attempts = n;
        }
        self
    }

    /// Sleep after failed attempt number `attempt` (1-based).
    ///
    /// A server-provided hint replaces the computed delay. Either way the result
    /// never exceeds `max_delay`.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = match hint {
            Some(hint) => hint,
            None => match self.backoff {
                Backoff::Linear => self.base_delay.saturating_mul(attempt.max(1)),
                Backoff::Exponential => {
                    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                    self.base_delay.saturating_mul(factor)
                }
            },
        };
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    ///
    /// On success returns the value and the number of attempts it took.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, u32), RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{label}: succeeded on attempt {attempt}/{max_attempts}");
                    }
                    return Ok((value, attempt));
                }
                Err(e) if !e.is_retryable() => {
                    log::warn!("{label}: attempt {attempt}/{max_attempts} failed permanently: {e}");
                    return Err(RetryError {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) if attempt >= max_attempts => {
                    log::warn!("{label}: attempt {attempt}/{max_attempts} failed, giving up: {e}");
                    return Err(RetryError {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    let delay = self.delay_for(attempt, e.retry_after());
                    log::debug!(
                        "{label}: attempt {attempt}/{max_attempts} failed: {e}; retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
