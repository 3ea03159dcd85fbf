use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::llm_provider::LLMError;
use super::search_provider::SearchError;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_DELAY_MS: u64 = 1_000;
const DEFAULT_JITTER_MS: u64 = 1_000;
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Marks the failure class that is worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for LLMError {
    fn is_transient(&self) -> bool {
        self.is_quota_exhausted()
    }
}

impl Transient for SearchError {
    fn is_transient(&self) -> bool {
        matches!(self, SearchError::QuotaExhausted)
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Width of the uniform jitter window added to every backoff.
    pub jitter: Duration,
    /// Deadline for the whole invocation, retries and sleeps included.
    pub call_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            jitter: Duration::from_millis(DEFAULT_JITTER_MS),
            call_timeout: None,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: env_u64("LLM_RETRY_MAX_ATTEMPTS")
                .map(|v| v.clamp(1, u32::MAX as u64) as u32)
                .unwrap_or(defaults.max_attempts),
            initial_delay: env_u64("LLM_RETRY_INITIAL_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            jitter: env_u64("LLM_RETRY_JITTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.jitter),
            call_timeout: env_u64("LLM_CALL_TIMEOUT_MS")
                .filter(|v| *v > 0)
                .map(Duration::from_millis),
        }
    }

    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            call_timeout: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum InvokeError<E: std::error::Error + 'static> {
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    #[error(transparent)]
    Failed(E),
    #[error("invocation cancelled")]
    Cancelled,
    #[error("invocation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Bounded exponential-backoff retry around a single external call.
///
/// Only [`Transient`] failures are retried; anything else is returned on the
/// first occurrence. Holds no state between invocations.
#[derive(Debug, Clone, Default)]
pub struct RetryingInvoker {
    config: RetryConfig,
}

impl RetryingInvoker {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `initial_delay * 2^(attempt-1)`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.config.initial_delay.saturating_mul(1u32 << exponent)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay(attempt) + jitter(self.config.jitter)
    }

    pub async fn invoke<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, InvokeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::error::Error + 'static,
    {
        self.invoke_with_cancel(label, &CancellationToken::new(), op).await
    }

    pub async fn invoke_with_cancel<T, E, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        op: F,
    ) -> Result<T, InvokeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::error::Error + 'static,
    {
        let attempts = self.run_attempts(label, op);
        let bounded = async {
            match self.config.call_timeout {
                Some(limit) => tokio::time::timeout(limit, attempts)
                    .await
                    .unwrap_or(Err(InvokeError::TimedOut(limit))),
                None => attempts.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(label, "invocation cancelled");
                Err(InvokeError::Cancelled)
            }
            result = bounded => result,
        }
    }

    async fn run_attempts<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, InvokeError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::error::Error + 'static,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt >= max_attempts {
                        error!(label, attempts = attempt, error = %err, "retries exhausted");
                        return Err(InvokeError::Exhausted { attempts: attempt, source: err });
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(InvokeError::Failed(err)),
            }
        }
    }
}

fn jitter(window: Duration) -> Duration {
    if window.is_zero() {
        return Duration::ZERO;
    }
    window.mul_f64(rand::rng().random::<f64>())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
