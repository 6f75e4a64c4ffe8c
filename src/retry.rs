use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Errors that can classify themselves as transient are eligible for
/// another attempt under a [`BackoffPolicy`].
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Delays grow `initial, initial*multiplier, ...` capped at `max`; a
/// non-transient error or an exhausted budget returns the last error.
pub async fn retry_transient<T, E, F, Fut>(
    policy: &BackoffPolicy,
    what: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let mut delay = policy.initial;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    operation = what,
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Transient failure, backing off before retry"
                );
                sleep(delay).await;
                delay = (delay * policy.multiplier).min(policy.max);
            }
            Err(err) => return Err(err),
        }
    }
}
