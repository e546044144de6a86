//! Bounded retry with a fixed interval.
//!
//! Every polling loop in the migrator (waiting for master nodes, waiting for
//! the API server after a membership change, waiting for a remote run) goes
//! through [`retry`], so the delays come from an injectable [`Sleeper`] and
//! tests never wait in real time.

use crate::error::{MigrationError, MigrationResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy: an optional warm-up delay, then up to `max_attempts`
/// attempts separated by `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            initial_delay: Duration::ZERO,
        }
    }

    pub const fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn validate(&self, name: &str) -> MigrationResult<()> {
        if self.max_attempts == 0 {
            return Err(MigrationError::configuration(format!(
                "{} retry policy needs at least one attempt",
                name
            )));
        }
        Ok(())
    }
}

/// Source of delays
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Result of a single attempt
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(String),
}

/// Run `attempt` until it returns [`Attempt::Done`], an error, or the policy
/// runs out of attempts. Errors returned by `attempt` are fatal and end the
/// loop immediately; exhaustion yields [`MigrationError::Unavailable`].
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    operation: &str,
    mut attempt: F,
) -> MigrationResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = MigrationResult<Attempt<T>>>,
{
    if !policy.initial_delay.is_zero() {
        debug!("Waiting {:?} before {}", policy.initial_delay, operation);
        sleeper.sleep(policy.initial_delay).await;
    }

    let mut last_error = String::from("no attempt made");
    for n in 1..=policy.max_attempts {
        match attempt(n).await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry(reason) => {
                debug!(
                    "{} not ready (attempt {}/{}): {}",
                    operation, n, policy.max_attempts, reason
                );
                last_error = reason;
            }
        }

        if n < policy.max_attempts {
            sleeper.sleep(policy.interval).await;
        }
    }

    warn!(
        "{} still not ready after {} attempts: {}",
        operation, policy.max_attempts, last_error
    );
    Err(MigrationError::unavailable(
        operation,
        policy.max_attempts,
        last_error,
    ))
}
