//! Readiness polling with exponential backoff

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff settings for polling a provider until something is ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Maximum number of polls
    pub max_retries: u32,

    /// Delay after the first poll, in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay, in milliseconds
    pub max_delay_ms: u64,

    /// Backoff multiplier
    pub multiplier: f64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_retries: 30,
            initial_delay_ms: 2_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl WaitConfig {
    /// Delay before the next poll after `attempt` (zero-based), in milliseconds
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        (delay as u64).min(self.max_delay_ms)
    }
}

/// Poll `check` until it yields a value
///
/// `check` returns `Ok(None)` while the target is not ready yet. Errors are
/// propagated immediately. After `max_retries` polls the wait fails with
/// [`CloudError::Timeout`] naming `what`.
pub async fn wait_until<T, F, Fut>(config: &WaitConfig, what: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    for attempt in 0..config.max_retries {
        if let Some(value) = check().await? {
            return Ok(value);
        }

        if attempt + 1 < config.max_retries {
            let delay_ms = config.delay_for_attempt(attempt);
            tracing::debug!("{} not ready, retrying in {}ms", what, delay_ms);
            sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    Err(CloudError::Timeout(format!(
        "{} not ready after {} attempts",
        what, config.max_retries
    )))
}
