//! Retrying calls into flaky collaborators
//!
//! Mostly intended for calls that are known to fail intermittently, such as
//! the docker daemon dropping a connection mid-request. Every attempt repeats
//! the call in full, side effects included, so only wrap calls that are safe
//! to repeat.

use std::fmt::Display;
use std::future::Future;

use tracing::{error, warn};

/// Bounded retry budget applied to each wrapped call independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `operation`, re-running it after each failure until it succeeds
    /// or `max_retries` retries have been spent
    ///
    /// The error returned after the budget is exhausted is the operation's
    /// own last error, unchanged.
    pub async fn call<T, E, F, Fut>(&self, target: &str, method: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut retries = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        target_type = target,
                        method,
                        attempt = retries,
                        error = %e,
                        "🔁 {}#{} retry #{} after error: {}",
                        target,
                        method,
                        retries,
                        e
                    );
                }
                Err(e) => {
                    error!(
                        target_type = target,
                        method,
                        retries,
                        error = %e,
                        "❌ {}#{} failed after {} retries",
                        target,
                        method,
                        retries
                    );
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4)
    }
}
