//! Readiness polling
//!
//! Polls a probe on a fixed cadence until it reports a value or the attempt
//! budget runs out. Probes distinguish "not ready yet" (keep polling) from
//! failures that waiting cannot fix (abort at once).

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use shared::{ServiceName, service_debug, service_info};
use tokio::time::sleep;

use crate::error::{BackendError, ClusterError, ClusterResult};

/// Why a probe attempt did not produce a value
#[derive(Debug)]
pub enum ProbeError {
    /// Not ready yet; poll again
    Transient(BackendError),
    /// Polling cannot succeed; stop now
    Fatal(BackendError),
}

impl From<BackendError> for ProbeError {
    fn from(error: BackendError) -> Self {
        if error.is_transient() {
            ProbeError::Transient(error)
        } else {
            ProbeError::Fatal(error)
        }
    }
}

/// Outcome of one probe attempt: `Ok(None)` means "not ready yet"
pub type ProbeResult<T> = Result<Option<T>, ProbeError>;

/// Polls readiness probes for the services of one start cycle
///
/// Waiting for a service excluded from the cycle is a programming error and
/// fails with [`ClusterError::DeliberateExclusion`] before any probing.
/// Dropping a `wait_for` future cancels the wait.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    interval: Duration,
    excluded: HashSet<ServiceName>,
}

impl ReadinessPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            excluded: HashSet::new(),
        }
    }

    /// Refuse to wait for these services
    pub fn excluding<I>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = ServiceName>,
    {
        self.excluded.extend(services);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn check_not_excluded(&self, service: ServiceName) -> ClusterResult<()> {
        if self.excluded.contains(&service) {
            return Err(ClusterError::DeliberateExclusion { service });
        }
        Ok(())
    }

    /// Probe up to `max_tries` times, sleeping `interval` between attempts
    ///
    /// Returns the first value the probe produces; the probe is never
    /// called again after that.
    pub async fn wait_for<T, F, Fut>(
        &self,
        service: ServiceName,
        message: &str,
        max_tries: u32,
        mut probe: F,
    ) -> ClusterResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProbeResult<T>>,
    {
        self.check_not_excluded(service)?;

        service_info!(service, "⏳ Waiting for {}...", message);

        for attempt in 1..=max_tries {
            match probe().await {
                Ok(Some(value)) => {
                    service_info!(service, "✅ {} ready after {} attempt(s)", message, attempt);
                    return Ok(value);
                }
                Ok(None) => {
                    service_debug!(service, "… {} not ready (attempt {}/{})", message, attempt, max_tries);
                }
                Err(ProbeError::Transient(e)) => {
                    service_debug!(service, "… {} not ready: {} (attempt {}/{})", message, e, attempt, max_tries);
                }
                Err(ProbeError::Fatal(source)) => {
                    return Err(ClusterError::ProbeAborted { service, source });
                }
            }

            if attempt < max_tries {
                sleep(self.interval).await;
            }
        }

        Err(ClusterError::NotReady {
            service,
            attempts: max_tries,
        })
    }
}
