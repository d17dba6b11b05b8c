//! Before-service hooks
//!
//! One-shot actions run against the database right before a service comes
//! up, e.g. creating tables the application should snapshot. Each hook runs
//! at most once; hooks that never ran are dropped when the cluster stops.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use shared::{ServiceName, service_error, service_info};

use crate::error::{BackendResult, ClusterError, ClusterResult};
use crate::traits::DatabaseHandle;

type HookFn = Box<dyn FnOnce(Arc<dyn DatabaseHandle>) -> BoxFuture<'static, BackendResult<()>> + Send>;

struct ServiceHook {
    description: String,
    run: HookFn,
}

/// Pending hooks, at most one per service
#[derive(Default)]
pub struct ServiceHooks {
    pending: HashMap<ServiceName, ServiceHook>,
}

impl fmt::Debug for ServiceHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.pending.iter().map(|(service, hook)| (service, &hook.description)))
            .finish()
    }
}

impl ServiceHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` to run before `service` starts
    ///
    /// A second registration for the same service is rejected rather than
    /// silently replacing the first.
    pub fn register<F, Fut>(&mut self, service: ServiceName, description: impl Into<String>, hook: F) -> ClusterResult<()>
    where
        F: FnOnce(Arc<dyn DatabaseHandle>) -> Fut + Send + 'static,
        Fut: Future<Output = BackendResult<()>> + Send + 'static,
    {
        if self.pending.contains_key(&service) {
            return Err(ClusterError::HookAlreadyRegistered { service });
        }

        self.pending.insert(
            service,
            ServiceHook {
                description: description.into(),
                run: Box::new(move |db| hook(db).boxed()),
            },
        );
        Ok(())
    }

    pub fn is_pending(&self, service: ServiceName) -> bool {
        self.pending.contains_key(&service)
    }

    /// Run and consume the hook for `service`, if one is pending
    ///
    /// Returns whether a hook ran. The hook is consumed even when it fails.
    pub async fn run(&mut self, service: ServiceName, database: &Arc<dyn DatabaseHandle>) -> ClusterResult<bool> {
        let Some(hook) = self.pending.remove(&service) else {
            return Ok(false);
        };

        service_info!(service, "🪝 Running before hook for {}: {}", service, hook.description);

        if let Err(source) = (hook.run)(Arc::clone(database)).await {
            service_error!(service, "❌ Before hook for {} failed: {}", service, source);
            return Err(ClusterError::HookFailed {
                service,
                description: hook.description,
                source,
            });
        }

        Ok(true)
    }

    /// Drop every pending hook, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
