//! Cluster runtime: retries, readiness polling, collection and lifecycle

pub mod cluster;
pub mod collector;
pub mod diagnostics;
pub mod hooks;
pub mod readiness;
pub mod retry;

pub use cluster::{StopOptions, TestCluster};
pub use collector::{CollectedMessages, DEFAULT_COLLECT_WAIT, MessageCollector};
pub use diagnostics::ContainerDiagnostics;
pub use hooks::ServiceHooks;
pub use readiness::{ProbeError, ProbeResult, ReadinessPoller};
pub use retry::RetryPolicy;
