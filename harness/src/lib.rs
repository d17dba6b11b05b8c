//! Integration test harness for a Postgres change-data-capture pipeline
//!
//! Stands up zookeeper, kafka, postgres, an optional schema registry and the
//! application under test through docker compose, waits until each service
//! is usable, and reads back what the application published.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use harness::*;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = HarnessSettings::from_env()?;
//! let mut cluster = TestCluster::new(settings.clone(), Backends::docker(&settings)?);
//!
//! cluster.start([]).await?;
//! cluster.postgres()?.exec("CREATE TABLE users (id SERIAL PRIMARY KEY)").await?;
//! cluster.postgres()?.exec("INSERT INTO users DEFAULT VALUES").await?;
//!
//! let messages = cluster.collect("users", 1, DEFAULT_COLLECT_WAIT).await?;
//! assert_eq!(messages.len(), 1);
//!
//! cluster.stop(StopOptions::default()).await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod runtime;
pub mod scenarios;
pub mod services;
pub mod state;
pub mod traits;

// Re-export commonly used types
pub use config::{ClusterConfig, ClusterConfigBuilder, HarnessSettings, HarnessSettingsBuilder};
pub use error::{BackendError, BackendResult, ClusterError, ClusterResult};
pub use runtime::{
    CollectedMessages, ContainerDiagnostics, DEFAULT_COLLECT_WAIT, MessageCollector, ProbeError, ProbeResult,
    ReadinessPoller, RetryPolicy, StopOptions, TestCluster,
};
pub use services::Backends;
pub use state::ClusterState;
pub use traits::{AttachedContainer, CollectedMessage, ContainerInfo, ContainerLogs, StartOffset, TopicMetadata};

pub use shared::{CleanupPolicy, MessageFormat, OnError, ServiceName};
