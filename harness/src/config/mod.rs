//! Configuration Management
//!
//! Per-cycle cluster configuration (reset between start cycles) and
//! process-wide harness settings (never reset).

pub mod builder;
pub mod cluster;
pub mod settings;

// Re-export main types
pub use builder::{ClusterConfigBuilder, HarnessSettingsBuilder};
pub use cluster::ClusterConfig;
pub use settings::HarnessSettings;
