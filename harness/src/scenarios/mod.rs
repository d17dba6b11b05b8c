//! Test Scenarios
//!
//! End-to-end flows against a real cluster, selectable by name from the CLI

pub mod core;
pub mod outage;
pub mod topics;

use anyhow::bail;
use shared::MessageFormat;

use crate::runtime::TestCluster;

pub struct TestScenarios {
    format: MessageFormat,
}

impl TestScenarios {
    pub fn new(format: MessageFormat) -> Self {
        Self { format }
    }

    /// Run a specific scenario by name
    pub async fn run_scenario(&self, name: &str, cluster: &mut TestCluster) -> anyhow::Result<()> {
        match name {
            "smoke" => core::smoke(cluster, self.format).await,
            "snapshot" => core::snapshot(cluster, self.format).await,
            "restart" => core::restart(cluster, self.format).await,
            "outage" => outage::outage(cluster, self.format).await,
            "topics" => topics::topics(cluster, self.format).await,

            "all" => {
                tracing::info!("🧪 Running all scenarios");
                core::smoke(cluster, self.format).await?;
                core::snapshot(cluster, self.format).await?;
                core::restart(cluster, self.format).await?;
                outage::outage(cluster, self.format).await?;
                topics::topics(cluster, self.format).await?;
                tracing::info!("🏆 All scenarios passed");
                Ok(())
            }

            _ => bail!(
                "Unknown test scenario: '{}'. Available: {}",
                name,
                Self::available_scenarios().join(", ")
            ),
        }
    }

    pub fn available_scenarios() -> Vec<&'static str> {
        vec!["smoke", "snapshot", "restart", "outage", "topics", "all"]
    }
}
