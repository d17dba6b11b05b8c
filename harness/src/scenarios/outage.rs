//! Outage Scenarios
//!
//! Start without the broker and check the application honours its
//! error-handling mode

use std::time::Duration;

use anyhow::ensure;
use shared::{MessageFormat, OnError, ServiceName};

use crate::error::ClusterError;
use crate::runtime::{StopOptions, TestCluster};

/// How long the application gets to notice the missing broker
const CRASH_GRACE: Duration = Duration::from_secs(5);

pub async fn outage(cluster: &mut TestCluster, format: MessageFormat) -> anyhow::Result<()> {
    for on_error in [OnError::Exit, OnError::Log] {
        broker_down(cluster, format, on_error).await?;
    }
    Ok(())
}

async fn broker_down(cluster: &mut TestCluster, format: MessageFormat, on_error: OnError) -> anyhow::Result<()> {
    tracing::info!("🧪 Outage: kafka down with --on-error={} ({})", on_error, format);

    cluster.configure(|config| {
        config.format = format;
        config.on_error = on_error;
    })?;
    cluster.start([ServiceName::Kafka]).await?;

    let waited = cluster.wait_until_ready(ServiceName::Kafka).await;
    ensure!(
        matches!(waited, Err(ClusterError::DeliberateExclusion { service: ServiceName::Kafka })),
        "waiting for an excluded broker should be refused, got {waited:?}"
    );

    let postgres = cluster.postgres()?;
    postgres
        .exec("CREATE TABLE things (id SERIAL PRIMARY KEY, thing INTEGER NOT NULL)")
        .await?;
    postgres.exec("INSERT INTO things (thing) VALUES (42)").await?;
    tokio::time::sleep(CRASH_GRACE).await;

    let running = cluster.app_running().await?;
    match on_error {
        OnError::Exit => ensure!(!running, "application should exit when kafka is down"),
        OnError::Log => ensure!(running, "application should keep running when kafka is down"),
    }

    cluster
        .stop(StopOptions {
            dump_logs: false,
            ..StopOptions::default()
        })
        .await;

    tracing::info!("✅ Outage ({}): PASSED", on_error);
    Ok(())
}
