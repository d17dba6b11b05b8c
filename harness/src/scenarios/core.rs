//! Core Scenarios
//!
//! Start the cluster, write rows, read the published changes back

use anyhow::{Context, ensure};
use shared::{MessageFormat, OnError};

use crate::error::ClusterError;
use crate::runtime::{DEFAULT_COLLECT_WAIT, StopOptions, TestCluster};
use crate::traits::CollectedMessage;

async fn collect(cluster: &TestCluster, table: &str, expected: usize) -> anyhow::Result<Vec<CollectedMessage>> {
    let topic = cluster.config().topic_for_table(table);
    let messages = cluster
        .collect(&topic, expected, DEFAULT_COLLECT_WAIT)
        .await
        .with_context(|| format!("collecting from {topic}"))?;
    Ok(messages)
}

/// Start, publish a few inserts, stop
pub async fn smoke(cluster: &mut TestCluster, format: MessageFormat) -> anyhow::Result<()> {
    tracing::info!("🧪 Smoke: inserts reach the broker ({})", format);

    cluster.configure(|config| config.format = format)?;
    cluster.start([]).await?;
    ensure!(cluster.healthy().await?, "cluster should be healthy after start");

    let postgres = cluster.postgres()?;
    postgres
        .exec("CREATE TABLE things (id SERIAL PRIMARY KEY, thing INTEGER NOT NULL)")
        .await?;
    postgres
        .exec("INSERT INTO things (thing) VALUES (1), (2), (3)")
        .await?;

    let messages = collect(cluster, "things", 3).await?;
    ensure!(messages.len() == 3, "expected 3 messages, got {}", messages.len());

    cluster.stop(StopOptions::default()).await;
    ensure!(
        matches!(cluster.healthy().await, Err(ClusterError::NotStarted { .. })),
        "health checks should fail once stopped"
    );

    tracing::info!("✅ Smoke: PASSED");
    Ok(())
}

/// Rows that exist before the application starts are published first
pub async fn snapshot(cluster: &mut TestCluster, format: MessageFormat) -> anyhow::Result<()> {
    tracing::info!("🧪 Snapshot: existing rows are published ({})", format);

    cluster.configure(|config| config.format = format)?;
    let app = cluster.app_service();
    cluster.before_service(app, "Prepopulating users table", |postgres| async move {
        postgres
            .exec("CREATE TABLE users (id SERIAL PRIMARY KEY, username TEXT)")
            .await?;
        postgres
            .exec("INSERT INTO users (username) SELECT 'user' || num FROM generate_series(1, 10) AS num")
            .await
    })?;
    cluster.start([]).await?;

    let snapshot = collect(cluster, "users", 10).await?;
    ensure!(snapshot.len() == 10, "expected 10 snapshot messages, got {}", snapshot.len());

    cluster
        .postgres()?
        .exec("INSERT INTO users (username) VALUES ('user11')")
        .await?;

    // A fresh consumer group re-reads the snapshot before the new row
    let messages = collect(cluster, "users", 11).await?;
    if format == MessageFormat::Json {
        let last = messages
            .last()
            .and_then(|message| message.value.as_deref())
            .map(String::from_utf8_lossy)
            .unwrap_or_default();
        ensure!(last.contains("user11"), "last message should be the insert, got {last}");
    }

    cluster.stop(StopOptions::default()).await;
    tracing::info!("✅ Snapshot: PASSED");
    Ok(())
}

/// Restarting keeps the configuration, stopping resets it
pub async fn restart(cluster: &mut TestCluster, format: MessageFormat) -> anyhow::Result<()> {
    tracing::info!("🧪 Restart: configuration survives a restart ({})", format);

    cluster.configure(|config| {
        config.format = format;
        config.on_error = OnError::Log;
    })?;
    cluster.start([]).await?;

    cluster
        .restart(StopOptions {
            dump_logs: false,
            ..StopOptions::default()
        })
        .await?;
    ensure!(cluster.config().on_error == OnError::Log, "restart should keep on_error = log");
    ensure!(cluster.healthy().await?, "cluster should be healthy after restart");

    cluster.stop(StopOptions::default()).await;
    ensure!(cluster.config().on_error == OnError::Exit, "stop should reset on_error");

    tracing::info!("✅ Restart: PASSED");
    Ok(())
}
