//! Topic Scenarios
//!
//! Topic creation through the coordination service, with broker-side
//! auto-creation switched on and off

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, ensure};
use shared::MessageFormat;

use crate::runtime::{StopOptions, TestCluster};

/// Time for the application to publish (or crash) after a write
const PUBLISH_GRACE: Duration = Duration::from_secs(1);
const CRASH_GRACE: Duration = Duration::from_secs(5);

fn quiet_stop() -> StopOptions {
    StopOptions {
        dump_logs: false,
        ..StopOptions::default()
    }
}

pub async fn topics(cluster: &mut TestCluster, format: MessageFormat) -> anyhow::Result<()> {
    autocreate_enabled(cluster, format).await?;
    autocreate_disabled(cluster, format).await
}

async fn topic_exists(cluster: &TestCluster, topic: &str) -> anyhow::Result<bool> {
    let topics = cluster
        .coordination()?
        .topics()
        .await
        .context("listing topics")?;
    Ok(topics.contains_key(topic))
}

/// Topics appear with the first row, not with the table
async fn autocreate_enabled(cluster: &mut TestCluster, format: MessageFormat) -> anyhow::Result<()> {
    tracing::info!("🧪 Topics: auto-create enabled ({})", format);

    cluster.configure(|config| {
        config.format = format;
        config.auto_create_topics = true;
    })?;
    cluster.start([]).await?;

    let postgres = cluster.postgres()?;
    let items = cluster.config().topic_for_table("items");
    postgres
        .exec("CREATE TABLE items (id SERIAL PRIMARY KEY, item TEXT)")
        .await?;
    tokio::time::sleep(PUBLISH_GRACE).await;
    ensure!(
        !topic_exists(cluster, &items).await?,
        "creating a table should not create topic {items}"
    );

    let things = cluster.config().topic_for_table("things");
    postgres
        .exec("CREATE TABLE things (id SERIAL PRIMARY KEY, thing INTEGER NOT NULL)")
        .await?;
    postgres.exec("INSERT INTO things (thing) VALUES (42)").await?;
    tokio::time::sleep(PUBLISH_GRACE).await;
    ensure!(
        topic_exists(cluster, &things).await?,
        "inserting rows should create topic {things}"
    );

    cluster.stop(quiet_stop()).await;
    tracing::info!("✅ Topics (auto-create enabled): PASSED");
    Ok(())
}

/// Without auto-creation the application needs its topic to exist up front
async fn autocreate_disabled(cluster: &mut TestCluster, format: MessageFormat) -> anyhow::Result<()> {
    tracing::info!("🧪 Topics: auto-create disabled ({})", format);

    cluster.configure(|config| {
        config.format = format;
        config.auto_create_topics = false;
    })?;
    cluster.start([]).await?;
    ensure!(cluster.app_running().await?, "application should be running after start");

    cluster
        .postgres()?
        .exec("CREATE TABLE things (id SERIAL PRIMARY KEY, thing INTEGER NOT NULL)")
        .await?;
    cluster.postgres()?.exec("INSERT INTO things (thing) VALUES (42)").await?;
    tokio::time::sleep(CRASH_GRACE).await;
    ensure!(
        !cluster.app_running().await?,
        "inserting into a table without a topic should crash the application"
    );

    // Same configuration, fresh containers
    cluster.restart(quiet_stop()).await?;

    let items = cluster.config().topic_for_table("items");
    let policy = cluster.config().topic_cleanup_policy;
    let config = BTreeMap::from([("cleanup.policy".to_string(), policy.to_string())]);
    cluster
        .coordination()?
        .create_topic(&items, 1, 1, config)
        .await
        .with_context(|| format!("creating topic {items}"))?;
    tokio::time::sleep(PUBLISH_GRACE).await;

    let metadata = cluster.coordination()?.topics().await?;
    let created = metadata
        .get(&items)
        .with_context(|| format!("topic {items} missing after create_topic"))?;
    ensure!(
        created.config.get("cleanup.policy").map(String::as_str) == Some(policy.as_str()),
        "topic {items} should carry cleanup.policy={policy}, got {:?}",
        created.config
    );

    let postgres = cluster.postgres()?;
    postgres
        .exec("CREATE TABLE items (id SERIAL PRIMARY KEY, item INTEGER NOT NULL)")
        .await?;
    postgres.exec("INSERT INTO items (item) VALUES (42)").await?;
    tokio::time::sleep(CRASH_GRACE).await;
    ensure!(
        cluster.app_running().await?,
        "inserting into a table whose topic exists should not crash the application"
    );

    cluster.stop(quiet_stop()).await;
    tracing::info!("✅ Topics (auto-create disabled): PASSED");
    Ok(())
}
