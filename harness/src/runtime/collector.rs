//! Message collection
//!
//! Reads back what the application published: subscribes to a topic from
//! the earliest offset under a fresh consumer group, takes exactly the
//! expected number of messages, and gives up after a wall-clock wait.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ClusterError, ClusterResult};
use crate::traits::{BrokerConsumer, CollectedMessage, StartOffset, Subscription};

/// Default time to wait for the expected messages
pub const DEFAULT_COLLECT_WAIT: Duration = Duration::from_secs(10);

/// Collected messages, either in arrival order or grouped by partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectedMessages {
    Messages(Vec<CollectedMessage>),
    Partitioned(BTreeMap<i32, Vec<CollectedMessage>>),
}

impl CollectedMessages {
    /// Total number of messages across all partitions
    pub fn len(&self) -> usize {
        match self {
            CollectedMessages::Messages(messages) => messages.len(),
            CollectedMessages::Partitioned(partitions) => partitions.values().map(Vec::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Interrupts the subscription however the collection ends
struct SubscriptionGuard(Box<dyn Subscription>);

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.0.interrupt();
    }
}

pub struct MessageCollector {
    consumer: Arc<dyn BrokerConsumer>,
    endpoint: String,
    group_prefix: String,
}

impl MessageCollector {
    pub fn new(consumer: Arc<dyn BrokerConsumer>, endpoint: impl Into<String>) -> Self {
        Self {
            consumer,
            endpoint: endpoint.into(),
            group_prefix: "harness".to_string(),
        }
    }

    pub fn with_group_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.group_prefix = prefix.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Collect `expected` messages from `topic` in arrival order
    pub async fn collect(
        &self,
        topic: &str,
        expected: usize,
        wait: Duration,
    ) -> ClusterResult<Vec<CollectedMessage>> {
        self.take(topic, expected, wait).await
    }

    /// Collect `expected` messages from `topic`, grouped by partition
    ///
    /// Arrival order is kept within each partition.
    pub async fn collect_partitioned(
        &self,
        topic: &str,
        expected: usize,
        wait: Duration,
    ) -> ClusterResult<BTreeMap<i32, Vec<CollectedMessage>>> {
        let messages = self.take(topic, expected, wait).await?;

        let mut partitions: BTreeMap<i32, Vec<CollectedMessage>> = BTreeMap::new();
        for message in messages {
            partitions.entry(message.partition).or_default().push(message);
        }
        Ok(partitions)
    }

    pub async fn collect_messages(
        &self,
        topic: &str,
        expected: usize,
        wait: Duration,
        collect_partitions: bool,
    ) -> ClusterResult<CollectedMessages> {
        if collect_partitions {
            self.collect_partitioned(topic, expected, wait)
                .await
                .map(CollectedMessages::Partitioned)
        } else {
            self.collect(topic, expected, wait).await.map(CollectedMessages::Messages)
        }
    }

    async fn take(&self, topic: &str, expected: usize, wait: Duration) -> ClusterResult<Vec<CollectedMessage>> {
        if expected == 0 {
            return Ok(Vec::new());
        }

        // A fresh group per collection so every call reads from the start
        let group = format!("{}-{}", self.group_prefix, Uuid::new_v4());
        debug!(topic, group = %group, expected, "📥 Subscribing to {} as {}", topic, group);

        let subscription = self
            .consumer
            .subscribe(&self.endpoint, &group, vec![topic.to_string()], StartOffset::Earliest)
            .await?;
        let mut guard = SubscriptionGuard(subscription);

        let mut batch = Vec::with_capacity(expected);
        let outcome = timeout(wait, async {
            while batch.len() < expected {
                match guard.0.next_message().await {
                    Some(Ok(message)) => batch.push(message),
                    Some(Err(e)) => return Err(ClusterError::from(e)),
                    None => {
                        return Err(ClusterError::SubscriptionClosed {
                            topic: topic.to_string(),
                            seen: batch.len(),
                        });
                    }
                }
            }
            Ok(())
        })
        .await;
        drop(guard);

        match outcome {
            Ok(Ok(())) => {
                info!(topic, count = batch.len(), "📬 Collected {} message(s) from {}", batch.len(), topic);
                Ok(batch)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(topic, expected, seen = batch.len(), "⏰ Timed out collecting from {}", topic);
                Err(ClusterError::CollectionTimeout {
                    topic: topic.to_string(),
                    expected,
                    seen: batch.len(),
                    wait,
                })
            }
        }
    }
}
