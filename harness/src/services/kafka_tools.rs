//! Kafka access through the Kafka CLI tools
//!
//! Topic administration runs `kafka-topics` inside the broker container.
//! Consumption runs `kcat` in a throw-away container on the host network.
//! Its output is framed by explicit key and value lengths, so payloads come
//! back byte for byte whatever they contain.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::error::{BackendError, BackendResult};
use crate::services::command::ComposeCommand;
use crate::traits::{
    AttachedContainer, BrokerConsumer, CollectedMessage, ContainerRuntime, CoordinationClient, CoordinationConnector,
    OutputStream, StartOffset, Subscription, TopicMetadata,
};

/// Zookeeper address as seen from inside the compose network
const INTERNAL_ZOOKEEPER: &str = "zookeeper:2181";

/// `partition offset key-length value-length`, a newline, then the raw key
/// and value bytes. A length of -1 marks a null key or value.
const KCAT_FORMAT: &str = "%p %o %K %S\\n%k%s";

pub struct KafkaTopicsConnector {
    compose: ComposeCommand,
}

impl KafkaTopicsConnector {
    pub fn new(compose: ComposeCommand) -> Self {
        Self { compose }
    }
}

#[async_trait]
impl CoordinationConnector for KafkaTopicsConnector {
    async fn connect(&self, hostport: &str) -> BackendResult<Arc<dyn CoordinationClient>> {
        // The tools talk to zookeeper from inside the network; the published
        // port must still answer before the client counts as connected.
        TcpStream::connect(hostport)
            .await
            .map_err(|e| BackendError::connection(format!("{hostport}: {e}")))?;

        info!(zookeeper = hostport, "🔗 Connected to zookeeper at {}", hostport);
        Ok(Arc::new(KafkaTopicsClient {
            compose: self.compose.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct KafkaTopicsClient {
    compose: ComposeCommand,
    closed: AtomicBool,
}

impl KafkaTopicsClient {
    async fn kafka_topics(&self, args: Vec<String>) -> BackendResult<String> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed {
                what: "coordination client".to_string(),
            });
        }

        let mut command = vec![
            "exec".to_string(),
            "-T".to_string(),
            "kafka".to_string(),
            "kafka-topics".to_string(),
            "--zookeeper".to_string(),
            INTERNAL_ZOOKEEPER.to_string(),
        ];
        command.extend(args);
        let output = self.compose.run(command).await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl CoordinationClient for KafkaTopicsClient {
    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u32,
        config: BTreeMap<String, String>,
    ) -> BackendResult<()> {
        let mut args = vec![
            "--create".to_string(),
            "--topic".to_string(),
            name.to_string(),
            "--partitions".to_string(),
            partitions.to_string(),
            "--replication-factor".to_string(),
            replication_factor.to_string(),
        ];
        for (key, value) in config {
            args.push("--config".to_string());
            args.push(format!("{key}={value}"));
        }

        self.kafka_topics(args).await?;
        info!(topic = name, partitions, "📝 Created topic {}", name);
        Ok(())
    }

    async fn topics(&self) -> BackendResult<BTreeMap<String, TopicMetadata>> {
        let output = self.kafka_topics(vec!["--describe".to_string()]).await?;
        parse_topic_descriptions(&output)
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Split a `kafka-topics --describe` line into its `key:value` fields
///
/// Older tools print `Topic:users`, newer ones `Topic: users`.
fn describe_fields(line: &str) -> BTreeMap<&str, &str> {
    line.split('\t')
        .filter_map(|field| field.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

fn parse_topic_descriptions(output: &str) -> BackendResult<BTreeMap<String, TopicMetadata>> {
    let mut topics = BTreeMap::new();

    // Per-partition lines carry no PartitionCount and are skipped
    for line in output.lines().filter(|line| line.contains("PartitionCount")) {
        let fields = describe_fields(line);
        let unexpected = || BackendError::unexpected_output("kafka-topics --describe", line.trim());

        let name = fields.get("Topic").filter(|name| !name.is_empty()).ok_or_else(unexpected)?;
        let partitions = fields
            .get("PartitionCount")
            .and_then(|count| count.parse().ok())
            .ok_or_else(unexpected)?;
        let replication_factor = fields
            .get("ReplicationFactor")
            .and_then(|factor| factor.parse().ok())
            .ok_or_else(unexpected)?;
        let config: BTreeMap<String, String> = fields
            .get("Configs")
            .map(|configs| {
                configs
                    .split(',')
                    .filter_map(|pair| pair.split_once('='))
                    .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
                    .collect()
            })
            .unwrap_or_default();

        topics.insert(
            name.to_string(),
            TopicMetadata {
                name: name.to_string(),
                partitions,
                replication_factor,
                config,
            },
        );
    }

    Ok(topics)
}

/// Subscribes by running `kcat` as a balanced consumer
///
/// The container is named after the consumer group, which is fresh for
/// every subscription, so it can be removed by name on release.
pub struct KcatConsumer {
    runtime: Arc<dyn ContainerRuntime>,
    image: String,
}

impl KcatConsumer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, image: impl Into<String>) -> Self {
        Self {
            runtime,
            image: image.into(),
        }
    }

    fn command(endpoint: &str, group: &str, topics: &[String], start: StartOffset) -> Vec<String> {
        let reset = match start {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        };
        // -G consumes the rest of the arguments as topics, so it goes last
        let mut command = vec![
            "-b".to_string(),
            endpoint.to_string(),
            "-X".to_string(),
            format!("auto.offset.reset={reset}"),
            "-f".to_string(),
            KCAT_FORMAT.to_string(),
            "-u".to_string(),
            "-q".to_string(),
            "-G".to_string(),
            group.to_string(),
        ];
        command.extend(topics.iter().cloned());
        command
    }
}

#[async_trait]
impl BrokerConsumer for KcatConsumer {
    async fn subscribe(
        &self,
        endpoint: &str,
        group: &str,
        topics: Vec<String>,
        start: StartOffset,
    ) -> BackendResult<Box<dyn Subscription>> {
        debug!(endpoint, group, topics = ?topics, "📥 Starting kcat consumer");

        let container = AttachedContainer {
            name: group.to_string(),
            image: self.image.clone(),
            command: Self::command(endpoint, group, &topics, start),
            host_network: true,
        };
        let output = self.runtime.run_attached(container).await?;

        Ok(Box::new(KcatSubscription {
            runtime: Arc::clone(&self.runtime),
            container: group.to_string(),
            output,
            frames: FrameDecoder::default(),
            released: false,
        }))
    }
}

pub struct KcatSubscription {
    runtime: Arc<dyn ContainerRuntime>,
    container: String,
    output: OutputStream,
    frames: FrameDecoder,
    released: bool,
}

#[async_trait]
impl Subscription for KcatSubscription {
    async fn next_message(&mut self) -> Option<BackendResult<CollectedMessage>> {
        loop {
            match self.frames.next_frame() {
                Ok(Some(message)) => return Some(Ok(message)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }

            match self.output.next().await {
                Some(Ok(chunk)) => self.frames.push(&chunk),
                Some(Err(e)) => return Some(Err(e)),
                // A partial frame left in the buffer is dropped
                None => return None,
            }
        }
    }

    fn interrupt(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }

        let runtime = Arc::clone(&self.runtime);
        let container = self.container.clone();
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match runtime.remove(&container).await {
                        Ok(()) => debug!(container = %container, "🧹 Removed consumer container"),
                        Err(e) => warn!(container = %container, "⚠️ Could not remove consumer container: {}", e),
                    }
                });
            }
            Err(_) => warn!(
                container = %self.container,
                "⚠️ No async runtime to remove consumer container {}", self.container
            ),
        }
    }
}

impl Drop for KcatSubscription {
    fn drop(&mut self) {
        self.interrupt();
    }
}

/// Reassembles length-prefixed messages from arbitrarily split output
#[derive(Debug, Default)]
struct FrameDecoder {
    buffer: Vec<u8>,
}

struct FrameHeader {
    partition: i32,
    offset: i64,
    key_len: Option<usize>,
    value_len: Option<usize>,
}

impl FrameDecoder {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// The next complete message, or `None` until more bytes arrive
    fn next_frame(&mut self) -> BackendResult<Option<CollectedMessage>> {
        // Whole frames are consumed, so the first newline ends a header
        let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') else {
            return Ok(None);
        };
        let header = parse_frame_header(&self.buffer[..newline])?;

        let key_start = newline + 1;
        let value_start = key_start + header.key_len.unwrap_or(0);
        let end = value_start + header.value_len.unwrap_or(0);
        if self.buffer.len() < end {
            return Ok(None);
        }

        let message = CollectedMessage {
            key: header.key_len.map(|_| self.buffer[key_start..value_start].to_vec()),
            value: header.value_len.map(|_| self.buffer[value_start..end].to_vec()),
            partition: header.partition,
            offset: header.offset,
        };
        self.buffer.drain(..end);
        Ok(Some(message))
    }
}

fn parse_frame_header(line: &[u8]) -> BackendResult<FrameHeader> {
    let unexpected = || BackendError::unexpected_output("kcat", String::from_utf8_lossy(line));

    let text = std::str::from_utf8(line).map_err(|_| unexpected())?;
    let fields: Vec<&str> = text.trim().split(' ').collect();
    let &[partition, offset, key_len, value_len] = fields.as_slice() else {
        return Err(unexpected());
    };

    // -1 is a null; any other negative length is garbage
    let length = |field: &str| -> BackendResult<Option<usize>> {
        match field.parse::<i64>().map_err(|_| unexpected())? {
            -1 => Ok(None),
            len => usize::try_from(len).map(Some).map_err(|_| unexpected()),
        }
    };

    Ok(FrameHeader {
        partition: partition.parse().map_err(|_| unexpected())?,
        offset: offset.parse().map_err(|_| unexpected())?,
        key_len: length(key_len)?,
        value_len: length(value_len)?,
    })
}
