//! Trait definitions with mockall annotations for testing
//!
//! Every external collaborator of the cluster sits behind one of these
//! traits: the compose supervisor, the container runtime, and the clients
//! for Postgres, the Kafka coordination layer, the schema registry and the
//! Kafka consumer. The concrete implementations live in [`crate::services`].

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use shared::ServiceName;

use crate::error::BackendResult;

/// Options for bringing services up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpOptions {
    pub detached: bool,
    pub no_deps: bool,
}

impl Default for UpOptions {
    fn default() -> Self {
        Self {
            detached: true,
            no_deps: true,
        }
    }
}

/// Options for removing stopped services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub volumes: bool,
}

/// Container state as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub exit_code: i64,
}

impl ContainerInfo {
    /// Stopped with a non-zero exit code
    pub fn has_failed(&self) -> bool {
        !self.running && self.exit_code != 0
    }
}

/// Captured output of a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: String,
    pub stderr: String,
}

/// A message read back from a broker topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedMessage {
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub partition: i32,
    pub offset: i64,
}

/// Topic metadata as known to the coordination service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
    pub config: BTreeMap<String, String>,
}

/// A long-running container whose stdout is streamed back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedContainer {
    /// Container name, also the handle used to remove it
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// Run on the host network instead of the default bridge
    pub host_network: bool,
}

/// Raw stdout chunks of an attached container, in arrival order
pub type OutputStream = BoxStream<'static, BackendResult<Vec<u8>>>;

/// Where a new subscription starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    Earliest,
    Latest,
}

/// Starts, stops and locates the services of the compose project
#[mockall::automock]
#[async_trait::async_trait]
pub trait ServiceSupervisor: Send + Sync {
    /// Bring the given services up with the given environment
    async fn up(
        &self,
        services: Vec<ServiceName>,
        env: BTreeMap<String, String>,
        options: UpOptions,
    ) -> BackendResult<()>;

    /// Stop every service of the project
    async fn stop(&self) -> BackendResult<()>;

    /// Remove stopped services (and optionally their volumes)
    async fn remove(&self, options: RemoveOptions) -> BackendResult<()>;

    /// Container id of a service, if it has a container
    async fn ps(&self, service: ServiceName) -> BackendResult<Option<String>>;

    /// Container ids of every service in the project, running or not
    async fn ps_all(&self) -> BackendResult<Vec<String>>;

    /// Host `address:port` an internal service port is published on
    async fn port(&self, service: ServiceName, internal_port: u16) -> BackendResult<String>;
}

/// Inspects containers and runs throw-away ones
#[mockall::automock]
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect(&self, id: &str) -> BackendResult<ContainerInfo>;

    async fn logs(&self, id: &str) -> BackendResult<ContainerLogs>;

    /// Run `command` in a fresh container of `image` and return its stdout
    async fn run_ephemeral(&self, image: &str, command: Vec<String>) -> BackendResult<String>;

    /// Create and start a container, streaming its stdout as raw bytes
    async fn run_attached(&self, container: AttachedContainer) -> BackendResult<OutputStream>;

    /// Force-remove a container by name or id; a missing container is fine
    async fn remove(&self, name: &str) -> BackendResult<()>;
}

/// Opens connections to Postgres
#[mockall::automock]
#[async_trait::async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Whether the server accepts connections; never opens a session
    async fn ping(&self, host: &str, port: u16, user: &str) -> BackendResult<bool>;

    async fn connect(&self, host: &str, port: u16, user: &str) -> BackendResult<Arc<dyn DatabaseHandle>>;
}

/// An open Postgres session
#[mockall::automock]
#[async_trait::async_trait]
pub trait DatabaseHandle: Send + Sync {
    async fn exec(&self, sql: &str) -> BackendResult<()>;

    async fn close(&self) -> BackendResult<()>;
}

/// Opens clients for the Kafka coordination service
#[mockall::automock]
#[async_trait::async_trait]
pub trait CoordinationConnector: Send + Sync {
    async fn connect(&self, hostport: &str) -> BackendResult<Arc<dyn CoordinationClient>>;
}

/// Administrative access to broker cluster metadata
#[mockall::automock]
#[async_trait::async_trait]
pub trait CoordinationClient: Send + Sync {
    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u32,
        config: BTreeMap<String, String>,
    ) -> BackendResult<()>;

    async fn topics(&self) -> BackendResult<BTreeMap<String, TopicMetadata>>;

    async fn close(&self) -> BackendResult<()>;
}

/// Opens schema registry clients
#[mockall::automock]
#[async_trait::async_trait]
pub trait SchemaRegistryConnector: Send + Sync {
    async fn connect(&self, url: &str) -> BackendResult<Arc<dyn SchemaRegistryClient>>;
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait SchemaRegistryClient: Send + Sync {
    async fn subjects(&self) -> BackendResult<Vec<String>>;
}

/// Subscribes to broker topics
#[mockall::automock]
#[async_trait::async_trait]
pub trait BrokerConsumer: Send + Sync {
    async fn subscribe(
        &self,
        endpoint: &str,
        group: &str,
        topics: Vec<String>,
        start: StartOffset,
    ) -> BackendResult<Box<dyn Subscription>>;
}

/// A live subscription yielding messages in arrival order
///
/// `None` means the subscription ended. `interrupt` stops it, releases
/// whatever it holds on the broker side, and must be safe to call more than
/// once.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Subscription: Send {
    async fn next_message(&mut self) -> Option<BackendResult<CollectedMessage>>;

    fn interrupt(&mut self);
}
