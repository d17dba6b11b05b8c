//! Concrete collaborators for a local docker setup

pub mod command;
pub mod compose;
pub mod docker;
pub mod kafka_tools;
pub mod postgres;
pub mod schema_registry;

use std::sync::Arc;

pub use command::ComposeCommand;
pub use compose::ComposeSupervisor;
pub use docker::DockerApi;
pub use kafka_tools::{KafkaTopicsConnector, KcatConsumer};
pub use postgres::PsqlConnector;
pub use schema_registry::HttpSchemaRegistryConnector;

use crate::config::HarnessSettings;
use crate::error::BackendResult;
use crate::traits::{
    BrokerConsumer, ContainerRuntime, CoordinationConnector, DatabaseConnector, SchemaRegistryConnector,
    ServiceSupervisor,
};

/// Every collaborator the cluster talks to
#[derive(Clone)]
pub struct Backends {
    pub supervisor: Arc<dyn ServiceSupervisor>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub database: Arc<dyn DatabaseConnector>,
    pub coordination: Arc<dyn CoordinationConnector>,
    pub schema_registry: Arc<dyn SchemaRegistryConnector>,
    pub consumer: Arc<dyn BrokerConsumer>,
}

impl Backends {
    /// Collaborators backed by the local docker daemon plus the compose,
    /// Postgres and Kafka CLI tools
    pub fn docker(settings: &HarnessSettings) -> BackendResult<Self> {
        let compose = ComposeCommand::from_settings(settings);
        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerApi::connect()?);
        Ok(Self {
            supervisor: Arc::new(ComposeSupervisor::new(compose.clone())),
            runtime: Arc::clone(&runtime),
            database: Arc::new(PsqlConnector::new()),
            coordination: Arc::new(KafkaTopicsConnector::new(compose)),
            schema_registry: Arc::new(HttpSchemaRegistryConnector::new()),
            consumer: Arc::new(KcatConsumer::new(runtime, settings.consumer_image.clone())),
        })
    }
}
