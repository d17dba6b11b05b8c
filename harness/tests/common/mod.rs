//! In-memory collaborators for lifecycle tests
//!
//! All fakes share one [`World`] so a test can script failures up front and
//! inspect what the cluster did afterwards. Zookeeper and kafka get real
//! loopback listeners because the cluster checks them over TCP.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::TcpListener;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use harness::traits::{
    AttachedContainer, BrokerConsumer, CollectedMessage, ContainerInfo, ContainerLogs, ContainerRuntime,
    CoordinationClient, CoordinationConnector, DatabaseConnector, DatabaseHandle, OutputStream, RemoveOptions,
    SchemaRegistryClient, SchemaRegistryConnector, ServiceSupervisor, StartOffset, Subscription, TopicMetadata,
    UpOptions,
};
use harness::{Backends, BackendError, BackendResult, HarnessSettings, ServiceName, TestCluster};

pub const DOCKER_HOST_IP: &str = "172.17.0.1";
pub const POSTGRES_MAPPED_PORT: u16 = 32768;
pub const SCHEMA_REGISTRY_MAPPED_PORT: u16 = 32770;

#[derive(Default)]
pub struct World {
    /// Ordered record of what happened: `up:...`, `sql:...`, `stop`, `rm`
    pub events: Vec<String>,
    pub envs: Vec<BTreeMap<String, String>>,
    pub running: BTreeSet<ServiceName>,
    pub crashed: BTreeMap<ServiceName, (i64, ContainerLogs)>,
    pub crash_on_up: BTreeMap<ServiceName, (i64, ContainerLogs)>,
    pub ports: BTreeMap<ServiceName, u16>,

    pub up_failures: u32,
    pub ping_failures: u32,
    pub ping_calls: u32,
    pub db_close_fails: bool,
    pub db_closed: bool,
    pub coordination_closed: bool,

    pub topics: BTreeMap<String, Vec<CollectedMessage>>,
    pub created_topics: BTreeMap<String, TopicMetadata>,
    pub subscriptions: Vec<(String, String)>,
    pub interrupts: usize,
}

impl World {
    pub fn up_calls(&self) -> Vec<String> {
        self.events
            .iter()
            .filter(|event| event.starts_with("up:"))
            .cloned()
            .collect()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|e| e.as_str() == event).count()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }
}

#[derive(Clone, Default)]
pub struct SharedWorld(Arc<Mutex<World>>);

impl SharedWorld {
    pub fn lock(&self) -> MutexGuard<'_, World> {
        self.0.lock().unwrap()
    }
}

fn container_id(service: ServiceName) -> String {
    format!("{}-1", service.compose_name())
}

fn service_for_id(id: &str) -> Option<ServiceName> {
    [
        ServiceName::Zookeeper,
        ServiceName::Kafka,
        ServiceName::Postgres,
        ServiceName::SchemaRegistry,
        ServiceName::BottledWater(harness::MessageFormat::Json),
        ServiceName::BottledWater(harness::MessageFormat::Avro),
    ]
    .into_iter()
    .find(|service| container_id(*service) == id)
}

pub struct FakeSupervisor(pub SharedWorld);

#[async_trait]
impl ServiceSupervisor for FakeSupervisor {
    async fn up(
        &self,
        services: Vec<ServiceName>,
        env: BTreeMap<String, String>,
        _options: UpOptions,
    ) -> BackendResult<()> {
        let mut world = self.0.lock();
        if world.up_failures > 0 {
            world.up_failures -= 1;
            return Err(BackendError::connection("docker daemon not responding"));
        }

        let names: Vec<String> = services.iter().map(ServiceName::compose_name).collect();
        world.events.push(format!("up:{}", names.join(",")));
        world.envs.push(env);
        for service in services {
            match world.crash_on_up.get(&service).cloned() {
                Some(crash) => {
                    world.crashed.insert(service, crash);
                }
                None => {
                    world.running.insert(service);
                }
            }
        }
        Ok(())
    }

    async fn stop(&self) -> BackendResult<()> {
        let mut world = self.0.lock();
        world.events.push("stop".to_string());
        world.running.clear();
        Ok(())
    }

    async fn remove(&self, options: RemoveOptions) -> BackendResult<()> {
        let mut world = self.0.lock();
        assert!(options.force && options.volumes, "teardown removes volumes too");
        world.events.push("rm".to_string());
        world.crashed.clear();
        Ok(())
    }

    async fn ps(&self, service: ServiceName) -> BackendResult<Option<String>> {
        let world = self.0.lock();
        let exists = world.running.contains(&service) || world.crashed.contains_key(&service);
        Ok(exists.then(|| container_id(service)))
    }

    async fn ps_all(&self) -> BackendResult<Vec<String>> {
        let world = self.0.lock();
        Ok(world
            .running
            .iter()
            .chain(world.crashed.keys())
            .map(|service| container_id(*service))
            .collect())
    }

    async fn port(&self, service: ServiceName, _internal_port: u16) -> BackendResult<String> {
        let world = self.0.lock();
        match world.ports.get(&service) {
            Some(port) if world.running.contains(&service) => Ok(format!("0.0.0.0:{port}")),
            _ => Err(BackendError::CommandFailed {
                program: "docker".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("no container found for {service}"),
            }),
        }
    }
}

pub struct FakeRuntime(pub SharedWorld);

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect(&self, id: &str) -> BackendResult<ContainerInfo> {
        let world = self.0.lock();
        let service = service_for_id(id).ok_or_else(|| BackendError::unexpected_output("docker inspect", id))?;
        let exit_code = world.crashed.get(&service).map(|(code, _)| *code).unwrap_or(0);
        Ok(ContainerInfo {
            id: id.to_string(),
            name: id.to_string(),
            running: world.running.contains(&service),
            exit_code,
        })
    }

    async fn logs(&self, id: &str) -> BackendResult<ContainerLogs> {
        let world = self.0.lock();
        service_for_id(id)
            .and_then(|service| world.crashed.get(&service))
            .map(|(_, logs)| logs.clone())
            .ok_or_else(|| BackendError::connection("no such container"))
    }

    async fn run_ephemeral(&self, image: &str, command: Vec<String>) -> BackendResult<String> {
        assert_eq!(image, "debian:latest");
        assert_eq!(command, ["ip", "route"]);
        Ok(format!(
            "default via {DOCKER_HOST_IP} dev eth0 \n172.17.0.0/16 dev eth0 scope link src 172.17.0.2\n"
        ))
    }

    async fn run_attached(&self, container: AttachedContainer) -> BackendResult<OutputStream> {
        Err(BackendError::connection(format!("no daemon to run {}", container.name)))
    }

    async fn remove(&self, _name: &str) -> BackendResult<()> {
        Ok(())
    }
}

pub struct FakeDatabase(pub SharedWorld);

#[async_trait]
impl DatabaseConnector for FakeDatabase {
    async fn ping(&self, _host: &str, port: u16, _user: &str) -> BackendResult<bool> {
        let mut world = self.0.lock();
        assert_eq!(port, POSTGRES_MAPPED_PORT);
        world.ping_calls += 1;
        if world.ping_failures > 0 {
            world.ping_failures -= 1;
            return Ok(false);
        }
        Ok(world.running.contains(&ServiceName::Postgres))
    }

    async fn connect(&self, _host: &str, _port: u16, _user: &str) -> BackendResult<Arc<dyn DatabaseHandle>> {
        self.0.lock().db_closed = false;
        Ok(Arc::new(FakeDatabaseHandle(self.0.clone())))
    }
}

pub struct FakeDatabaseHandle(pub SharedWorld);

#[async_trait]
impl DatabaseHandle for FakeDatabaseHandle {
    async fn exec(&self, sql: &str) -> BackendResult<()> {
        let mut world = self.0.lock();
        if world.db_closed {
            return Err(BackendError::Closed {
                what: "database connection".to_string(),
            });
        }
        world.events.push(format!("sql:{sql}"));
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        let mut world = self.0.lock();
        if world.db_close_fails {
            return Err(BackendError::connection("server closed the connection unexpectedly"));
        }
        world.db_closed = true;
        Ok(())
    }
}

pub struct FakeCoordination(pub SharedWorld);

#[async_trait]
impl CoordinationConnector for FakeCoordination {
    async fn connect(&self, hostport: &str) -> BackendResult<Arc<dyn CoordinationClient>> {
        let mut world = self.0.lock();
        world.events.push(format!("coordination:{hostport}"));
        world.coordination_closed = false;
        Ok(Arc::new(FakeCoordinationClient(self.0.clone())))
    }
}

pub struct FakeCoordinationClient(pub SharedWorld);

#[async_trait]
impl CoordinationClient for FakeCoordinationClient {
    async fn create_topic(
        &self,
        name: &str,
        partitions: u32,
        replication_factor: u32,
        config: BTreeMap<String, String>,
    ) -> BackendResult<()> {
        let mut world = self.0.lock();
        if world.coordination_closed {
            return Err(BackendError::Closed {
                what: "coordination client".to_string(),
            });
        }
        if world.created_topics.contains_key(name) || world.topics.contains_key(name) {
            return Err(BackendError::CommandFailed {
                program: "kafka-topics".to_string(),
                status: "exit status: 1".to_string(),
                stderr: format!("Topic '{name}' already exists."),
            });
        }
        world.events.push(format!("create_topic:{name}"));
        world.created_topics.insert(
            name.to_string(),
            TopicMetadata {
                name: name.to_string(),
                partitions,
                replication_factor,
                config,
            },
        );
        Ok(())
    }

    async fn topics(&self) -> BackendResult<BTreeMap<String, TopicMetadata>> {
        let world = self.0.lock();
        if world.coordination_closed {
            return Err(BackendError::Closed {
                what: "coordination client".to_string(),
            });
        }
        // Topics that only have messages were auto-created with defaults
        let mut topics: BTreeMap<String, TopicMetadata> = world
            .topics
            .keys()
            .map(|name| {
                let metadata = TopicMetadata {
                    name: name.clone(),
                    partitions: 1,
                    replication_factor: 1,
                    config: BTreeMap::new(),
                };
                (name.clone(), metadata)
            })
            .collect();
        topics.extend(world.created_topics.clone());
        Ok(topics)
    }

    async fn close(&self) -> BackendResult<()> {
        self.0.lock().coordination_closed = true;
        Ok(())
    }
}

pub struct FakeSchemaRegistry(pub SharedWorld);

#[async_trait]
impl SchemaRegistryConnector for FakeSchemaRegistry {
    async fn connect(&self, url: &str) -> BackendResult<Arc<dyn SchemaRegistryClient>> {
        assert_eq!(url, format!("http://127.0.0.1:{SCHEMA_REGISTRY_MAPPED_PORT}"));
        Ok(Arc::new(FakeSchemaRegistryClient(self.0.clone())))
    }
}

pub struct FakeSchemaRegistryClient(pub SharedWorld);

#[async_trait]
impl SchemaRegistryClient for FakeSchemaRegistryClient {
    async fn subjects(&self) -> BackendResult<Vec<String>> {
        if self.0.lock().running.contains(&ServiceName::SchemaRegistry) {
            Ok(Vec::new())
        } else {
            Err(BackendError::connection("connection refused"))
        }
    }
}

pub struct FakeConsumer(pub SharedWorld);

#[async_trait]
impl BrokerConsumer for FakeConsumer {
    async fn subscribe(
        &self,
        endpoint: &str,
        group: &str,
        topics: Vec<String>,
        start: StartOffset,
    ) -> BackendResult<Box<dyn Subscription>> {
        assert_eq!(start, StartOffset::Earliest);
        let mut world = self.0.lock();
        world.subscriptions.push((endpoint.to_string(), group.to_string()));

        let queue: VecDeque<CollectedMessage> = topics
            .iter()
            .flat_map(|topic| world.topics.get(topic).cloned().unwrap_or_default())
            .collect();
        Ok(Box::new(FakeSubscription {
            world: self.0.clone(),
            queue,
        }))
    }
}

/// Yields the preloaded messages, then waits forever like a live topic
pub struct FakeSubscription {
    world: SharedWorld,
    queue: VecDeque<CollectedMessage>,
}

#[async_trait]
impl Subscription for FakeSubscription {
    async fn next_message(&mut self) -> Option<BackendResult<CollectedMessage>> {
        match self.queue.pop_front() {
            Some(message) => Some(Ok(message)),
            None => std::future::pending().await,
        }
    }

    fn interrupt(&mut self) {
        self.world.lock().interrupts += 1;
    }
}

pub fn message(partition: i32, offset: i64, value: &str) -> CollectedMessage {
    CollectedMessage {
        key: Some(offset.to_string().into_bytes()),
        value: Some(value.as_bytes().to_vec()),
        partition,
        offset,
    }
}

pub fn settings() -> HarnessSettings {
    HarnessSettings::builder()
        .host("127.0.0.1")
        .poll_interval(Duration::from_millis(1))
        .settle_delay(Duration::ZERO)
        .build()
}

/// A cluster wired to fakes, with listeners standing in for zookeeper and kafka
pub struct TestBed {
    pub world: SharedWorld,
    pub cluster: TestCluster,
    _listeners: Vec<TcpListener>,
}

impl TestBed {
    pub fn new() -> Self {
        let world = SharedWorld::default();

        let mut listeners = Vec::new();
        {
            let mut state = world.lock();
            for service in [ServiceName::Zookeeper, ServiceName::Kafka] {
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                state.ports.insert(service, listener.local_addr().unwrap().port());
                listeners.push(listener);
            }
            state.ports.insert(ServiceName::Postgres, POSTGRES_MAPPED_PORT);
            state.ports.insert(ServiceName::SchemaRegistry, SCHEMA_REGISTRY_MAPPED_PORT);
        }

        let backends = Backends {
            supervisor: Arc::new(FakeSupervisor(world.clone())),
            runtime: Arc::new(FakeRuntime(world.clone())),
            database: Arc::new(FakeDatabase(world.clone())),
            coordination: Arc::new(FakeCoordination(world.clone())),
            schema_registry: Arc::new(FakeSchemaRegistry(world.clone())),
            consumer: Arc::new(FakeConsumer(world.clone())),
        };

        Self {
            world,
            cluster: TestCluster::new(settings(), backends),
            _listeners: listeners,
        }
    }

    pub fn port_of(&self, service: ServiceName) -> u16 {
        self.world.lock().ports[&service]
    }
}
