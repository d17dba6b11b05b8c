//! Test cluster lifecycle
//!
//! Brings the compose project up in dependency order, hands out clients for
//! the started services and tears everything down again. One `TestCluster`
//! drives one project; `start`/`stop`/`restart` take `&mut self`, so calls
//! cannot overlap.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use shared::logging::log_startup;
use shared::{ServiceName, service_warn};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{ClusterConfig, HarnessSettings};
use crate::error::{BackendError, BackendResult, ClusterError, ClusterResult};
use crate::runtime::collector::{CollectedMessages, MessageCollector};
use crate::runtime::diagnostics::ContainerDiagnostics;
use crate::runtime::hooks::ServiceHooks;
use crate::runtime::readiness::{ProbeError, ProbeResult, ReadinessPoller};
use crate::runtime::retry::RetryPolicy;
use crate::services::Backends;
use crate::state::ClusterState;
use crate::traits::{
    CollectedMessage, ContainerInfo, CoordinationClient, DatabaseHandle, RemoveOptions, SchemaRegistryClient,
    UpOptions,
};

pub const POSTGRES_PORT: u16 = 5432;
pub const ZOOKEEPER_PORT: u16 = 2181;
pub const KAFKA_PORT: u16 = 9092;
pub const SCHEMA_REGISTRY_PORT: u16 = 8081;

const POSTGRES_TRIES: u32 = 10;
const TCP_PORT_TRIES: u32 = 5;
const SCHEMA_REGISTRY_TRIES: u32 = 10;
const CONTAINER_TRIES: u32 = 5;

/// How `stop` tears the cluster down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOptions {
    /// Restore the cluster configuration to defaults afterwards
    pub should_reset: bool,
    /// Log output of containers that exited with a non-zero code
    pub dump_logs: bool,
}

impl Default for StopOptions {
    fn default() -> Self {
        Self {
            should_reset: true,
            dump_logs: true,
        }
    }
}

#[derive(Default)]
struct Handles {
    postgres: Option<Arc<dyn DatabaseHandle>>,
    coordination: Option<Arc<dyn CoordinationClient>>,
    schema_registry: Option<Arc<dyn SchemaRegistryClient>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct MappedPorts {
    postgres: Option<u16>,
    zookeeper: Option<u16>,
    kafka: Option<u16>,
    schema_registry: Option<u16>,
}

pub struct TestCluster {
    settings: HarnessSettings,
    config: ClusterConfig,
    state: ClusterState,
    started_without: BTreeSet<ServiceName>,
    docker_host_ip: Option<String>,

    backends: Backends,
    retry: RetryPolicy,
    hooks: ServiceHooks,

    handles: Handles,
    ports: MappedPorts,
}

impl TestCluster {
    pub fn new(settings: HarnessSettings, backends: Backends) -> Self {
        let retry = RetryPolicy::new(settings.api_retries);
        Self {
            settings,
            config: ClusterConfig::default(),
            state: ClusterState::default(),
            started_without: BTreeSet::new(),
            docker_host_ip: None,
            backends,
            retry,
            hooks: ServiceHooks::new(),
            handles: Handles::default(),
            ports: MappedPorts::default(),
        }
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == ClusterState::Started
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.settings
    }

    /// Services deliberately left out of the current start cycle
    pub fn started_without(&self) -> &BTreeSet<ServiceName> {
        &self.started_without
    }

    /// The application service for the configured format
    pub fn app_service(&self) -> ServiceName {
        self.config.app_service()
    }

    /// Change the configuration for the next start cycle
    pub fn configure<F>(&mut self, update: F) -> ClusterResult<()>
    where
        F: FnOnce(&mut ClusterConfig),
    {
        if self.state.is_active() {
            return Err(ClusterError::InvalidStateTransition {
                operation: "configure",
                state: self.state,
            });
        }
        update(&mut self.config);
        Ok(())
    }

    /// Restore the default configuration and forget excluded services
    pub fn reset(&mut self) -> ClusterResult<()> {
        if self.state == ClusterState::Starting {
            return Err(ClusterError::InvalidStateTransition {
                operation: "reset",
                state: self.state,
            });
        }
        self.config = ClusterConfig::default();
        self.started_without.clear();
        Ok(())
    }

    /// Run `hook` against the database right before `service` is launched
    ///
    /// Hooks for the zookeeper, kafka and postgres services run as soon as
    /// the database is ready, since those start together. A hook runs at
    /// most once and is dropped by `stop` if its service never launched.
    pub fn before_service<F, Fut>(
        &mut self,
        service: ServiceName,
        description: impl Into<String>,
        hook: F,
    ) -> ClusterResult<()>
    where
        F: FnOnce(Arc<dyn DatabaseHandle>) -> Fut + Send + 'static,
        Fut: Future<Output = BackendResult<()>> + Send + 'static,
    {
        if self.state.is_active() {
            return Err(ClusterError::InvalidStateTransition {
                operation: "register a before-service hook",
                state: self.state,
            });
        }
        self.hooks.register(service, description, hook)
    }

    /// Bring up every service not listed in `without`
    ///
    /// On failure the cluster stays `Starting`: inspect it with
    /// [`failed_service_logs`](Self::failed_service_logs), then `stop` it.
    pub async fn start<I>(&mut self, without: I) -> ClusterResult<()>
    where
        I: IntoIterator<Item = ServiceName>,
    {
        if self.state.is_active() {
            return Err(ClusterError::InvalidStateTransition {
                operation: "start",
                state: self.state,
            });
        }

        self.state = ClusterState::Starting;
        self.started_without = without.into_iter().collect();
        self.ports = MappedPorts::default();

        if self.started_without.is_empty() {
            info!(format = %self.config.format, "🚀 Starting cluster");
        } else {
            let skipped: Vec<String> = self.started_without.iter().map(ToString::to_string).collect();
            info!(format = %self.config.format, without = ?skipped, "🚀 Starting cluster without {}", skipped.join(", "));
        }

        let poller = self.poller();

        self.docker_host_ip = Some(self.detect_docker_host_ip().await?);

        self.start_services(&ServiceName::BASE).await?;

        let postgres_port = self.wait_for_postgres(&poller).await?;
        self.ports.postgres = Some(postgres_port);
        let database = self.open_database(postgres_port).await?;
        self.handles.postgres = Some(Arc::clone(&database));

        for service in ServiceName::BASE {
            if !self.started_without.contains(&service) {
                self.hooks.run(service, &database).await?;
            }
        }

        if !self.started_without.contains(&ServiceName::Kafka) {
            let zookeeper_port = self.wait_for_tcp_port(&poller, ServiceName::Zookeeper, ZOOKEEPER_PORT).await?;
            self.ports.zookeeper = Some(zookeeper_port);

            let hostport = format!("{}:{}", self.settings.host, zookeeper_port);
            let coordination = &self.backends.coordination;
            let hostport_ref = hostport.as_str();
            let client = self
                .retry
                .call("CoordinationConnector", "connect", move || coordination.connect(hostport_ref))
                .await?;
            self.handles.coordination = Some(client);

            let kafka_port = self.wait_for_tcp_port(&poller, ServiceName::Kafka, KAFKA_PORT).await?;
            self.ports.kafka = Some(kafka_port);
        }

        if self.schema_registry_needed() {
            self.hooks.run(ServiceName::SchemaRegistry, &database).await?;
            self.start_services(&[ServiceName::SchemaRegistry]).await?;

            let (port, client) = self.wait_for_schema_registry(&poller).await?;
            self.ports.schema_registry = Some(port);
            self.handles.schema_registry = Some(client);
        }

        let app = self.app_service();
        if !self.started_without.contains(&app) {
            self.hooks.run(app, &database).await?;
            self.start_services(&[app]).await?;
            self.wait_for_container(&poller, app).await?;
        }

        let settle = self.settings.settle_delay;
        if !settle.is_zero() {
            info!(delay_ms = settle.as_millis() as u64, "💤 Letting things settle");
            sleep(settle).await;
        }

        self.state = ClusterState::Started;
        info!("✅ Cluster started");
        Ok(())
    }

    /// Tear the cluster down; never fails
    ///
    /// Client handles are closed best-effort. Supervisor failures are
    /// logged and otherwise ignored so teardown always completes.
    pub async fn stop(&mut self, options: StopOptions) {
        if self.state == ClusterState::Stopped {
            debug!("Cluster already stopped");
            return;
        }

        info!(state = %self.state, "🛑 Stopping cluster");

        self.close_handles().await;

        let discarded = self.hooks.clear();
        if discarded > 0 {
            warn!(discarded, "🪝 Discarding {} before-service hook(s) that never ran", discarded);
        }

        if options.dump_logs {
            match self.failed_service_logs().await {
                Ok(failed) => failed.iter().for_each(ContainerDiagnostics::log),
                Err(e) => warn!(error = %e, "⚠️ Could not collect logs of failed containers: {}", e),
            }
        }

        let supervisor = &self.backends.supervisor;
        if let Err(e) = self.retry.call("ServiceSupervisor", "stop", move || supervisor.stop()).await {
            warn!(error = %e, "⚠️ Failed to stop services: {}", e);
        }

        let remove = RemoveOptions {
            force: true,
            volumes: true,
        };
        if let Err(e) = self
            .retry
            .call("ServiceSupervisor", "remove", move || supervisor.remove(remove))
            .await
        {
            warn!(error = %e, "⚠️ Failed to remove containers: {}", e);
        }

        self.ports = MappedPorts::default();
        self.docker_host_ip = None;
        self.started_without.clear();
        if options.should_reset {
            self.config = ClusterConfig::default();
        }

        self.state = ClusterState::Stopped;
        info!("🏁 Cluster stopped");
    }

    /// Stop without resetting the configuration, then start again
    pub async fn restart(&mut self, options: StopOptions) -> ClusterResult<()> {
        self.stop(StopOptions {
            should_reset: false,
            ..options
        })
        .await;
        self.start(std::iter::empty()).await
    }

    /// Both the database and the application are running
    pub async fn healthy(&self) -> ClusterResult<bool> {
        Ok(self.postgres_running().await? && self.app_running().await?)
    }

    pub async fn postgres_running(&self) -> ClusterResult<bool> {
        self.service_running(ServiceName::Postgres).await
    }

    pub async fn app_running(&self) -> ClusterResult<bool> {
        self.service_running(self.app_service()).await
    }

    /// Whether the supervisor reports a running container for `service`
    pub async fn service_running(&self, service: ServiceName) -> ClusterResult<bool> {
        self.check_active()?;
        Ok(self
            .find_container(service)
            .await?
            .is_some_and(|container| container.running))
    }

    /// Wait for `service` the way `start` does
    ///
    /// Fails with [`ClusterError::DeliberateExclusion`] for services the
    /// current cycle was started without.
    pub async fn wait_until_ready(&self, service: ServiceName) -> ClusterResult<()> {
        self.check_active()?;
        let poller = self.poller();

        match service {
            ServiceName::Postgres => self.wait_for_postgres(&poller).await.map(drop),
            ServiceName::Zookeeper => self.wait_for_tcp_port(&poller, service, ZOOKEEPER_PORT).await.map(drop),
            ServiceName::Kafka => self.wait_for_tcp_port(&poller, service, KAFKA_PORT).await.map(drop),
            ServiceName::SchemaRegistry => self.wait_for_schema_registry(&poller).await.map(drop),
            ServiceName::BottledWater(_) => self.wait_for_container(&poller, service).await.map(drop),
        }
    }

    pub fn postgres(&self) -> ClusterResult<Arc<dyn DatabaseHandle>> {
        self.check_started()?;
        self.handles.postgres.clone().ok_or(ClusterError::ServiceNotRunning {
            service: ServiceName::Postgres,
        })
    }

    pub fn postgres_port(&self) -> ClusterResult<u16> {
        self.check_started()?;
        self.ports.postgres.ok_or(ClusterError::ServiceNotRunning {
            service: ServiceName::Postgres,
        })
    }

    /// Administrative client for broker metadata (topics, partitions)
    pub fn coordination(&self) -> ClusterResult<Arc<dyn CoordinationClient>> {
        self.check_started()?;
        self.handles.coordination.clone().ok_or(ClusterError::ServiceNotRunning {
            service: ServiceName::Zookeeper,
        })
    }

    pub fn schema_registry(&self) -> ClusterResult<Arc<dyn SchemaRegistryClient>> {
        self.check_started()?;
        self.handles.schema_registry.clone().ok_or(ClusterError::ServiceNotRunning {
            service: ServiceName::SchemaRegistry,
        })
    }

    pub fn zookeeper_hostport(&self) -> ClusterResult<String> {
        self.check_started()?;
        let port = self.ports.zookeeper.ok_or(ClusterError::ServiceNotRunning {
            service: ServiceName::Zookeeper,
        })?;
        Ok(format!("{}:{}", self.settings.host, port))
    }

    pub fn kafka_host(&self) -> ClusterResult<&str> {
        self.check_started()?;
        Ok(&self.settings.host)
    }

    /// Fails with `DeliberateExclusion` when the cycle started without the
    /// broker, which every collection goes through
    pub fn kafka_port(&self) -> ClusterResult<u16> {
        self.check_started()?;
        if self.started_without.contains(&ServiceName::Kafka) {
            return Err(ClusterError::DeliberateExclusion {
                service: ServiceName::Kafka,
            });
        }
        self.ports.kafka.ok_or(ClusterError::ServiceNotRunning {
            service: ServiceName::Kafka,
        })
    }

    pub fn kafka_hostport(&self) -> ClusterResult<String> {
        Ok(format!("{}:{}", self.kafka_host()?, self.kafka_port()?))
    }

    pub fn schema_registry_url(&self) -> ClusterResult<String> {
        self.check_started()?;
        let port = self.ports.schema_registry.ok_or(ClusterError::ServiceNotRunning {
            service: ServiceName::SchemaRegistry,
        })?;
        Ok(registry_url(&self.settings.host, port))
    }

    /// Address the broker advertises to clients outside the compose network
    pub fn docker_host_ip(&self) -> ClusterResult<&str> {
        self.check_started()?;
        self.docker_host_ip
            .as_deref()
            .ok_or(ClusterError::NotStarted { state: self.state })
    }

    /// Read `expected` messages from `topic`, from the earliest offset
    pub async fn collect(&self, topic: &str, expected: usize, wait: Duration) -> ClusterResult<Vec<CollectedMessage>> {
        self.collector()?.collect(topic, expected, wait).await
    }

    /// Like [`collect`](Self::collect), grouped by partition
    pub async fn collect_partitioned(
        &self,
        topic: &str,
        expected: usize,
        wait: Duration,
    ) -> ClusterResult<BTreeMap<i32, Vec<CollectedMessage>>> {
        self.collector()?.collect_partitioned(topic, expected, wait).await
    }

    pub async fn collect_messages(
        &self,
        topic: &str,
        expected: usize,
        wait: Duration,
        collect_partitions: bool,
    ) -> ClusterResult<CollectedMessages> {
        self.collector()?
            .collect_messages(topic, expected, wait, collect_partitions)
            .await
    }

    /// Output of every project container that exited with a non-zero code
    ///
    /// Containers whose logs cannot be captured are skipped with a warning.
    pub async fn failed_service_logs(&self) -> ClusterResult<Vec<ContainerDiagnostics>> {
        let supervisor = &self.backends.supervisor;
        let runtime = &self.backends.runtime;
        let ids = self
            .retry
            .call("ServiceSupervisor", "ps_all", move || supervisor.ps_all())
            .await?;

        let mut failed = Vec::new();
        for id in ids {
            let id = id.as_str();
            let container = self
                .retry
                .call("ContainerRuntime", "inspect", move || runtime.inspect(id))
                .await?;
            if !container.has_failed() {
                continue;
            }

            match runtime.logs(&container.id).await {
                Ok(logs) => failed.push(ContainerDiagnostics::new(container, logs)),
                Err(e) => warn!(
                    container = %container.name,
                    exit_code = container.exit_code,
                    error = %e,
                    "⚠️ Failed to capture logs for container {} (exit code {})",
                    container.name,
                    container.exit_code
                ),
            }
        }
        Ok(failed)
    }

    fn collector(&self) -> ClusterResult<MessageCollector> {
        let endpoint = self.kafka_hostport()?;
        Ok(MessageCollector::new(Arc::clone(&self.backends.consumer), endpoint)
            .with_group_prefix(self.settings.consumer_group_prefix.as_str()))
    }

    fn poller(&self) -> ReadinessPoller {
        ReadinessPoller::new(self.settings.poll_interval).excluding(self.started_without.iter().copied())
    }

    fn schema_registry_needed(&self) -> bool {
        self.config.format.requires_schema_registry()
            && !self.started_without.contains(&ServiceName::SchemaRegistry)
    }

    fn check_started(&self) -> ClusterResult<()> {
        match self.state {
            ClusterState::Started => Ok(()),
            state => Err(ClusterError::NotStarted { state }),
        }
    }

    fn check_active(&self) -> ClusterResult<()> {
        if self.state.is_active() {
            Ok(())
        } else {
            Err(ClusterError::NotStarted { state: self.state })
        }
    }

    async fn detect_docker_host_ip(&self) -> ClusterResult<String> {
        let runtime = &self.backends.runtime;
        let image = self.settings.host_probe_image.as_str();
        let output = self
            .retry
            .call("ContainerRuntime", "run_ephemeral", move || {
                runtime.run_ephemeral(image, vec!["ip".to_string(), "route".to_string()])
            })
            .await?;

        let ip = parse_default_gateway(&output)
            .ok_or_else(|| BackendError::unexpected_output("ip route", output.trim()))?;
        info!(docker_host_ip = %ip, "🔎 Detected Docker host IP as {}", ip);
        Ok(ip)
    }

    async fn start_services(&self, services: &[ServiceName]) -> ClusterResult<()> {
        let to_start: Vec<ServiceName> = services
            .iter()
            .copied()
            .filter(|service| !self.started_without.contains(service))
            .collect();
        if to_start.is_empty() {
            return Ok(());
        }

        for service in &to_start {
            log_startup(service, &service.compose_name());
        }

        let env = self.config.to_env(self.docker_host_ip.as_deref());
        let supervisor = &self.backends.supervisor;
        self.retry
            .call("ServiceSupervisor", "up", move || {
                supervisor.up(to_start.clone(), env.clone(), UpOptions::default())
            })
            .await?;
        Ok(())
    }

    async fn open_database(&self, port: u16) -> ClusterResult<Arc<dyn DatabaseHandle>> {
        let host = self.settings.host.as_str();
        let user = self.settings.postgres_user.as_str();
        let database = self.backends.database.connect(host, port, user).await?;

        for extension in &self.settings.postgres_extensions {
            debug!(extension = %extension, "Installing extension {}", extension);
            database
                .exec(&format!("CREATE EXTENSION IF NOT EXISTS {extension}"))
                .await?;
        }
        Ok(database)
    }

    async fn mapped_port(&self, service: ServiceName, internal_port: u16) -> ClusterResult<u16> {
        let supervisor = &self.backends.supervisor;
        let hostport = self
            .retry
            .call("ServiceSupervisor", "port", move || supervisor.port(service, internal_port))
            .await?;
        Ok(parse_mapped_port(&hostport)?)
    }

    /// Resolve the published port of `service`, then poll `probe` against it
    async fn wait_for_port<T, F, Fut>(
        &self,
        poller: &ReadinessPoller,
        service: ServiceName,
        internal_port: u16,
        max_tries: u32,
        mut probe: F,
    ) -> ClusterResult<(u16, T)>
    where
        F: FnMut(u16) -> Fut,
        Fut: Future<Output = ProbeResult<T>>,
    {
        poller.check_not_excluded(service)?;

        let port = self.mapped_port(service, internal_port).await?;
        let message = format!("{service} on port {port}");
        let value = poller.wait_for(service, &message, max_tries, || probe(port)).await?;
        Ok((port, value))
    }

    async fn wait_for_postgres(&self, poller: &ReadinessPoller) -> ClusterResult<u16> {
        let database = &self.backends.database;
        let host = self.settings.host.as_str();
        let user = self.settings.postgres_user.as_str();

        let (port, ()) = self
            .wait_for_port(poller, ServiceName::Postgres, POSTGRES_PORT, POSTGRES_TRIES, move |port| async move {
                let accepting = database.ping(host, port, user).await?;
                Ok::<_, ProbeError>(accepting.then_some(()))
            })
            .await?;
        Ok(port)
    }

    async fn wait_for_tcp_port(
        &self,
        poller: &ReadinessPoller,
        service: ServiceName,
        internal_port: u16,
    ) -> ClusterResult<u16> {
        let host = self.settings.host.as_str();

        let (port, ()) = self
            .wait_for_port(poller, service, internal_port, TCP_PORT_TRIES, move |port| async move {
                TcpStream::connect((host, port))
                    .await
                    .map_err(|e| BackendError::connection(format!("{host}:{port}: {e}")))?;
                Ok::<_, ProbeError>(Some(()))
            })
            .await?;
        Ok(port)
    }

    async fn wait_for_schema_registry(
        &self,
        poller: &ReadinessPoller,
    ) -> ClusterResult<(u16, Arc<dyn SchemaRegistryClient>)> {
        let connector = &self.backends.schema_registry;
        let host = self.settings.host.as_str();

        self.wait_for_port(
            poller,
            ServiceName::SchemaRegistry,
            SCHEMA_REGISTRY_PORT,
            SCHEMA_REGISTRY_TRIES,
            move |port| async move {
                let client = connector.connect(&registry_url(host, port)).await?;
                client.subjects().await?;
                Ok::<_, ProbeError>(Some(client))
            },
        )
        .await
    }

    async fn wait_for_container(&self, poller: &ReadinessPoller, service: ServiceName) -> ClusterResult<ContainerInfo> {
        poller
            .wait_for(service, &service.to_string(), CONTAINER_TRIES, move || async move {
                let container = self.find_container(service).await?;
                Ok::<_, ProbeError>(container.filter(|container| container.running))
            })
            .await
    }

    async fn find_container(&self, service: ServiceName) -> BackendResult<Option<ContainerInfo>> {
        let supervisor = &self.backends.supervisor;
        let runtime = &self.backends.runtime;

        let Some(id) = self
            .retry
            .call("ServiceSupervisor", "ps", move || supervisor.ps(service))
            .await?
        else {
            return Ok(None);
        };

        let id = id.as_str();
        self.retry
            .call("ContainerRuntime", "inspect", move || runtime.inspect(id))
            .await
            .map(Some)
    }

    async fn close_handles(&mut self) {
        if let Some(client) = self.handles.coordination.take() {
            if let Err(e) = client.close().await {
                service_warn!(ServiceName::Zookeeper, "⚠️ Failed to close coordination client: {}", e);
            }
        }
        if let Some(database) = self.handles.postgres.take() {
            if let Err(e) = database.close().await {
                service_warn!(ServiceName::Postgres, "⚠️ Failed to close database connection: {}", e);
            }
        }
        self.handles.schema_registry = None;
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        if self.state.is_active() {
            warn!(state = %self.state, "⚠️ TestCluster dropped while {}; containers may still be running", self.state);
        }
    }
}

fn registry_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

/// Gateway address from `ip route` output (`default via <ip> dev ...`)
fn parse_default_gateway(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (gateway, _) = line.strip_prefix("default via ")?.split_once(" dev ")?;
        Some(gateway.trim().to_string())
    })
}

/// Port half of a `host:port` pair as printed by `docker compose port`
fn parse_mapped_port(hostport: &str) -> BackendResult<u16> {
    hostport
        .trim()
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse().ok())
        .ok_or_else(|| BackendError::unexpected_output("docker compose port", hostport.trim()))
}
