mod common;

use assert_matches::assert_matches;
use common::{DOCKER_HOST_IP, POSTGRES_MAPPED_PORT, SCHEMA_REGISTRY_MAPPED_PORT, TestBed};
use std::collections::BTreeMap;

use harness::traits::ContainerLogs;
use harness::{BackendError, CleanupPolicy, ClusterError, ClusterState, MessageFormat, OnError, ServiceName, StopOptions};

const JSON_APP: ServiceName = ServiceName::BottledWater(MessageFormat::Json);
const AVRO_APP: ServiceName = ServiceName::BottledWater(MessageFormat::Avro);

fn quiet_stop() -> StopOptions {
    StopOptions {
        dump_logs: false,
        ..StopOptions::default()
    }
}

#[tokio::test]
async fn test_default_cycle_starts_everything_in_order() {
    let mut bed = TestBed::new();

    bed.cluster.start([]).await.unwrap();

    assert_eq!(bed.cluster.state(), ClusterState::Started);
    assert!(bed.cluster.healthy().await.unwrap());
    assert_eq!(bed.cluster.docker_host_ip().unwrap(), DOCKER_HOST_IP);
    assert_eq!(bed.cluster.postgres_port().unwrap(), POSTGRES_MAPPED_PORT);
    assert_eq!(
        bed.cluster.kafka_hostport().unwrap(),
        format!("127.0.0.1:{}", bed.port_of(ServiceName::Kafka))
    );
    assert_eq!(
        bed.cluster.zookeeper_hostport().unwrap(),
        format!("127.0.0.1:{}", bed.port_of(ServiceName::Zookeeper))
    );

    let world = bed.world.lock();
    assert_eq!(world.up_calls(), ["up:zookeeper,kafka,postgres", "up:bottledwater-json"]);
    assert_eq!(world.envs[0]["KAFKA_ADVERTISED_HOST_NAME"], DOCKER_HOST_IP);

    let bottledwater = world.position("sql:CREATE EXTENSION IF NOT EXISTS bottledwater").unwrap();
    let hstore = world.position("sql:CREATE EXTENSION IF NOT EXISTS hstore").unwrap();
    let app = world.position("up:bottledwater-json").unwrap();
    assert!(bottledwater < hstore && hstore < app);
}

#[tokio::test]
async fn test_clients_unavailable_after_stop() {
    let mut bed = TestBed::new();
    bed.cluster.start([]).await.unwrap();

    bed.cluster.stop(StopOptions::default()).await;

    assert_eq!(bed.cluster.state(), ClusterState::Stopped);
    assert_matches!(
        bed.cluster.healthy().await,
        Err(ClusterError::NotStarted { state: ClusterState::Stopped })
    );
    assert!(matches!(bed.cluster.postgres(), Err(ClusterError::NotStarted { .. })));
    assert_matches!(bed.cluster.kafka_port(), Err(ClusterError::NotStarted { .. }));

    let world = bed.world.lock();
    assert!(world.db_closed);
    assert!(world.coordination_closed);
    assert_eq!(world.count("stop"), 1);
    assert_eq!(world.count("rm"), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let mut bed = TestBed::new();
    bed.cluster.start([]).await.unwrap();

    let result = bed.cluster.start([]).await;

    assert_matches!(
        result,
        Err(ClusterError::InvalidStateTransition {
            operation: "start",
            state: ClusterState::Started
        })
    );
    assert_eq!(bed.cluster.state(), ClusterState::Started);
    assert_eq!(bed.world.lock().up_calls().len(), 2);
}

#[tokio::test]
async fn test_configure_rejected_while_started() {
    let mut bed = TestBed::new();
    bed.cluster.start([]).await.unwrap();

    let result = bed.cluster.configure(|config| config.on_error = OnError::Log);

    assert_matches!(result, Err(ClusterError::InvalidStateTransition { operation: "configure", .. }));
    assert_eq!(bed.cluster.config().on_error, OnError::Exit);
}

#[tokio::test]
async fn test_start_without_kafka() {
    let mut bed = TestBed::new();

    bed.cluster.start([ServiceName::Kafka]).await.unwrap();

    assert_eq!(bed.world.lock().up_calls(), ["up:zookeeper,postgres", "up:bottledwater-json"]);
    assert_matches!(
        bed.cluster.wait_until_ready(ServiceName::Kafka).await,
        Err(ClusterError::DeliberateExclusion { service: ServiceName::Kafka })
    );
    assert_matches!(
        bed.cluster.kafka_port(),
        Err(ClusterError::DeliberateExclusion { service: ServiceName::Kafka })
    );
    assert_matches!(
        bed.cluster.kafka_hostport(),
        Err(ClusterError::DeliberateExclusion { service: ServiceName::Kafka })
    );
    assert!(matches!(bed.cluster.coordination(), Err(ClusterError::ServiceNotRunning { .. })));
    assert!(bed.cluster.postgres_running().await.unwrap());

    bed.cluster.stop(quiet_stop()).await;
    assert!(bed.cluster.started_without().is_empty());
}

#[tokio::test]
async fn test_wait_until_ready_for_started_service() {
    let mut bed = TestBed::new();
    bed.cluster.start([]).await.unwrap();

    bed.cluster.wait_until_ready(ServiceName::Kafka).await.unwrap();
    bed.cluster.wait_until_ready(ServiceName::Postgres).await.unwrap();
    bed.cluster.wait_until_ready(JSON_APP).await.unwrap();
}

#[tokio::test]
async fn test_avro_brings_up_schema_registry_before_app() {
    let mut bed = TestBed::new();
    bed.cluster
        .configure(|config| config.format = MessageFormat::Avro)
        .unwrap();

    bed.cluster.start([]).await.unwrap();

    assert_eq!(
        bed.world.lock().up_calls(),
        ["up:zookeeper,kafka,postgres", "up:schema-registry", "up:bottledwater-avro"]
    );
    assert_eq!(
        bed.cluster.schema_registry_url().unwrap(),
        format!("http://127.0.0.1:{SCHEMA_REGISTRY_MAPPED_PORT}")
    );
    assert!(bed.cluster.schema_registry().is_ok());
    assert_eq!(bed.cluster.app_service(), AVRO_APP);
    assert!(bed.cluster.app_running().await.unwrap());
}

#[tokio::test]
async fn test_avro_without_schema_registry() {
    let mut bed = TestBed::new();
    bed.cluster
        .configure(|config| config.format = MessageFormat::Avro)
        .unwrap();

    bed.cluster.start([ServiceName::SchemaRegistry]).await.unwrap();

    assert_eq!(
        bed.world.lock().up_calls(),
        ["up:zookeeper,kafka,postgres", "up:bottledwater-avro"]
    );
    assert!(matches!(
        bed.cluster.schema_registry(),
        Err(ClusterError::ServiceNotRunning {
            service: ServiceName::SchemaRegistry
        })
    ));
}

#[tokio::test]
async fn test_start_without_app() {
    let mut bed = TestBed::new();

    bed.cluster.start([JSON_APP]).await.unwrap();

    assert_eq!(bed.world.lock().up_calls(), ["up:zookeeper,kafka,postgres"]);
    assert!(!bed.cluster.app_running().await.unwrap());
    assert!(!bed.cluster.healthy().await.unwrap());
}

#[tokio::test]
async fn test_restart_keeps_configuration() {
    let mut bed = TestBed::new();
    bed.cluster
        .configure(|config| config.on_error = OnError::Log)
        .unwrap();
    bed.cluster.start([]).await.unwrap();

    bed.cluster.restart(quiet_stop()).await.unwrap();

    assert_eq!(bed.cluster.state(), ClusterState::Started);
    assert_eq!(bed.cluster.config().on_error, OnError::Log);
    assert!(bed.cluster.healthy().await.unwrap());
    {
        let world = bed.world.lock();
        assert_eq!(world.count("stop"), 1);
        assert_eq!(world.envs.last().unwrap()["BOTTLEDWATER_ON_ERROR"], "log");
    }

    bed.cluster.stop(quiet_stop()).await;
    assert_eq!(bed.cluster.config().on_error, OnError::Exit);

    bed.cluster.start([]).await.unwrap();
    assert_eq!(bed.world.lock().envs.last().unwrap()["BOTTLEDWATER_ON_ERROR"], "exit");
}

#[tokio::test]
async fn test_stop_without_reset_keeps_configuration() {
    let mut bed = TestBed::new();
    bed.cluster
        .configure(|config| config.skip_snapshot = true)
        .unwrap();
    bed.cluster.start([]).await.unwrap();

    bed.cluster
        .stop(StopOptions {
            should_reset: false,
            dump_logs: false,
        })
        .await;

    assert!(bed.cluster.config().skip_snapshot);
}

#[tokio::test]
async fn test_postgres_never_ready() {
    let mut bed = TestBed::new();
    bed.world.lock().ping_failures = 100;

    let result = bed.cluster.start([]).await;

    assert_matches!(
        result,
        Err(ClusterError::NotReady {
            service: ServiceName::Postgres,
            attempts: 10
        })
    );
    assert_eq!(bed.world.lock().ping_calls, 10);
    assert_eq!(bed.cluster.state(), ClusterState::Starting);

    bed.cluster.stop(quiet_stop()).await;
    assert_eq!(bed.cluster.state(), ClusterState::Stopped);
}

#[tokio::test]
async fn test_postgres_ready_after_a_few_pings() {
    let mut bed = TestBed::new();
    bed.world.lock().ping_failures = 3;

    bed.cluster.start([]).await.unwrap();

    assert_eq!(bed.world.lock().ping_calls, 4);
}

#[tokio::test]
async fn test_supervisor_failures_are_retried() {
    let mut bed = TestBed::new();
    bed.world.lock().up_failures = 2;

    bed.cluster.start([]).await.unwrap();

    assert_eq!(bed.world.lock().up_calls().len(), 2);
}

#[tokio::test]
async fn test_hooks_run_after_extensions_and_before_their_service() {
    let mut bed = TestBed::new();
    bed.cluster
        .before_service(JSON_APP, "create users", |db| async move {
            db.exec("CREATE TABLE users (id SERIAL PRIMARY KEY)").await
        })
        .unwrap();
    bed.cluster
        .before_service(ServiceName::Postgres, "create things", |db| async move {
            db.exec("CREATE TABLE things (id SERIAL PRIMARY KEY)").await
        })
        .unwrap();

    bed.cluster.start([]).await.unwrap();

    let world = bed.world.lock();
    let hstore = world.position("sql:CREATE EXTENSION IF NOT EXISTS hstore").unwrap();
    let things = world.position("sql:CREATE TABLE things (id SERIAL PRIMARY KEY)").unwrap();
    let users = world.position("sql:CREATE TABLE users (id SERIAL PRIMARY KEY)").unwrap();
    let app = world.position("up:bottledwater-json").unwrap();
    assert!(hstore < things);
    assert!(things < users);
    assert!(users < app);
}

#[tokio::test]
async fn test_hook_runs_once() {
    let mut bed = TestBed::new();
    bed.cluster
        .before_service(JSON_APP, "create users", |db| async move {
            db.exec("CREATE TABLE users (id SERIAL PRIMARY KEY)").await
        })
        .unwrap();

    bed.cluster.start([]).await.unwrap();
    bed.cluster.restart(quiet_stop()).await.unwrap();

    assert_eq!(bed.world.lock().count("sql:CREATE TABLE users (id SERIAL PRIMARY KEY)"), 1);
}

#[tokio::test]
async fn test_second_hook_for_service_is_rejected() {
    let mut bed = TestBed::new();
    bed.cluster
        .before_service(JSON_APP, "first", |_| async { Ok(()) })
        .unwrap();

    let result = bed.cluster.before_service(JSON_APP, "second", |_| async { Ok(()) });

    assert_matches!(result, Err(ClusterError::HookAlreadyRegistered { service: JSON_APP }));
}

#[tokio::test]
async fn test_unrun_hook_is_discarded_by_stop() {
    let mut bed = TestBed::new();
    bed.world.lock().ping_failures = 100;
    bed.cluster
        .before_service(JSON_APP, "create users", |db| async move {
            db.exec("CREATE TABLE users (id SERIAL PRIMARY KEY)").await
        })
        .unwrap();

    assert!(bed.cluster.start([]).await.is_err());
    bed.cluster.stop(quiet_stop()).await;

    bed.world.lock().ping_failures = 0;
    bed.cluster.start([]).await.unwrap();

    assert_eq!(bed.world.lock().count("sql:CREATE TABLE users (id SERIAL PRIMARY KEY)"), 0);
}

#[tokio::test]
async fn test_crashed_app_fails_start_and_keeps_its_logs() {
    let mut bed = TestBed::new();
    bed.world.lock().crash_on_up.insert(
        JSON_APP,
        (
            1,
            ContainerLogs {
                stdout: "snapshot complete\n".to_string(),
                stderr: "failed to connect to broker\n".to_string(),
            },
        ),
    );

    let result = bed.cluster.start([]).await;

    assert_matches!(result, Err(ClusterError::NotReady { service: JSON_APP, attempts: 5 }));

    let failed = bed.cluster.failed_service_logs().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].container.name, "bottledwater-json-1");
    assert_eq!(failed[0].container.exit_code, 1);
    assert!(failed[0].render().iter().any(|block| block.contains("failed to connect to broker")));

    bed.cluster.stop(StopOptions::default()).await;
    assert!(bed.world.lock().crashed.is_empty());
}

#[tokio::test]
async fn test_app_crash_after_start_is_unhealthy() {
    let mut bed = TestBed::new();
    bed.cluster.start([]).await.unwrap();

    {
        let mut world = bed.world.lock();
        world.running.remove(&JSON_APP);
        world.crashed.insert(JSON_APP, (1, ContainerLogs::default()));
    }

    assert!(bed.cluster.postgres_running().await.unwrap());
    assert!(!bed.cluster.app_running().await.unwrap());
    assert!(!bed.cluster.healthy().await.unwrap());
}

#[tokio::test]
async fn test_stop_survives_close_failures() {
    let mut bed = TestBed::new();
    bed.world.lock().db_close_fails = true;
    bed.cluster.start([]).await.unwrap();

    bed.cluster.stop(StopOptions::default()).await;

    assert_eq!(bed.cluster.state(), ClusterState::Stopped);
    let world = bed.world.lock();
    assert_eq!(world.count("stop"), 1);
    assert_eq!(world.count("rm"), 1);
}

#[tokio::test]
async fn test_stopping_twice_is_a_no_op() {
    let mut bed = TestBed::new();
    bed.cluster.start([]).await.unwrap();

    bed.cluster.stop(quiet_stop()).await;
    bed.cluster.stop(quiet_stop()).await;

    assert_eq!(bed.world.lock().count("stop"), 1);
}

#[tokio::test]
async fn test_topics_created_through_coordination_handle() {
    let mut bed = TestBed::new();
    bed.cluster
        .configure(|config| {
            config.auto_create_topics = false;
            config.topic_cleanup_policy = CleanupPolicy::Delete;
        })
        .unwrap();
    bed.cluster.start([]).await.unwrap();

    let coordination = bed.cluster.coordination().unwrap();
    assert!(coordination.topics().await.unwrap().is_empty());

    let items = bed.cluster.config().topic_for_table("items");
    let policy = bed.cluster.config().topic_cleanup_policy;
    let config = BTreeMap::from([("cleanup.policy".to_string(), policy.to_string())]);
    coordination.create_topic(&items, 4, 1, config).await.unwrap();

    let topics = bed.cluster.coordination().unwrap().topics().await.unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics["items"].partitions, 4);
    assert_eq!(topics["items"].config["cleanup.policy"], "delete");

    let again = coordination.create_topic(&items, 1, 1, BTreeMap::new()).await;
    assert_matches!(again, Err(BackendError::CommandFailed { .. }));

    let world = bed.world.lock();
    assert_eq!(world.envs[0]["KAFKA_AUTO_CREATE_TOPICS_ENABLE"], "false");
    assert_eq!(world.envs[0]["KAFKA_LOG_CLEANUP_POLICY"], "delete");
    assert_eq!(world.count("create_topic:items"), 1);
}

#[tokio::test]
async fn test_coordination_handle_closed_by_stop() {
    let mut bed = TestBed::new();
    bed.cluster.start([]).await.unwrap();
    let coordination = bed.cluster.coordination().unwrap();

    bed.cluster.stop(quiet_stop()).await;

    assert!(matches!(bed.cluster.coordination(), Err(ClusterError::NotStarted { .. })));
    assert_matches!(coordination.topics().await, Err(BackendError::Closed { .. }));
}
