//! Cluster Configuration
//!
//! Settings that decide which services a start cycle brings up and which
//! environment they see. Restored to defaults by `TestCluster::reset`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shared::{CleanupPolicy, MessageFormat, OnError, ServiceName};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub format: MessageFormat,
    pub postgres_version: String,
    pub on_error: OnError,
    pub topic_prefix: Option<String>,
    pub skip_snapshot: bool,
    pub topic_cleanup_policy: CleanupPolicy,
    pub auto_create_topics: bool,
    pub valgrind: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            format: MessageFormat::Json,
            postgres_version: "9.5".to_string(),
            on_error: OnError::Exit,
            topic_prefix: None,
            skip_snapshot: false,
            topic_cleanup_policy: CleanupPolicy::Compact,
            auto_create_topics: true,
            valgrind: false,
        }
    }
}

impl ClusterConfig {
    /// Create a new builder
    pub fn builder() -> crate::config::builder::ClusterConfigBuilder {
        crate::config::builder::ClusterConfigBuilder::new()
    }

    /// The compose service running the application under test
    pub fn app_service(&self) -> ServiceName {
        ServiceName::BottledWater(self.format)
    }

    /// Convert to the compose environment for a start cycle
    ///
    /// `advertised_host` is the address the broker advertises to clients
    /// outside the compose network, when it is known.
    pub fn to_env(&self, advertised_host: Option<&str>) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();

        if let Some(host) = advertised_host {
            env.insert("KAFKA_ADVERTISED_HOST_NAME".to_string(), host.to_string());
        }
        env.insert(
            "KAFKA_LOG_CLEANUP_POLICY".to_string(),
            self.topic_cleanup_policy.to_string(),
        );
        env.insert(
            "KAFKA_AUTO_CREATE_TOPICS_ENABLE".to_string(),
            self.auto_create_topics.to_string(),
        );
        env.insert("POSTGRES_VERSION".to_string(), self.postgres_version.clone());
        env.insert("BOTTLEDWATER_ON_ERROR".to_string(), self.on_error.to_string());
        env.insert(
            "BOTTLEDWATER_TOPIC_PREFIX".to_string(),
            self.topic_prefix.clone().unwrap_or_default(),
        );
        env.insert(
            "BOTTLEDWATER_SKIP_SNAPSHOT".to_string(),
            self.skip_snapshot.to_string(),
        );
        env.insert("BOTTLEDWATER_VALGRIND".to_string(), self.valgrind.to_string());

        env
    }

    /// Topic the application publishes a table's changes to
    pub fn topic_for_table(&self, table: &str) -> String {
        match self.topic_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}.{table}"),
            _ => table.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reset_state() {
        let config = ClusterConfig::default();
        assert_eq!(config.format, MessageFormat::Json);
        assert_eq!(config.topic_cleanup_policy, CleanupPolicy::Compact);
        assert!(config.auto_create_topics);
        assert_eq!(config.on_error, OnError::Exit);
        assert_eq!(config.app_service().to_string(), "bottledwater-json");
    }

    #[test]
    fn test_env_rendering() {
        let config = ClusterConfig::builder()
            .format(MessageFormat::Avro)
            .topic_cleanup_policy(CleanupPolicy::Delete)
            .auto_create_topics(false)
            .on_error(OnError::Log)
            .skip_snapshot(true)
            .build();

        let env = config.to_env(Some("172.17.0.1"));
        assert_eq!(env["KAFKA_ADVERTISED_HOST_NAME"], "172.17.0.1");
        assert_eq!(env["KAFKA_LOG_CLEANUP_POLICY"], "delete");
        assert_eq!(env["KAFKA_AUTO_CREATE_TOPICS_ENABLE"], "false");
        assert_eq!(env["BOTTLEDWATER_ON_ERROR"], "log");
        assert_eq!(env["BOTTLEDWATER_SKIP_SNAPSHOT"], "true");
        assert_eq!(env["BOTTLEDWATER_TOPIC_PREFIX"], "");

        let env = ClusterConfig::default().to_env(None);
        assert!(!env.contains_key("KAFKA_ADVERTISED_HOST_NAME"));
    }

    #[test]
    fn test_topic_prefix() {
        let config = ClusterConfig::builder().topic_prefix("bw").build();
        assert_eq!(config.topic_for_table("users"), "bw.users");
        assert_eq!(ClusterConfig::default().topic_for_table("users"), "users");
    }
}
