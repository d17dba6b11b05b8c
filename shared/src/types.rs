//! Core shared types and identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SharedError;

/// Wire format the application under test publishes in
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Json,
    Avro,
}

impl MessageFormat {
    /// Avro messages carry schema ids that must be registered first
    pub fn requires_schema_registry(&self) -> bool {
        matches!(self, MessageFormat::Avro)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageFormat::Json => "json",
            MessageFormat::Avro => "avro",
        }
    }
}

impl fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageFormat {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(MessageFormat::Json),
            "avro" => Ok(MessageFormat::Avro),
            other => Err(SharedError::invalid_config("format", other)),
        }
    }
}

/// What the application under test does when publishing fails
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    #[default]
    Exit,
    Log,
}

impl OnError {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnError::Exit => "exit",
            OnError::Log => "log",
        }
    }
}

impl fmt::Display for OnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnError {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exit" => Ok(OnError::Exit),
            "log" => Ok(OnError::Log),
            other => Err(SharedError::invalid_config("on_error", other)),
        }
    }
}

/// Broker log cleanup policy applied to auto-created topics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    #[default]
    Compact,
    Delete,
}

impl CleanupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupPolicy::Compact => "compact",
            CleanupPolicy::Delete => "delete",
        }
    }
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CleanupPolicy {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(CleanupPolicy::Compact),
            "delete" => Ok(CleanupPolicy::Delete),
            other => Err(SharedError::invalid_config("topic_cleanup_policy", other)),
        }
    }
}

/// A managed service in the compose project
///
/// The application under test is named after the format it publishes, so
/// `BottledWater(Json)` and `BottledWater(Avro)` are distinct compose services.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceName {
    Zookeeper,
    Kafka,
    Postgres,
    SchemaRegistry,
    BottledWater(MessageFormat),
}

impl ServiceName {
    /// Services every start cycle brings up before anything else
    pub const BASE: [ServiceName; 3] = [ServiceName::Zookeeper, ServiceName::Kafka, ServiceName::Postgres];

    /// Name used by the compose file
    pub fn compose_name(&self) -> String {
        match self {
            ServiceName::Zookeeper => "zookeeper".to_string(),
            ServiceName::Kafka => "kafka".to_string(),
            ServiceName::Postgres => "postgres".to_string(),
            ServiceName::SchemaRegistry => "schema-registry".to_string(),
            ServiceName::BottledWater(format) => format!("bottledwater-{format}"),
        }
    }

    pub fn is_application(&self) -> bool {
        matches!(self, ServiceName::BottledWater(_))
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compose_name())
    }
}

impl FromStr for ServiceName {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "zookeeper" => Ok(ServiceName::Zookeeper),
            "kafka" => Ok(ServiceName::Kafka),
            "postgres" => Ok(ServiceName::Postgres),
            "schema-registry" => Ok(ServiceName::SchemaRegistry),
            other => match other.strip_prefix("bottledwater-") {
                Some(format) => format
                    .parse()
                    .map(ServiceName::BottledWater)
                    .map_err(|_| SharedError::UnknownService { input: other.to_string() }),
                None => Err(SharedError::UnknownService { input: other.to_string() }),
            },
        }
    }
}
