//! Configuration Builders
//!
//! Fluent builders for cluster configuration and harness settings

use std::path::PathBuf;
use std::time::Duration;

use shared::{CleanupPolicy, MessageFormat, OnError};

use super::{ClusterConfig, HarnessSettings};

pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ClusterConfig::default(),
        }
    }

    /// Set the format the application publishes in (json or avro)
    pub fn format(mut self, format: MessageFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Set the Postgres image version
    pub fn postgres_version<S: Into<String>>(mut self, version: S) -> Self {
        self.config.postgres_version = version.into();
        self
    }

    /// Set the application's error handling mode
    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.config.on_error = on_error;
        self
    }

    /// Set the prefix for topic names
    pub fn topic_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.topic_prefix = Some(prefix.into());
        self
    }

    /// Skip the initial snapshot of existing rows
    pub fn skip_snapshot(mut self, skip: bool) -> Self {
        self.config.skip_snapshot = skip;
        self
    }

    /// Set the broker's cleanup policy for auto-created topics
    pub fn topic_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.config.topic_cleanup_policy = policy;
        self
    }

    /// Let the broker create topics on first publish
    pub fn auto_create_topics(mut self, enabled: bool) -> Self {
        self.config.auto_create_topics = enabled;
        self
    }

    /// Run the application under valgrind
    pub fn valgrind(mut self, enabled: bool) -> Self {
        self.config.valgrind = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ClusterConfig {
        self.config
    }
}

impl Default for ClusterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HarnessSettingsBuilder {
    settings: HarnessSettings,
}

impl HarnessSettingsBuilder {
    pub fn new() -> Self {
        Self {
            settings: HarnessSettings::default(),
        }
    }

    /// Host the published service ports are reachable on
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.settings.host = host.into();
        self
    }

    pub fn compose_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings.compose_file = Some(path.into());
        self
    }

    pub fn project_name<S: Into<String>>(mut self, name: S) -> Self {
        self.settings.project_name = Some(name.into());
        self
    }

    pub fn postgres_user<S: Into<String>>(mut self, user: S) -> Self {
        self.settings.postgres_user = user.into();
        self
    }

    /// Replace the extensions installed after Postgres comes up
    pub fn postgres_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.postgres_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Retries for supervisor and container runtime calls
    pub fn api_retries(mut self, retries: u32) -> Self {
        self.settings.api_retries = retries;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    /// Grace period after the application container reports running
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settings.settle_delay = delay;
        self
    }

    pub fn host_probe_image<S: Into<String>>(mut self, image: S) -> Self {
        self.settings.host_probe_image = image.into();
        self
    }

    /// Image providing `kcat` as its entrypoint
    pub fn consumer_image<S: Into<String>>(mut self, image: S) -> Self {
        self.settings.consumer_image = image.into();
        self
    }

    pub fn consumer_group_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.settings.consumer_group_prefix = prefix.into();
        self
    }

    pub fn build(self) -> HarnessSettings {
        self.settings
    }
}

impl Default for HarnessSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
