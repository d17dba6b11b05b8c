//! Harness Settings
//!
//! Process-wide settings for talking to the compose project. Unlike
//! [`ClusterConfig`](super::ClusterConfig) these survive `reset`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shared::{SharedError, SharedResult};

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessSettings {
    pub host: String,
    pub compose_file: Option<PathBuf>,
    pub project_name: Option<String>,
    pub postgres_user: String,
    pub postgres_extensions: Vec<String>,
    pub api_retries: u32,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub host_probe_image: String,
    pub consumer_image: String,
    pub consumer_group_prefix: String,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            compose_file: None,
            project_name: None,
            postgres_user: "postgres".to_string(),
            postgres_extensions: vec!["bottledwater".to_string(), "hstore".to_string()],
            api_retries: 4,
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
            host_probe_image: "debian:latest".to_string(),
            consumer_image: "edenhill/kcat:1.7.1".to_string(),
            consumer_group_prefix: "harness".to_string(),
        }
    }
}

impl HarnessSettings {
    /// Create a new builder
    pub fn builder() -> crate::config::builder::HarnessSettingsBuilder {
        crate::config::builder::HarnessSettingsBuilder::new()
    }

    /// Read `HARNESS_*` variables from the process environment
    pub fn from_env() -> SharedResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> SharedResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(host) = lookup("HARNESS_HOST") {
            settings.host = host;
        }
        if let Some(file) = lookup("HARNESS_COMPOSE_FILE") {
            settings.compose_file = Some(PathBuf::from(file));
        }
        if let Some(project) = lookup("HARNESS_PROJECT") {
            settings.project_name = Some(project);
        }
        if let Some(user) = lookup("HARNESS_POSTGRES_USER") {
            settings.postgres_user = user;
        }
        if let Some(extensions) = lookup("HARNESS_POSTGRES_EXTENSIONS") {
            settings.postgres_extensions = extensions
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(retries) = lookup("HARNESS_API_RETRIES") {
            settings.api_retries = parse_field("HARNESS_API_RETRIES", &retries)?;
        }
        if let Some(ms) = lookup("HARNESS_POLL_INTERVAL_MS") {
            settings.poll_interval = Duration::from_millis(parse_field("HARNESS_POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(ms) = lookup("HARNESS_SETTLE_DELAY_MS") {
            settings.settle_delay = Duration::from_millis(parse_field("HARNESS_SETTLE_DELAY_MS", &ms)?);
        }
        if let Some(image) = lookup("HARNESS_HOST_PROBE_IMAGE") {
            settings.host_probe_image = image;
        }
        if let Some(image) = lookup("HARNESS_CONSUMER_IMAGE") {
            settings.consumer_image = image;
        }
        if let Some(prefix) = lookup("HARNESS_CONSUMER_GROUP_PREFIX") {
            settings.consumer_group_prefix = prefix;
        }

        Ok(settings)
    }
}

fn parse_field<T: FromStr>(field: &str, value: &str) -> SharedResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SharedError::invalid_config(field, value))
}
