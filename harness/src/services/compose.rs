//! Compose-backed service supervisor

use std::collections::BTreeMap;

use async_trait::async_trait;
use shared::ServiceName;

use crate::error::BackendResult;
use crate::services::command::ComposeCommand;
use crate::traits::{RemoveOptions, ServiceSupervisor, UpOptions};

/// Drives the project through `docker compose`
///
/// The environment passed to `up` is kept on the shared [`ComposeCommand`]
/// and replayed on later calls within the cycle.
pub struct ComposeSupervisor {
    compose: ComposeCommand,
}

impl ComposeSupervisor {
    pub fn new(compose: ComposeCommand) -> Self {
        Self { compose }
    }
}

fn up_args(services: &[ServiceName], options: UpOptions) -> Vec<String> {
    let mut args = vec!["up".to_string()];
    if options.detached {
        args.push("-d".to_string());
    }
    if options.no_deps {
        args.push("--no-deps".to_string());
    }
    args.extend(services.iter().map(ServiceName::compose_name));
    args
}

fn remove_args(options: RemoveOptions) -> Vec<String> {
    let mut args = vec!["rm".to_string()];
    if options.force {
        args.push("-f".to_string());
    }
    if options.volumes {
        args.push("-v".to_string());
    }
    args
}

#[async_trait]
impl ServiceSupervisor for ComposeSupervisor {
    async fn up(
        &self,
        services: Vec<ServiceName>,
        env: BTreeMap<String, String>,
        options: UpOptions,
    ) -> BackendResult<()> {
        self.compose.set_env(env);
        self.compose.run(up_args(&services, options)).await?;
        Ok(())
    }

    async fn stop(&self) -> BackendResult<()> {
        self.compose.run(["stop"]).await?;
        Ok(())
    }

    async fn remove(&self, options: RemoveOptions) -> BackendResult<()> {
        self.compose.run(remove_args(options)).await?;
        Ok(())
    }

    async fn ps(&self, service: ServiceName) -> BackendResult<Option<String>> {
        // -a: a crashed container must still be found to report it stopped
        let output = self
            .compose
            .run(["ps".to_string(), "-a".to_string(), "-q".to_string(), service.compose_name()])
            .await?;
        Ok(output.stdout.lines().map(str::trim).find(|id| !id.is_empty()).map(str::to_string))
    }

    async fn ps_all(&self) -> BackendResult<Vec<String>> {
        let output = self.compose.run(["ps", "-a", "-q"]).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn port(&self, service: ServiceName, internal_port: u16) -> BackendResult<String> {
        let output = self
            .compose
            .run(["port".to_string(), service.compose_name(), internal_port.to_string()])
            .await?;
        Ok(output.stdout.trim().to_string())
    }
}
