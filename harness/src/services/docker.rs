//! Container runtime on the Docker Engine API

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, InspectContainerOptions,
    LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::secret::ContainerInspectResponse;
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BackendError, BackendResult};
use crate::traits::{AttachedContainer, ContainerInfo, ContainerLogs, ContainerRuntime, OutputStream};

fn container_info(id: &str, response: ContainerInspectResponse) -> ContainerInfo {
    let state = response.state.unwrap_or_default();
    ContainerInfo {
        id: response.id.unwrap_or_else(|| id.to_string()),
        // docker prefixes container names with a slash
        name: response.name.unwrap_or_default().trim_start_matches('/').to_string(),
        running: state.running.unwrap_or(false),
        exit_code: state.exit_code.unwrap_or(0),
    }
}

fn is_missing(error: &DockerError) -> bool {
    matches!(error, DockerError::DockerResponseServerError { status_code: 404, .. })
}

/// Talks to the local docker daemon over its API socket
#[derive(Debug, Clone)]
pub struct DockerApi {
    docker: Docker,
}

impl DockerApi {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect through `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> BackendResult<Self> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    /// Pull `image` unless the daemon already has it
    async fn ensure_image(&self, image: &str) -> BackendResult<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image, "📦 Pulling image {}", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            if let Some(status) = progress?.status {
                debug!(image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create(&self, name: &str, config: Config<String>) -> BackendResult<()> {
        let options = CreateContainerOptions { name, platform: None };
        let response = self.docker.create_container(Some(options), config).await?;
        for warning in response.warnings {
            warn!(container = name, "⚠️ {}", warning);
        }
        Ok(())
    }

    async fn run_to_completion(&self, name: &str) -> BackendResult<String> {
        self.docker.start_container(name, None::<StartContainerOptions<String>>).await?;

        // A non-zero exit surfaces as an error from the wait stream
        let mut wait = self.docker.wait_container(name, None::<WaitContainerOptions<String>>);
        while let Some(status) = wait.next().await {
            status?;
        }

        Ok(self.logs(name).await?.stdout)
    }

    async fn attach_and_start(&self, name: &str) -> BackendResult<OutputStream> {
        let options = AttachContainerOptions::<String> {
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { output, .. } = self.docker.attach_container(name, Some(options)).await?;
        self.docker.start_container(name, None::<StartContainerOptions<String>>).await?;

        let stdout = output.filter_map(|chunk| async move {
            match chunk {
                Ok(LogOutput::StdOut { message }) => Some(Ok(message.to_vec())),
                Ok(_) => None,
                Err(e) => Some(Err(BackendError::from(e))),
            }
        });
        Ok(stdout.boxed())
    }
}

#[async_trait]
impl ContainerRuntime for DockerApi {
    async fn inspect(&self, id: &str) -> BackendResult<ContainerInfo> {
        let response = self.docker.inspect_container(id, None::<InspectContainerOptions>).await?;
        Ok(container_info(id, response))
    }

    async fn logs(&self, id: &str) -> BackendResult<ContainerLogs> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "all".to_string(),
            ..Default::default()
        };

        let mut logs = ContainerLogs::default();
        let mut stream = self.docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            match chunk? {
                LogOutput::StdOut { message } => logs.stdout.push_str(&String::from_utf8_lossy(&message)),
                LogOutput::StdErr { message } => logs.stderr.push_str(&String::from_utf8_lossy(&message)),
                _ => {}
            }
        }
        Ok(logs)
    }

    async fn run_ephemeral(&self, image: &str, command: Vec<String>) -> BackendResult<String> {
        self.ensure_image(image).await?;

        let name = format!("harness-run-{}", Uuid::new_v4());
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(command),
            ..Default::default()
        };
        self.create(&name, config).await?;

        let result = self.run_to_completion(&name).await;
        if let Err(e) = self.remove(&name).await {
            warn!(container = %name, "⚠️ Could not remove throw-away container: {}", e);
        }
        result
    }

    async fn run_attached(&self, container: AttachedContainer) -> BackendResult<OutputStream> {
        self.ensure_image(&container.image).await?;

        let host_config = bollard::service::HostConfig {
            network_mode: container.host_network.then(|| "host".to_string()),
            ..Default::default()
        };
        let config = Config {
            image: Some(container.image.clone()),
            cmd: Some(container.command.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(host_config),
            ..Default::default()
        };
        self.create(&container.name, config).await?;
        debug!(container = %container.name, image = %container.image, "📥 Started attached container");

        match self.attach_and_start(&container.name).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                if let Err(cleanup) = self.remove(&container.name).await {
                    warn!(container = %container.name, "⚠️ Could not remove container: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn remove(&self, name: &str) -> BackendResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_missing(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
