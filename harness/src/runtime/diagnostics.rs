//! Failed container diagnostics
//!
//! Captured output of containers that exited with a non-zero code, framed
//! so it stands out in test logs.

use shared::logging::framed;
use tracing::error;

use crate::traits::{ContainerInfo, ContainerLogs};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDiagnostics {
    pub container: ContainerInfo,
    pub logs: ContainerLogs,
}

impl ContainerDiagnostics {
    pub fn new(container: ContainerInfo, logs: ContainerLogs) -> Self {
        Self { container, logs }
    }

    /// Framed stdout and stderr blocks; empty streams are left out
    pub fn render(&self) -> Vec<String> {
        [("Stdout", &self.logs.stdout), ("Stderr", &self.logs.stderr)]
            .into_iter()
            .filter(|(_, output)| !output.trim().is_empty())
            .map(|(stream, output)| {
                let header = format!(
                    "{} from container {} (exit code {})",
                    stream, self.container.name, self.container.exit_code
                );
                framed(&header, output)
            })
            .collect()
    }

    pub fn log(&self) {
        for block in self.render() {
            error!(container = %self.container.name, exit_code = self.container.exit_code, "\n{}", block);
        }
    }
}
