//! Running external CLI tools
//!
//! Compose and the Postgres client tools (`docker compose`, `pg_isready`,
//! `psql`) have no API crate, so these collaborators shell out and turn the
//! exit status and output into a [`BackendResult`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use tokio::process::Command;
use tracing::debug;

use crate::config::HarnessSettings;
use crate::error::{BackendError, BackendResult};

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program` to completion, returning its exit status and output
pub async fn run_unchecked(
    program: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> BackendResult<(ExitStatus, CommandOutput)> {
    debug!(program, args = ?args, "🔧 Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .envs(env)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| BackendError::io(program, e))?;

    Ok((
        output.status,
        CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
    ))
}

/// Run `program` to completion; a non-zero exit is an error
pub async fn run(program: &str, args: &[String], env: &BTreeMap<String, String>) -> BackendResult<CommandOutput> {
    let (status, output) = run_unchecked(program, args, env).await?;
    if !status.success() {
        return Err(BackendError::CommandFailed {
            program: program.to_string(),
            status: status.to_string(),
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// `docker compose` invocations scoped to one project
///
/// Clones share one environment: whatever `up` last ran with is replayed on
/// every later invocation, so variable interpolation in the compose file
/// resolves the same way for the supervisor and the Kafka tools.
#[derive(Debug, Clone, Default)]
pub struct ComposeCommand {
    compose_file: Option<PathBuf>,
    project_name: Option<String>,
    env: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ComposeCommand {
    pub fn new(compose_file: Option<PathBuf>, project_name: Option<String>) -> Self {
        Self {
            compose_file,
            project_name,
            env: Arc::default(),
        }
    }

    pub fn from_settings(settings: &HarnessSettings) -> Self {
        Self::new(settings.compose_file.clone(), settings.project_name.clone())
    }

    /// Full `docker` argument list for a compose subcommand
    pub fn args<I, S>(&self, subcommand: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = vec!["compose".to_string()];
        if let Some(file) = &self.compose_file {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        if let Some(project) = &self.project_name {
            args.push("-p".to_string());
            args.push(project.clone());
        }
        args.extend(subcommand.into_iter().map(Into::into));
        args
    }

    pub fn env(&self) -> BTreeMap<String, String> {
        self.env
            .lock()
            .map(|env| env.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_env(&self, env: BTreeMap<String, String>) {
        match self.env.lock() {
            Ok(mut current) => *current = env,
            Err(poisoned) => *poisoned.into_inner() = env,
        }
    }

    pub async fn run<I, S>(&self, subcommand: I) -> BackendResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        run("docker", &self.args(subcommand), &self.env()).await
    }
}
