//! Harness error types

use std::time::Duration;

use shared::ServiceName;
use thiserror::Error;

use crate::state::ClusterState;

/// Failure of a single call into an external collaborator
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("I/O error running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("Unexpected output from `{command}`: {output}")]
    UnexpectedOutput { command: String, output: String },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("{what} is closed")]
    Closed { what: String },

    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BackendError {
    pub fn io(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            program: program.into(),
            source,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn unexpected_output(command: impl Into<String>, output: impl Into<String>) -> Self {
        Self::UnexpectedOutput {
            command: command.into(),
            output: output.into(),
        }
    }

    /// Whether a readiness probe may treat this failure as "not ready yet"
    ///
    /// Output we cannot make sense of, malformed URLs and a tool that is not
    /// installed (or not executable) will not fix themselves by waiting, so
    /// they abort polling.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Io { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            BackendError::CommandFailed { .. }
            | BackendError::Connection { .. }
            | BackendError::Closed { .. }
            | BackendError::Docker(_)
            | BackendError::Http(_)
            | BackendError::Json(_) => true,
            BackendError::UnexpectedOutput { .. } | BackendError::Url(_) => false,
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Errors surfaced by the cluster lifecycle, readiness polling and collection
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Cannot {operation}: cluster already {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: ClusterState,
    },

    #[error("{}", not_started_message(.state))]
    NotStarted { state: ClusterState },

    #[error("{service} not ready after {attempts} attempts")]
    NotReady { service: ServiceName, attempts: u32 },

    #[error("Waiting for {service} when we deliberately started without it!")]
    DeliberateExclusion { service: ServiceName },

    #[error("Readiness probe for {service} aborted: {source}")]
    ProbeAborted {
        service: ServiceName,
        #[source]
        source: BackendError,
    },

    #[error("{service} was not started in this cycle")]
    ServiceNotRunning { service: ServiceName },

    #[error("expected {expected} messages on topic {topic}, but {} after {wait:?}", seen_summary(.seen))]
    CollectionTimeout {
        topic: String,
        expected: usize,
        seen: usize,
        wait: Duration,
    },

    #[error("Subscription to topic {topic} ended after {seen} messages")]
    SubscriptionClosed { topic: String, seen: usize },

    #[error("Before-service hook for {service} ({description}) failed: {source}")]
    HookFailed {
        service: ServiceName,
        description: String,
        #[source]
        source: BackendError,
    },

    #[error("A before-service hook is already pending for {service}")]
    HookAlreadyRegistered { service: ServiceName },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

fn not_started_message(state: &ClusterState) -> String {
    match state {
        ClusterState::Uninitialized => "cluster not started".to_string(),
        other => format!("cluster {other}"),
    }
}

fn seen_summary(seen: &usize) -> String {
    match seen {
        0 => "didn't see any".to_string(),
        n => format!("only saw {n}"),
    }
}

pub type ClusterResult<T> = Result<T, ClusterError>;
