use std::{collections::HashMap, path::PathBuf, pin::Pin, time::Duration};

use futures_util::stream::BoxStream;
use tokio::{io::AsyncWrite, time::Instant};
use uuid::Uuid;

use crate::lib::submissions::types::{Language, Outcome};

/// Path the run directory is mounted at inside every container.
pub const CONTAINER_WORKDIR: &str = "/workspace";

/// Label carrying the submission id on every container the runner creates.
pub const SUBMISSION_LABEL: &str = "code_runner.submission";

/// A container occupying one unit of the concurrency ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedContainer {
    pub container_id: String,
    pub submission_id: Uuid,
    pub started_at: Instant,
}

impl TrackedContainer {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

/// Which stdio streams are wired to the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoAttach {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
}

impl Default for IoAttach {
    fn default() -> Self {
        IoAttach {
            stdin: false,
            stdout: true,
            stderr: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
}

impl ContainerLimits {
    pub fn new(memory_mb: u64, cpus: f64) -> Self {
        ContainerLimits {
            memory_bytes: (memory_mb as i64) * 1024 * 1024,
            nano_cpus: (cpus * 1_000_000_000.0) as i64,
        }
    }
}

impl Default for ContainerLimits {
    fn default() -> Self {
        ContainerLimits::new(256, 1.0)
    }
}

/// Everything the runtime needs to create one execution container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    /// Host directory bind-mounted at [`CONTAINER_WORKDIR`].
    pub host_dir: PathBuf,
    pub working_dir: String,
    pub io: IoAttach,
    pub limits: ContainerLimits,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreatedContainer {
    pub id: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Streams of an attached container. Output chunks are raw bytes.
pub struct Attachment {
    pub output: BoxStream<'static, Result<Vec<u8>, RuntimeError>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

/// Result of a liveness probe on a tracked container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Exited { exit_code: Option<i64> },
    /// The engine could not be asked. The entry stays tracked until the timeout sweep.
    Unknown,
}

impl Liveness {
    #[cfg(test)]
    pub fn is_alive(&self) -> bool {
        match self {
            Liveness::Alive | Liveness::Unknown => true,
            Liveness::Exited { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited { exit_code: Option<i64> },
    TimedOut,
}

impl Termination {
    pub fn outcome(&self) -> Outcome {
        match self {
            Termination::Exited { exit_code: Some(0) } => Outcome::Success,
            Termination::Exited { .. } | Termination::TimedOut => Outcome::Failure,
        }
    }
}

/// A tracked container that has left the tracked set, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub container: TrackedContainer,
    pub termination: Termination,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),
    #[error("{0}")]
    Message(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no image configured for language {0}")]
    UnsupportedLanguage(Language),
    #[error("failed to create container from {image}: {source}")]
    Create {
        image: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to attach to container {container_id}: {source}")]
    Attach {
        container_id: String,
        #[source]
        source: RuntimeError,
    },
    #[error("failed to start container {container_id}: {source}")]
    Start {
        container_id: String,
        #[source]
        source: RuntimeError,
    },
}
