//! Per-submission working directories.
//!
//! Intake saves each uploaded artifact under `submissions/<id>`. Before a
//! dispatch the artifact is copied into a fresh `mnt/<id>` directory, which is
//! bind-mounted into the container.

use std::{
    io,
    path::{Path, PathBuf},
};

use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::lib::submissions::types::Submission;

/// File name the artifact gets inside every run directory.
pub const SOURCE_FILE_NAME: &str = "submission";

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("source artifact for submission {id} not found at {}", .path.display())]
    MissingArtifact { id: Uuid, path: PathBuf },
    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    submissions_dir: PathBuf,
    mount_dir: PathBuf,
}

impl Workspace {
    pub fn new(root: &Path) -> Self {
        Workspace {
            submissions_dir: root.join("submissions"),
            mount_dir: root.join("mnt"),
        }
    }

    pub async fn init(&self) -> Result<(), WorkspaceError> {
        for dir in [&self.submissions_dir, &self.mount_dir] {
            fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        }
        Ok(())
    }

    pub fn artifact_path(&self, id: Uuid) -> PathBuf {
        self.submissions_dir.join(id.to_string())
    }

    /// Persists an uploaded source artifact for later dispatch.
    pub async fn save_artifact(&self, id: Uuid, code: &[u8]) -> Result<PathBuf, WorkspaceError> {
        fs::create_dir_all(&self.submissions_dir)
            .await
            .map_err(io_error(&self.submissions_dir))?;
        let path = self.artifact_path(id);
        fs::write(&path, code).await.map_err(io_error(&path))?;
        Ok(path)
    }

    /// Builds the run directory for a submission and returns its absolute path.
    ///
    /// Any previous directory for the same id is replaced, so a retried
    /// dispatch always starts from the artifact alone.
    pub async fn prepare(&self, submission: &Submission) -> Result<PathBuf, WorkspaceError> {
        let source = self.artifact_path(submission.id);
        match fs::metadata(&source).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(WorkspaceError::MissingArtifact {
                    id: submission.id,
                    path: source,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WorkspaceError::MissingArtifact {
                    id: submission.id,
                    path: source,
                });
            }
            Err(e) => return Err(io_error(&source)(e)),
        }

        let run_dir = self.mount_dir.join(submission.id.to_string());
        match fs::remove_dir_all(&run_dir).await {
            Ok(()) => debug!(submission_id = %submission.id, "replaced stale run directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(&run_dir)(e)),
        }
        fs::create_dir_all(&run_dir).await.map_err(io_error(&run_dir))?;

        let target = run_dir.join(SOURCE_FILE_NAME);
        fs::copy(&source, &target).await.map_err(io_error(&target))?;

        // docker bind mounts need an absolute host path
        let run_dir = fs::canonicalize(&run_dir).await.map_err(io_error(&run_dir))?;
        Ok(run_dir)
    }
}
