use crate::lib::{containers::types::RuntimeError, submissions::types::StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("submission store: {0}")]
    Store(#[from] StoreError),
    #[error("container runtime: {0}")]
    Runtime(#[from] RuntimeError),
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Submissions moved to `Completed` or `Failed`.
    pub finished: usize,
    pub dispatched: usize,
    /// Candidates left `Queued` because preparation or dispatch failed.
    pub deferred: usize,
}
