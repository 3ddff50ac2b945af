use async_trait::async_trait;
use uuid::Uuid;

use super::types::{StoreError, Submission};

/// Durable record of submissions. The scheduler is the only writer after intake.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert(&self, submission: &Submission) -> Result<(), StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError>;

    /// Queued submissions, oldest `queued_at` first, ties in insertion order.
    async fn list_queued(&self, limit: usize) -> Result<Vec<Submission>, StoreError>;

    async fn list_running(&self) -> Result<Vec<Submission>, StoreError>;

    /// Writes status and timestamps of every submission in one batch.
    async fn save_batch(&self, submissions: &[Submission]) -> Result<(), StoreError>;
}
