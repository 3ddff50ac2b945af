use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    store::SubmissionStore,
    types::{Status, StoreError, Submission},
};

/// Store kept in process memory, in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<Submission>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        if rows.iter().any(|row| row.id == submission.id) {
            return Err(StoreError::Duplicate(submission.id));
        }
        rows.push(submission.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Submission>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().find(|row| row.id == id).cloned())
    }

    async fn list_queued(&self, limit: usize) -> Result<Vec<Submission>, StoreError> {
        let rows = self.rows.lock().await;
        let mut queued: Vec<Submission> = rows
            .iter()
            .filter(|row| row.status == Status::Queued)
            .cloned()
            .collect();
        // stable sort keeps insertion order for equal timestamps
        queued.sort_by_key(|row| row.queued_at);
        queued.truncate(limit);
        Ok(queued)
    }

    async fn list_running(&self) -> Result<Vec<Submission>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|row| row.status == Status::Running)
            .cloned()
            .collect())
    }

    async fn save_batch(&self, submissions: &[Submission]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().await;
        let mut positions = Vec::with_capacity(submissions.len());
        for submission in submissions {
            let position = rows
                .iter()
                .position(|row| row.id == submission.id)
                .ok_or(StoreError::NotFound(submission.id))?;
            positions.push(position);
        }
        for (position, submission) in positions.into_iter().zip(submissions) {
            let row = &mut rows[position];
            row.status = submission.status;
            row.started_at = submission.started_at;
            row.finished_at = submission.finished_at;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, Utc};

    use super::*;
    use crate::lib::submissions::types::Language;

    #[tokio::test]
    async fn list_queued_is_fifo_and_capped() {
        let store = MemoryStore::new();
        let base = Utc::now();
        let late = Submission::queued_at(Language::Python, base + TimeDelta::seconds(2));
        let early = Submission::queued_at(Language::Python, base);
        let middle = Submission::queued_at(Language::CSharp, base + TimeDelta::seconds(1));
        for submission in [&late, &early, &middle] {
            store.insert(submission).await.unwrap();
        }

        let queued = store.list_queued(2).await.unwrap();
        let ids: Vec<Uuid> = queued.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![early.id, middle.id]);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let store = MemoryStore::new();
        let at = Utc::now();
        let first = Submission::queued_at(Language::Python, at);
        let second = Submission::queued_at(Language::Python, at);
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let queued = store.list_queued(10).await.unwrap();
        assert_eq!(queued[0].id, first.id);
        assert_eq!(queued[1].id, second.id);
    }

    #[tokio::test]
    async fn list_queued_skips_other_statuses() {
        let store = MemoryStore::new();
        let mut running = Submission::new(Language::Python);
        store.insert(&running).await.unwrap();
        running.mark_running(Utc::now()).unwrap();
        store.save_batch(&[running.clone()]).await.unwrap();

        assert!(store.list_queued(10).await.unwrap().is_empty());
        assert_eq!(store.list_running().await.unwrap(), vec![running]);
    }

    #[tokio::test]
    async fn save_batch_rejects_unknown_rows_without_partial_writes() {
        let store = MemoryStore::new();
        let mut known = Submission::new(Language::Python);
        store.insert(&known).await.unwrap();
        known.mark_running(Utc::now()).unwrap();
        let unknown = Submission::new(Language::Python);

        let err = store.save_batch(&[known.clone(), unknown.clone()]).await;
        assert!(matches!(err, Err(StoreError::NotFound(id)) if id == unknown.id));
        let stored = store.get(known.id).await.unwrap().unwrap();
        assert_eq!(stored.status, Status::Queued);
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = MemoryStore::new();
        let submission = Submission::new(Language::CSharp);
        store.insert(&submission).await.unwrap();
        assert!(matches!(
            store.insert(&submission).await,
            Err(StoreError::Duplicate(_))
        ));
    }
}
