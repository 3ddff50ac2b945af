use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    state::valid_state_transition,
    types::{Language, Outcome, Status, Submission, TransitionError},
};

impl Submission {
    pub fn new(language: Language) -> Self {
        Self::queued_at(language, Utc::now())
    }

    pub fn queued_at(language: Language, queued_at: DateTime<Utc>) -> Self {
        Submission {
            id: Uuid::new_v4(),
            language,
            status: Status::Queued,
            queued_at,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(Status::Running)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn finish(&mut self, outcome: Outcome, now: DateTime<Utc>) -> Result<(), TransitionError> {
        let status = match outcome {
            Outcome::Success => Status::Completed,
            Outcome::Failure => Status::Failed,
        };
        self.transition(status)?;
        self.finished_at = Some(now);
        Ok(())
    }

    /// Puts a submission left `Running` by a previous process back in the queue.
    pub fn requeue(&mut self) -> Result<(), TransitionError> {
        self.transition(Status::Queued)?;
        self.started_at = None;
        Ok(())
    }

    /// Whether the timestamps agree with the status.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        match self.status {
            Status::Queued => self.started_at.is_none() && self.finished_at.is_none(),
            Status::Running => self.started_at.is_some() && self.finished_at.is_none(),
            Status::Completed | Status::Failed => {
                self.started_at.is_some() && self.finished_at.is_some()
            }
        }
    }

    fn transition(&mut self, to: Status) -> Result<(), TransitionError> {
        if !valid_state_transition(self.status, to) {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
