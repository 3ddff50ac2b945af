use std::{sync::Arc, time::Duration};

use chrono::Utc;
use sysinfo::System;
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use super::types::{SchedulerError, TickReport};
use crate::lib::{
    containers::{manager::ContainerManager, types::Finished},
    submissions::{store::SubmissionStore, types::Submission},
    ticker::run_periodic,
    workspace::Workspace,
};

/// Logical CPUs this process may use: the host count, capped by the
/// scheduler affinity and cgroup quota when those are lower.
pub fn available_compute_units() -> usize {
    let mut system = System::new();
    system.refresh_cpu_all();
    let host = system.cpus().len();
    match std::thread::available_parallelism() {
        Ok(allowed) if host == 0 => allowed.get(),
        Ok(allowed) => host.min(allowed.get()),
        Err(_) => host,
    }
}

pub fn max_concurrency_for(compute_units: usize, reserved: usize) -> usize {
    compute_units.saturating_sub(reserved)
}

/// Work a failed tick could not persist. Picked up first by the next tick.
#[derive(Default)]
struct Carry {
    finished: Vec<Finished>,
    unsaved: Vec<Submission>,
}

/// Matches queued submissions to free container capacity.
pub struct Scheduler {
    store: Arc<dyn SubmissionStore>,
    workspace: Arc<Workspace>,
    containers: Arc<ContainerManager>,
    max_concurrency: usize,
    // held for the whole tick, so ticks never overlap
    carry: Mutex<Carry>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        workspace: Arc<Workspace>,
        containers: Arc<ContainerManager>,
        max_concurrency: usize,
    ) -> Self {
        Scheduler {
            store,
            workspace,
            containers,
            max_concurrency,
            carry: Mutex::new(Carry::default()),
        }
    }

    /// Returns submissions left `Running` by a previous process to the queue,
    /// after removing the containers that process started for them.
    /// Must run before the first tick.
    pub async fn recover(&self) -> Result<usize, SchedulerError> {
        let orphans = self.containers.remove_orphans().await?;
        if orphans > 0 {
            info!(orphans, "removed containers of the previous run");
        }

        let mut requeued = Vec::new();
        for mut submission in self.store.list_running().await? {
            match submission.requeue() {
                Ok(()) => {
                    warn!(submission_id = %submission.id, "requeueing submission interrupted by restart");
                    requeued.push(submission);
                }
                Err(e) => warn!(error = %e, "cannot requeue submission"),
            }
        }
        self.store.save_batch(&requeued).await?;
        Ok(requeued.len())
    }

    /// One scheduling pass: record finished executions, then fill free
    /// capacity with the oldest queued submissions, then persist everything
    /// in one batch.
    pub async fn tick(&self) -> Result<TickReport, SchedulerError> {
        let mut carry = self.carry.lock().await;
        let mut report = TickReport::default();

        let reaped = self.containers.reap().await;
        carry.finished.extend(reaped);
        self.record_finished(&mut carry, &mut report).await?;

        let tracked = self.containers.tracked_count().await;
        let free = self.max_concurrency.saturating_sub(tracked);
        if free > 0 {
            self.dispatch_queued(&mut carry, free, &mut report).await?;
        } else {
            debug!(tracked, max = self.max_concurrency, "no free capacity");
        }

        self.store.save_batch(&carry.unsaved).await?;
        carry.unsaved.clear();
        Ok(report)
    }

    pub async fn run(self: Arc<Self>, period: Duration, stop: watch::Receiver<bool>) {
        run_periodic("scheduler", period, stop, || {
            let scheduler = self.clone();
            async move {
                match scheduler.tick().await {
                    Ok(report) if report == TickReport::default() => debug!("tick idle"),
                    Ok(report) => info!(
                        finished = report.finished,
                        dispatched = report.dispatched,
                        deferred = report.deferred,
                        "tick complete"
                    ),
                    Err(e) => error!(error = %e, "tick failed"),
                }
            }
        })
        .await
    }

    async fn record_finished(
        &self,
        carry: &mut Carry,
        report: &mut TickReport,
    ) -> Result<(), SchedulerError> {
        let mut pending = std::mem::take(&mut carry.finished).into_iter();
        while let Some(finished) = pending.next() {
            match self.apply_outcome(&mut carry.unsaved, &finished).await {
                Ok(true) => report.finished += 1,
                Ok(false) => {}
                Err(e) => {
                    carry.finished.push(finished);
                    carry.finished.extend(pending);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Moves the submission behind a finished container to its terminal status.
    async fn apply_outcome(
        &self,
        batch: &mut Vec<Submission>,
        finished: &Finished,
    ) -> Result<bool, SchedulerError> {
        let id = finished.container.submission_id;
        if let Some(submission) = batch.iter_mut().find(|s| s.id == id) {
            return Ok(finish_submission(submission, finished));
        }

        let Some(mut submission) = self.store.get(id).await? else {
            warn!(submission_id = %id, "finished container belongs to an unknown submission");
            return Ok(false);
        };
        let recorded = finish_submission(&mut submission, finished);
        if recorded {
            batch.push(submission);
        }
        Ok(recorded)
    }

    async fn dispatch_queued(
        &self,
        carry: &mut Carry,
        free: usize,
        report: &mut TickReport,
    ) -> Result<(), SchedulerError> {
        // submissions dispatched by a tick whose save failed are still queued in the store
        let unsaved = carry.unsaved.len();
        let candidates: Vec<Submission> = self
            .store
            .list_queued(free + unsaved)
            .await?
            .into_iter()
            .filter(|s| !carry.unsaved.iter().any(|u| u.id == s.id))
            .take(free)
            .collect();

        for mut submission in candidates {
            let work_dir = match self.workspace.prepare(&submission).await {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(submission_id = %submission.id, error = %e, "workspace setup failed, leaving queued");
                    report.deferred += 1;
                    continue;
                }
            };

            let entry = match self.containers.dispatch(&submission, &work_dir).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(submission_id = %submission.id, error = %e, "dispatch failed, leaving queued");
                    report.deferred += 1;
                    continue;
                }
            };

            match submission.mark_running(Utc::now()) {
                Ok(()) => {
                    info!(
                        submission_id = %submission.id,
                        container_id = %entry.container_id,
                        language = %submission.language,
                        "submission running"
                    );
                    carry.unsaved.push(submission);
                    report.dispatched += 1;
                }
                Err(e) => error!(error = %e, "dispatched submission was not queued"),
            }
        }
        Ok(())
    }
}

fn finish_submission(submission: &mut Submission, finished: &Finished) -> bool {
    let outcome = finished.termination.outcome();
    match submission.finish(outcome, Utc::now()) {
        Ok(()) => {
            info!(
                submission_id = %submission.id,
                container_id = %finished.container.container_id,
                status = %submission.status,
                termination = ?finished.termination,
                "submission finished"
            );
            true
        }
        Err(e) => {
            warn!(error = %e, "cannot record execution outcome");
            false
        }
    }
}
