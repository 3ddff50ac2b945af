use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use futures_util::StreamExt;
use tokio::{
    io::AsyncWriteExt,
    sync::{Mutex, watch},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use super::{
    images::ImageTable,
    runtime::ContainerRuntime,
    types::{
        Attachment, CONTAINER_WORKDIR, ContainerLimits, ContainerSpec, DispatchError, Finished,
        IoAttach, Liveness, RuntimeError, SUBMISSION_LABEL, Termination, TrackedContainer,
    },
};
use crate::lib::{
    submissions::types::{Language, Submission},
    ticker::run_periodic,
};

#[derive(Debug, Clone, Copy)]
pub struct ManagerSettings {
    pub execution_timeout: Duration,
    pub stop_grace: Duration,
    pub limits: ContainerLimits,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        ManagerSettings {
            execution_timeout: Duration::from_secs(60),
            stop_grace: Duration::from_secs(10),
            limits: ContainerLimits::default(),
        }
    }
}

/// Containers currently holding a capacity slot, plus the ones that left the
/// set since the scheduler last collected them.
#[derive(Default)]
struct Tracked {
    running: HashMap<String, TrackedContainer>,
    finished: Vec<Finished>,
}

/// Owns every container the runner starts.
///
/// The tracked set is only reachable through this type and every mutation goes
/// through the one lock: `dispatch` adds, `sweep` drops timed-out entries and
/// `reap` drops containers that exited on their own. Engine calls are made
/// without holding the lock.
pub struct ContainerManager {
    runtime: Arc<dyn ContainerRuntime>,
    images: Arc<ImageTable>,
    settings: ManagerSettings,
    tracked: Mutex<Tracked>,
}

impl ContainerManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        images: Arc<ImageTable>,
        settings: ManagerSettings,
    ) -> Self {
        ContainerManager {
            runtime,
            images,
            settings,
            tracked: Mutex::new(Tracked::default()),
        }
    }

    /// Pulls the image of every supported language. Failures are logged and skipped.
    pub async fn prime_images(&self) {
        for language in Language::ALL {
            let Some(image) = self.images.get(language) else {
                error!(%language, "no default image for language, its submissions cannot run");
                continue;
            };
            if let Err(e) = self.runtime.pull_image(&image.tag).await {
                error!(%language, image = %image.tag, error = %e, "failed to pull image");
            }
        }
    }

    /// Creates and starts a container for `submission` over `work_dir`.
    ///
    /// On success the container is tracked and occupies a capacity slot.
    pub async fn dispatch(
        &self,
        submission: &Submission,
        work_dir: &Path,
    ) -> Result<TrackedContainer, DispatchError> {
        let image = self
            .images
            .get(submission.language)
            .ok_or(DispatchError::UnsupportedLanguage(submission.language))?;

        let spec = ContainerSpec {
            image: image.tag.clone(),
            command: image.command.clone(),
            host_dir: work_dir.to_path_buf(),
            working_dir: CONTAINER_WORKDIR.to_string(),
            io: IoAttach::default(),
            limits: self.settings.limits,
            labels: HashMap::from([(SUBMISSION_LABEL.to_string(), submission.id.to_string())]),
        };
        info!(
            submission_id = %submission.id,
            image = %spec.image,
            directory = %work_dir.display(),
            "creating container"
        );

        let created = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(|source| DispatchError::Create {
                image: spec.image.clone(),
                source,
            })?;
        for warning in &created.warnings {
            warn!(container_id = %created.id, %warning, "engine warning on create");
        }
        let container_id = created.id;

        let attachment = match self.runtime.attach(&container_id).await {
            Ok(attachment) => attachment,
            Err(source) => {
                self.discard(&container_id).await;
                return Err(DispatchError::Attach {
                    container_id,
                    source,
                });
            }
        };

        if let Err(source) = self.runtime.start_container(&container_id).await {
            self.discard(&container_id).await;
            return Err(DispatchError::Start {
                container_id,
                source,
            });
        }
        drain_output(container_id.clone(), attachment);

        let entry = TrackedContainer {
            container_id: container_id.clone(),
            submission_id: submission.id,
            started_at: Instant::now(),
        };
        self.tracked
            .lock()
            .await
            .running
            .insert(container_id.clone(), entry.clone());
        info!(submission_id = %submission.id, %container_id, "container started");

        Ok(entry)
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracked.lock().await.running.len()
    }

    /// Asks the engine whether a tracked container is still running.
    pub async fn liveness(&self, entry: &TrackedContainer) -> Liveness {
        match self.runtime.inspect_container(&entry.container_id).await {
            Ok(state) if state.running => Liveness::Alive,
            Ok(state) => Liveness::Exited {
                exit_code: state.exit_code,
            },
            Err(e) => {
                warn!(container_id = %entry.container_id, error = %e, "liveness check failed");
                Liveness::Unknown
            }
        }
    }

    /// Drops containers that exited on their own and hands back everything that
    /// left the tracked set since the last call, timed-out entries included.
    pub async fn reap(&self) -> Vec<Finished> {
        let snapshot: Vec<TrackedContainer> =
            self.tracked.lock().await.running.values().cloned().collect();

        let mut exited = Vec::new();
        for entry in snapshot {
            match self.liveness(&entry).await {
                Liveness::Exited { exit_code } => exited.push((entry, exit_code)),
                Liveness::Alive | Liveness::Unknown => {}
            }
        }

        for (entry, exit_code) in &exited {
            debug!(container_id = %entry.container_id, ?exit_code, "container exited");
            if let Err(e) = self.runtime.remove_container(&entry.container_id).await {
                error!(container_id = %entry.container_id, error = %e, "failed to remove exited container");
            }
        }

        let mut tracked = self.tracked.lock().await;
        let mut finished = std::mem::take(&mut tracked.finished);
        for (entry, exit_code) in exited {
            // a sweep may have dropped it in the meantime and already reported it
            if let Some(container) = tracked.running.remove(&entry.container_id) {
                finished.push(Finished {
                    container,
                    termination: Termination::Exited { exit_code },
                });
            }
        }
        finished
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// Stops and removes every tracked container older than the execution
    /// timeout at `now`. Each entry leaves the tracked set right after its own
    /// stop and remove attempts, whether or not they succeeded.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let timeout = self.settings.execution_timeout;
        let expired: Vec<TrackedContainer> = self
            .tracked
            .lock()
            .await
            .running
            .values()
            .filter(|entry| entry.age(now) > timeout)
            .cloned()
            .collect();

        let mut dropped = 0;
        for entry in expired {
            warn!(
                container_id = %entry.container_id,
                submission_id = %entry.submission_id,
                age_secs = entry.age(now).as_secs(),
                "execution timed out, stopping container"
            );
            if let Err(e) = self
                .runtime
                .stop_container(&entry.container_id, self.settings.stop_grace)
                .await
            {
                error!(container_id = %entry.container_id, error = %e, "failed to stop container");
            }
            if let Err(e) = self.runtime.remove_container(&entry.container_id).await {
                error!(container_id = %entry.container_id, error = %e, "failed to remove container");
            }

            let mut tracked = self.tracked.lock().await;
            if let Some(container) = tracked.running.remove(&entry.container_id) {
                tracked.finished.push(Finished {
                    container,
                    termination: Termination::TimedOut,
                });
                dropped += 1;
            }
        }
        if dropped > 0 {
            let remaining = self.tracked_count().await;
            info!(dropped, remaining, "timeout sweep finished");
        }
        dropped
    }

    /// Force-removes labelled containers this manager does not track, which
    /// is everything a previous process left behind.
    pub async fn remove_orphans(&self) -> Result<usize, RuntimeError> {
        let labelled = self.runtime.list_labelled(SUBMISSION_LABEL).await?;
        let orphans: Vec<String> = {
            let tracked = self.tracked.lock().await;
            labelled
                .into_iter()
                .filter(|id| !tracked.running.contains_key(id))
                .collect()
        };

        let mut removed = 0;
        for container_id in orphans {
            match self.runtime.remove_container(&container_id).await {
                Ok(()) => {
                    warn!(%container_id, "removed container left by a previous run");
                    removed += 1;
                }
                Err(e) => error!(%container_id, error = %e, "failed to remove orphaned container"),
            }
        }
        Ok(removed)
    }

    pub async fn run_monitor(self: Arc<Self>, period: Duration, stop: watch::Receiver<bool>) {
        run_periodic("container-monitor", period, stop, || {
            let manager = self.clone();
            async move {
                manager.sweep().await;
            }
        })
        .await
    }

    async fn discard(&self, container_id: &str) {
        if let Err(e) = self.runtime.remove_container(container_id).await {
            error!(%container_id, error = %e, "failed to remove container after failed dispatch");
        }
    }
}

/// Closes stdin and forwards whatever the container prints to the debug log.
fn drain_output(container_id: String, attachment: Attachment) {
    let Attachment {
        mut output,
        mut input,
    } = attachment;
    tokio::spawn(async move {
        if let Err(e) = input.shutdown().await {
            debug!(%container_id, error = %e, "closing container stdin failed");
        }
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(bytes) => {
                    debug!(%container_id, output = %String::from_utf8_lossy(&bytes), "container output")
                }
                Err(e) => {
                    debug!(%container_id, error = %e, "container output stream ended");
                    break;
                }
            }
        }
    });
}
