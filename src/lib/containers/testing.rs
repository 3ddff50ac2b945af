//! In-process stand-in for the container engine.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Semaphore;

use super::{
    runtime::ContainerRuntime,
    types::{Attachment, ContainerSpec, ContainerState, CreatedContainer, RuntimeError},
};

#[derive(Default)]
pub struct FakeState {
    next_id: usize,
    pub pulled: Vec<String>,
    pub created: Vec<ContainerSpec>,
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub removed: Vec<String>,
    pub exited: HashMap<String, i64>,
    pub fail_pull: bool,
    pub fail_create: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    pub fail_remove: bool,
    pub fail_inspect: bool,
    /// Stops after the first `n` wait for a permit on the semaphore.
    pub hold_stops: Option<(usize, Arc<Semaphore>)>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Makes a container look like it finished with `code`.
    pub fn exit(&self, container_id: &str, code: i64) {
        self.state().exited.insert(container_id.to_string(), code);
    }
}

fn failure(call: &str) -> RuntimeError {
    RuntimeError::Message(format!("{call} failed"))
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn pull_image(&self, tag: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        if state.fail_pull {
            return Err(failure("pull"));
        }
        state.pulled.push(tag.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<CreatedContainer, RuntimeError> {
        let mut state = self.state();
        if state.fail_create {
            return Err(failure("create"));
        }
        state.next_id += 1;
        let id = format!("container-{}", state.next_id);
        state.created.push(spec.clone());
        Ok(CreatedContainer {
            id,
            warnings: Vec::new(),
        })
    }

    async fn attach(&self, _container_id: &str) -> Result<Attachment, RuntimeError> {
        Ok(Attachment {
            output: futures_util::stream::empty().boxed(),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        if state.fail_start {
            return Err(failure("start"));
        }
        state.started.push(container_id.to_string());
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, _grace: Duration) -> Result<(), RuntimeError> {
        let gate = {
            let mut state = self.state();
            if state.fail_stop {
                return Err(failure("stop"));
            }
            state.stopped.push(container_id.to_string());
            state.exited.entry(container_id.to_string()).or_insert(137);
            match &state.hold_stops {
                Some((free, gate)) if state.stopped.len() > *free => Some(gate.clone()),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state();
        if state.fail_remove {
            return Err(failure("remove"));
        }
        state.removed.push(container_id.to_string());
        Ok(())
    }

    async fn list_labelled(&self, label: &str) -> Result<Vec<String>, RuntimeError> {
        let state = self.state();
        Ok(state
            .created
            .iter()
            .enumerate()
            .filter(|(_, spec)| spec.labels.contains_key(label))
            .map(|(index, _)| format!("container-{}", index + 1))
            .filter(|id| !state.removed.contains(id))
            .collect())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        let state = self.state();
        if state.fail_inspect || state.removed.iter().any(|id| id == container_id) {
            return Err(failure("inspect"));
        }
        Ok(match state.exited.get(container_id) {
            Some(code) => ContainerState {
                running: false,
                exit_code: Some(*code),
            },
            None => ContainerState {
                running: true,
                exit_code: None,
            },
        })
    }
}
