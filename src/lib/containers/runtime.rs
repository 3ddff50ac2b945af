use std::time::Duration;

use async_trait::async_trait;

use super::types::{Attachment, ContainerSpec, ContainerState, CreatedContainer, RuntimeError};

/// Management API of the container engine.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn pull_image(&self, tag: &str) -> Result<(), RuntimeError>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<CreatedContainer, RuntimeError>;

    async fn attach(&self, container_id: &str) -> Result<Attachment, RuntimeError>;

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Asks the container to stop, killing it once `grace` has passed.
    async fn stop_container(&self, container_id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError>;

    /// Ids of every container, running or not, that carries `label`.
    async fn list_labelled(&self, label: &str) -> Result<Vec<String>, RuntimeError>;

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState, RuntimeError>;
}
