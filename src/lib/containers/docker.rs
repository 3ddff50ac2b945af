use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
        InspectContainerOptions, ListContainersOptions, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    image::CreateImageOptions,
    models::HostConfig,
};
use futures_util::stream::StreamExt;
use tracing::{debug, info};

use super::{
    runtime::ContainerRuntime,
    types::{
        Attachment, CONTAINER_WORKDIR, ContainerSpec, ContainerState, CreatedContainer,
        RuntimeError,
    },
};

/// [`ContainerRuntime`] backed by the local Docker engine.
#[derive(Debug, Clone)]
pub struct DockerClient {
    client: Docker,
}

impl DockerClient {
    pub fn connect() -> Result<Self, RuntimeError> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(DockerClient { client })
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let host_config = HostConfig {
            binds: Some(vec![format!(
                "{}:{}",
                spec.host_dir.display(),
                CONTAINER_WORKDIR
            )]),
            memory: Some(spec.limits.memory_bytes),
            nano_cpus: Some(spec.limits.nano_cpus),
            network_mode: Some("none".to_string()),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            attach_stdin: Some(spec.io.stdin),
            attach_stdout: Some(spec.io.stdout),
            attach_stderr: Some(spec.io.stderr),
            open_stdin: Some(spec.io.stdin),
            stdin_once: Some(spec.io.stdin),
            network_disabled: Some(true),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn pull_image(&self, tag: &str) -> Result<(), RuntimeError> {
        info!(image = tag, "pulling image");

        let mut stream = self.client.create_image(
            Some(CreateImageOptions {
                from_image: tag.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(msg) = stream.next().await {
            let info = msg?;
            if let Some(status) = info.status {
                debug!(image = tag, progress = info.progress.as_deref(), "{status}");
            }
        }

        info!(image = tag, "image pulled");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<CreatedContainer, RuntimeError> {
        let response = self
            .client
            .create_container(
                None::<CreateContainerOptions<String>>,
                Self::container_config(spec),
            )
            .await?;

        Ok(CreatedContainer {
            id: response.id,
            warnings: response.warnings,
        })
    }

    async fn attach(&self, container_id: &str) -> Result<Attachment, RuntimeError> {
        let AttachContainerResults { output, input } = self
            .client
            .attach_container(
                container_id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(false),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    detach_keys: None,
                }),
            )
            .await?;

        let output = output
            .map(|chunk| {
                chunk
                    .map(|log| log.into_bytes().to_vec())
                    .map_err(RuntimeError::from)
            })
            .boxed();

        Ok(Attachment { output, input })
    }

    async fn start_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.client
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str, grace: Duration) -> Result<(), RuntimeError> {
        self.client
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: grace.as_secs() as i64,
                }),
            )
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<(), RuntimeError> {
        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn list_labelled(&self, label: &str) -> Result<Vec<String>, RuntimeError> {
        let filters = HashMap::from([("label".to_string(), vec![label.to_string()])]);
        let containers = self
            .client
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn inspect_container(&self, container_id: &str) -> Result<ContainerState, RuntimeError> {
        let details = self
            .client
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        let state = details.state.ok_or_else(|| {
            RuntimeError::Message(format!("container {container_id} reported no state"))
        })?;

        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }
}
