use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::secret::{HostConfig, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::stream::StreamExt;
use thiserror::Error;
use tracing::{debug, info};

use super::{Config, PortBinding, PortMap};

#[derive(Debug, Error)]
pub enum DockerError {
    #[error("docker api error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("{0}")]
    Driver(String),
}

/// What the worker learns from inspecting a container: its status
/// string (e.g. `"running"`, `"exited"`) and the observed host ports.
#[derive(Debug, Clone, Default)]
pub struct ContainerStatus {
    pub state: String,
    pub host_ports: PortMap,
}

/// Narrow seam to the container runtime. The worker core only ever
/// needs these three operations; tests substitute a fake.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Pulls the image, creates and starts the container, and returns
    /// the new container id.
    async fn run(&self, config: &Config) -> Result<String, DockerError>;

    /// Stops the container, then removes it along with its volumes.
    /// The image is left alone.
    async fn stop(&self, container_id: &str) -> Result<(), DockerError>;

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, DockerError>;
}

/// Driver backed by the local Docker daemon.
pub struct DockerDriver {
    client: Docker,
}

impl DockerDriver {
    pub fn new() -> Result<Self, DockerError> {
        let client = Docker::connect_with_unix_defaults()?;
        Ok(DockerDriver { client })
    }
}

fn restart_policy_name(policy: &str) -> RestartPolicyNameEnum {
    match policy {
        "always" => RestartPolicyNameEnum::ALWAYS,
        "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
        "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
        "no" => RestartPolicyNameEnum::NO,
        _ => RestartPolicyNameEnum::EMPTY,
    }
}

fn convert_ports(ports: HashMap<String, Option<Vec<bollard::secret::PortBinding>>>) -> PortMap {
    ports
        .into_iter()
        .map(|(spec, bindings)| {
            let bindings = bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| PortBinding {
                    host_ip: b.host_ip.unwrap_or_default(),
                    host_port: b.host_port.unwrap_or_default(),
                })
                .collect();
            (spec, bindings)
        })
        .collect()
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn run(&self, config: &Config) -> Result<String, DockerError> {
        info!(image = %config.image, "pulling image");
        let mut pull = self.client.create_image(
            Some(CreateImageOptions {
                from_image: config.image.clone(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            let info = progress?;
            if let Some(status) = info.status {
                debug!(image = %config.image, %status, "pull progress");
            }
        }

        let restart_policy = RestartPolicy {
            name: Some(restart_policy_name(&config.restart_policy)),
            maximum_retry_count: None,
        };

        let host_config = HostConfig {
            restart_policy: Some(restart_policy),
            memory: Some(config.memory),
            nano_cpus: Some((config.cpu * 1_000_000_000.0) as i64),
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let container_config = bollard::container::Config {
            image: Some(config.image.clone()),
            env: Some(config.env.clone()),
            cmd: if config.cmd.is_empty() {
                None
            } else {
                Some(config.cmd.clone())
            },
            exposed_ports: Some(
                config
                    .exposed_ports
                    .iter()
                    .map(|spec| (spec.clone(), HashMap::new()))
                    .collect(),
            ),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: config.name.clone(),
                    ..Default::default()
                }),
                container_config,
            )
            .await?;

        self.client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await?;
        info!(container_id = %created.id, name = %config.name, "container started");

        // Drain the container's current stdout/stderr into our log.
        let mut logs = self.client.logs(
            &created.id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: false,
                ..Default::default()
            }),
        );
        while let Some(chunk) = logs.next().await {
            match chunk {
                Ok(line) => debug!(container_id = %created.id, output = %line),
                Err(err) => {
                    debug!(container_id = %created.id, error = %err, "log stream ended");
                    break;
                }
            }
        }

        Ok(created.id)
    }

    async fn stop(&self, container_id: &str) -> Result<(), DockerError> {
        info!(%container_id, "stopping container");
        self.client.stop_container(container_id, None).await?;
        self.client
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerStatus, DockerError> {
        let resp = self.client.inspect_container(container_id, None).await?;
        let state = resp
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_default();
        let host_ports = resp
            .network_settings
            .and_then(|ns| ns.ports)
            .map(convert_ports)
            .unwrap_or_default();
        Ok(ContainerStatus { state, host_ports })
    }
}
