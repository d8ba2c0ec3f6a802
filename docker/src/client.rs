use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    EndpointSpec, NetworkAttachmentConfig, RestartPolicy, RestartPolicyCondition, Service,
    ServiceSpec as BollardServiceSpec, ServiceUpdateResponse, TaskSpec, TaskSpecContainerSpec,
    TaskSpecPlacement, TaskSpecRestartPolicy, TaskState as BollardTaskState,
    TaskSpecResources,
};
use bollard::network::CreateNetworkOptions;
use bollard::service::{CreateServiceOptions, ListTasksOptions, UpdateServiceOptions};
use bollard::volume::CreateVolumeOptions;
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::settings::DriverSettings;

/// The label every swarm resource this control plane creates carries, so it
/// can be filtered back out again for the archiver and the health monitor.
pub const LABEL_MANAGED: &str = "zane-managed";
pub const LABEL_PARENT_ID: &str = "parent_id";
pub const LABEL_DEPLOYMENT_HASH: &str = "deployment_hash";

#[derive(Clone, Debug)]
pub struct SwarmServiceSpec {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub network_name: String,
    pub network_aliases: Vec<String>,
    pub env: Vec<String>,
    pub command: Option<Vec<String>>,
    pub mounts: Vec<MountSpec>,
    pub configs: Vec<AttachedConfigSpec>,
    pub published_ports: Vec<(u16, u16)>,
    pub cpus: Option<f64>,
    pub memory_bytes: Option<i64>,
    pub replicas: u64,
}

#[derive(Clone, Debug)]
pub struct MountSpec {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Clone, Debug)]
pub struct AttachedConfigSpec {
    pub config_id: String,
    pub config_name: String,
    pub target_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    New,
    Pending,
    Assigned,
    Accepted,
    Ready,
    Preparing,
    Starting,
    Running,
    Complete,
    Failed,
    Shutdown,
    Rejected,
    Orphaned,
    Remove,
}

impl From<BollardTaskState> for TaskState {
    fn from(state: BollardTaskState) -> Self {
        match state {
            BollardTaskState::NEW => TaskState::New,
            BollardTaskState::PENDING => TaskState::Pending,
            BollardTaskState::ASSIGNED => TaskState::Assigned,
            BollardTaskState::ACCEPTED => TaskState::Accepted,
            BollardTaskState::READY => TaskState::Ready,
            BollardTaskState::PREPARING => TaskState::Preparing,
            BollardTaskState::STARTING => TaskState::Starting,
            BollardTaskState::RUNNING => TaskState::Running,
            BollardTaskState::COMPLETE => TaskState::Complete,
            BollardTaskState::FAILED => TaskState::Failed,
            BollardTaskState::SHUTDOWN => TaskState::Shutdown,
            BollardTaskState::REJECTED => TaskState::Rejected,
            BollardTaskState::ORPHANED => TaskState::Orphaned,
            BollardTaskState::REMOVE => TaskState::Remove,
            _ => TaskState::Orphaned,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TaskSummary {
    pub id: String,
    pub container_id: Option<String>,
    pub state: TaskState,
    pub desired_state: String,
    pub version_index: u64,
    pub deployment_hash: Option<String>,
}

#[derive(Debug)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Capability surface the orchestrator's activities are written against.
/// Kept as a trait so the orchestrator's tests can swap in a fake instead
/// of a live daemon.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn ensure_network(&self, name: &str) -> Result<()>;
    async fn remove_network(&self, name: &str) -> Result<()>;

    async fn ensure_volume(&self, name: &str) -> Result<()>;
    async fn remove_volume(&self, name: &str) -> Result<()>;

    /// Creates a content-addressed config blob, returning its daemon-assigned id.
    async fn create_config(&self, name: &str, contents: &[u8]) -> Result<String>;
    async fn remove_config(&self, id_or_name: &str) -> Result<()>;

    async fn pull_image(&self, image: &str, username: Option<&str>, password: Option<&str>) -> Result<()>;

    async fn create_service(&self, spec: SwarmServiceSpec) -> Result<String>;
    async fn scale_service(&self, name_or_id: &str, replicas: u64) -> Result<()>;
    async fn remove_service(&self, name_or_id: &str) -> Result<()>;

    async fn list_tasks_for_deployment(&self, service_name: &str, deployment_hash: &str) -> Result<Vec<TaskSummary>>;

    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecResult>;

    async fn container_hostname(&self, container_id: &str) -> Result<String>;
}

pub struct BollardDriver {
    docker: Docker,
    settings: DriverSettings,
}

impl BollardDriver {
    pub fn new(docker: Docker, settings: DriverSettings) -> Self {
        Self { docker, settings }
    }

    pub fn connect_local(settings: DriverSettings) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self::new(docker, settings))
    }

    fn prefixed(&self, name: &str) -> String {
        format!("{}-{}", self.settings.prefix, name)
    }
}

#[async_trait]
impl ContainerDriver for BollardDriver {
    #[instrument(skip(self))]
    async fn ensure_network(&self, name: &str) -> Result<()> {
        match self.docker.inspect_network::<String>(name, None).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                self.docker
                    .create_network(CreateNetworkOptions {
                        name: name.to_string(),
                        driver: "overlay".to_string(),
                        attachable: true,
                        ..Default::default()
                    })
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn remove_network(&self, name: &str) -> Result<()> {
        match self.docker.remove_network(name).await {
            Ok(_) => Ok(()),
            Err(err) if Error::from(err).is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn ensure_volume(&self, name: &str) -> Result<()> {
        self.docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                driver: "local".to_string(),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_volume(&self, name: &str) -> Result<()> {
        match self.docker.remove_volume(name, None).await {
            Ok(_) => Ok(()),
            Err(err) if Error::from(err).is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self, contents))]
    async fn create_config(&self, name: &str, contents: &[u8]) -> Result<String> {
        let response = self
            .docker
            .create_config(bollard::models::ConfigSpec {
                name: Some(self.prefixed(name)),
                data: Some(base64_encode(contents)),
                labels: Some(HashMap::from([(LABEL_MANAGED.to_string(), "true".to_string())])),
                ..Default::default()
            })
            .await?;
        Ok(response.id)
    }

    #[instrument(skip(self))]
    async fn remove_config(&self, id_or_name: &str) -> Result<()> {
        match self.docker.remove_config(id_or_name).await {
            Ok(_) => Ok(()),
            Err(err) if Error::from(err).is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn pull_image(&self, image: &str, username: Option<&str>, password: Option<&str>) -> Result<()> {
        let credentials = username.map(|user| bollard::auth::DockerCredentials {
            username: Some(user.to_string()),
            password: password.map(str::to_string),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            credentials,
        );

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(info) => debug!(?info, "pulling image"),
                Err(err) => return Err(Error::ImagePull(err.to_string())),
            }
        }
        Ok(())
    }

    #[instrument(skip(self, spec), fields(name = %spec.name))]
    async fn create_service(&self, spec: SwarmServiceSpec) -> Result<String> {
        let mounts: Vec<bollard::models::Mount> = spec
            .mounts
            .iter()
            .map(|m| bollard::models::Mount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(bollard::models::MountTypeEnum::VOLUME),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let configs: Vec<bollard::models::TaskSpecContainerSpecConfigs> = spec
            .configs
            .iter()
            .map(|c| bollard::models::TaskSpecContainerSpecConfigs {
                config_id: Some(c.config_id.clone()),
                config_name: Some(c.config_name.clone()),
                file: Some(bollard::models::TaskSpecContainerSpecConfigsFile {
                    name: Some(c.target_path.clone()),
                    uid: Some("0".into()),
                    gid: Some("0".into()),
                    mode: Some(0o444),
                }),
                ..Default::default()
            })
            .collect();

        let ports: Vec<bollard::models::EndpointPortConfig> = spec
            .published_ports
            .iter()
            .map(|(host, target)| bollard::models::EndpointPortConfig {
                published_port: Some(*host as i64),
                target_port: Some(*target as i64),
                protocol: Some(bollard::models::EndpointPortConfigProtocolEnum::TCP),
                publish_mode: Some(bollard::models::EndpointPortConfigPublishModeEnum::HOST),
                ..Default::default()
            })
            .collect();

        let service_spec = BollardServiceSpec {
            name: Some(spec.name.clone()),
            labels: Some(spec.labels.clone()),
            task_template: Some(TaskSpec {
                container_spec: Some(TaskSpecContainerSpec {
                    image: Some(spec.image.clone()),
                    env: Some(spec.env.clone()),
                    command: spec.command.clone(),
                    mounts: Some(mounts),
                    configs: Some(configs),
                    ..Default::default()
                }),
                networks: Some(vec![NetworkAttachmentConfig {
                    target: Some(spec.network_name.clone()),
                    aliases: Some(spec.network_aliases.clone()),
                    ..Default::default()
                }]),
                restart_policy: Some(TaskSpecRestartPolicy {
                    condition: Some(bollard::models::TaskSpecRestartPolicyConditionEnum::ON_DASH_FAILURE),
                    max_attempts: Some(3),
                    delay: Some(5_000_000_000),
                    ..Default::default()
                }),
                placement: Some(TaskSpecPlacement::default()),
                resources: spec.cpus.or(spec.memory_bytes.map(|_| 0.0)).map(|_| TaskSpecResources {
                    limits: Some(bollard::models::Limit {
                        nano_cpus: spec.cpus.map(|c| (c * 1_000_000_000.0) as i64),
                        memory_bytes: spec.memory_bytes,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            mode: Some(bollard::models::ServiceSpecMode {
                replicated: Some(bollard::models::ServiceSpecModeReplicated {
                    replicas: Some(spec.replicas as i64),
                }),
                ..Default::default()
            }),
            update_config: Some(bollard::models::ServiceSpecUpdateConfig {
                parallelism: Some(1),
                order: Some(bollard::models::ServiceSpecUpdateConfigOrderEnum::START_DASH_FIRST),
                failure_action: Some(bollard::models::ServiceSpecUpdateConfigFailureActionEnum::ROLLBACK),
                ..Default::default()
            }),
            endpoint_spec: if ports.is_empty() {
                None
            } else {
                Some(EndpointSpec {
                    ports: Some(ports),
                    ..Default::default()
                })
            },
            ..Default::default()
        };

        let response = self
            .docker
            .create_service(service_spec, None::<CreateServiceOptions>)
            .await?;
        Ok(response.id.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn scale_service(&self, name_or_id: &str, replicas: u64) -> Result<()> {
        let current = self.docker.inspect_service(name_or_id, None).await?;
        let version = current
            .version
            .and_then(|v| v.index)
            .ok_or(Error::Malformed("version.index"))?;
        let mut spec = current.spec.ok_or(Error::Malformed("spec"))?;
        spec.mode = Some(bollard::models::ServiceSpecMode {
            replicated: Some(bollard::models::ServiceSpecModeReplicated {
                replicas: Some(replicas as i64),
            }),
            ..Default::default()
        });

        let _: ServiceUpdateResponse = self
            .docker
            .update_service(
                name_or_id,
                spec,
                UpdateServiceOptions {
                    version,
                    ..Default::default()
                },
                None,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_service(&self, name_or_id: &str) -> Result<()> {
        match self.docker.delete_service(name_or_id).await {
            Ok(_) => Ok(()),
            Err(err) if Error::from(err).is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn list_tasks_for_deployment(&self, service_name: &str, deployment_hash: &str) -> Result<Vec<TaskSummary>> {
        let mut filters = HashMap::new();
        filters.insert("service".to_string(), vec![service_name.to_string()]);
        filters.insert(
            "label".to_string(),
            vec![format!("{LABEL_DEPLOYMENT_HASH}={deployment_hash}")],
        );

        let tasks = self
            .docker
            .list_tasks(Some(ListTasksOptions { filters }))
            .await?;

        let summaries = tasks
            .into_iter()
            .map(|task| {
                let version_index = task.version.and_then(|v| v.index).unwrap_or(0);
                let state = task
                    .status
                    .as_ref()
                    .and_then(|s| s.state)
                    .map(TaskState::from)
                    .unwrap_or(TaskState::Orphaned);

                TaskSummary {
                    id: task.id.unwrap_or_default(),
                    container_id: task
                        .status
                        .and_then(|s| s.container_status)
                        .and_then(|c| c.container_id),
                    state,
                    desired_state: task
                        .desired_state
                        .map(|s| format!("{s:?}"))
                        .unwrap_or_default(),
                    version_index: version_index as u64,
                    deployment_hash: task
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(LABEL_DEPLOYMENT_HASH).cloned()),
                }
            })
            .collect();

        Ok(summaries)
    }

    #[instrument(skip(self, cmd))]
    async fn exec(&self, container_id: &str, cmd: Vec<String>) -> Result<ExecResult> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = self.docker.start_exec(&exec.id, None).await? {
            while let Some(chunk) = output.next().await {
                match chunk.map_err(Error::from)? {
                    LogOutput::StdOut { message } => stdout.push_str(&String::from_utf8_lossy(&message)),
                    LogOutput::StdErr { message } => stderr.push_str(&String::from_utf8_lossy(&message)),
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        Ok(ExecResult {
            exit_code,
            stdout,
            stderr,
        })
    }

    #[instrument(skip(self))]
    async fn container_hostname(&self, container_id: &str) -> Result<String> {
        let inspect = self.docker.inspect_container(container_id, None).await?;
        inspect
            .config
            .and_then(|c| c.hostname)
            .ok_or(Error::Malformed("config.hostname"))
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64_lite::Engine;
    base64_lite::engine::general_purpose::STANDARD.encode(bytes)
}

/// Minimal inline base64 shim: the docker config-create API takes base64'd
/// bytes and pulling in a whole extra crate for this single call isn't
/// warranted; kept private to this module.
mod base64_lite {
    pub mod engine {
        pub mod general_purpose {
            pub struct Standard;
            pub const STANDARD: Standard = Standard;
        }
    }

    pub trait Engine {
        fn encode(&self, input: &[u8]) -> String;
    }

    impl Engine for engine::general_purpose::Standard {
        fn encode(&self, input: &[u8]) -> String {
            const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
            let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
            for chunk in input.chunks(3) {
                let b0 = chunk[0];
                let b1 = *chunk.get(1).unwrap_or(&0);
                let b2 = *chunk.get(2).unwrap_or(&0);
                out.push(CHARS[(b0 >> 2) as usize] as char);
                out.push(CHARS[(((b0 & 0x03) << 4) | (b1 >> 4)) as usize] as char);
                out.push(if chunk.len() > 1 {
                    CHARS[(((b1 & 0x0f) << 2) | (b2 >> 6)) as usize] as char
                } else {
                    '='
                });
                out.push(if chunk.len() > 2 { CHARS[(b2 & 0x3f) as usize] as char } else { '=' });
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_maps_running_to_running() {
        assert_eq!(TaskState::from(BollardTaskState::RUNNING), TaskState::Running);
    }

    #[test]
    fn base64_roundtrip_is_well_formed() {
        let encoded = base64_encode(b"hello");
        assert_eq!(encoded, "aGVsbG8=");
    }
}
