use zane_common::log::LogRecorder;
use zane_common::EnvironmentId;
use zane_docker::ContainerDriver;
use zane_proxy::ProxyAdminClient;

use crate::persistence::Persistence;
use crate::semaphore::SemaphoreRegistry;

/// Everything a deployment workflow run needs, borrowed for the duration of
/// one `run` call, bundled up the same way a set of activities shares one
/// context rather than each taking its own handful of arguments.
pub struct DeploymentContext<'a> {
    pub persistence: &'a Persistence,
    pub driver: &'a dyn ContainerDriver,
    pub proxy: &'a ProxyAdminClient,
    pub semaphore: &'a SemaphoreRegistry,
    /// Build log lines are pushed here explicitly (they come from a streamed
    /// subprocess, not a tracing event); everything else reaches the sink
    /// ambiently through `LogSinkLayer` once the `server` binary installs it.
    pub log_recorder: &'a dyn LogRecorder,
    pub http_client: reqwest::Client,
    pub root_domain: String,
    pub project_slug: String,
    pub environment_id: EnvironmentId,
    pub environment_network_name: String,
    pub git_token: Option<String>,
    /// Internal hostname of the control plane's own frontend service,
    /// dialled by per-deployment preview routes to gate them behind a
    /// logged-in session.
    pub frontend_internal_hostname: String,
}
