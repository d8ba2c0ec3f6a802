use std::process::Stdio;

use tokio::process::Command;
use tracing::instrument;

use crate::error::{Error, Result};

pub const DOCKER_BINARY_PATH: &str = "/usr/bin/docker";

pub fn builder_name_for_environment(environment_id: &str) -> String {
    format!("builder-zane-{environment_id}")
}

/// Ensures a buildkit builder exists for the environment, attached to its
/// overlay network, creating it on demand.
#[instrument]
pub async fn ensure_builder(environment_id: &str, network_name: &str) -> Result<()> {
    let name = builder_name_for_environment(environment_id);

    let inspect = Command::new(DOCKER_BINARY_PATH)
        .args(["buildx", "inspect", &name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|err| Error::BuildFailed(err.to_string()))?;

    if inspect.success() {
        return Ok(());
    }

    let create = Command::new(DOCKER_BINARY_PATH)
        .args(["buildx", "create", "--name", &name, "--driver", "docker-container", "--driver-opt"])
        .arg(format!("network={network_name}"))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .status()
        .await
        .map_err(|err| Error::BuildFailed(err.to_string()))?;

    if !create.success() {
        return Err(Error::BuildFailed(format!("failed to create buildkit builder {name}")));
    }

    Ok(())
}

#[instrument]
pub async fn delete_builder(environment_id: &str) -> Result<()> {
    let name = builder_name_for_environment(environment_id);

    let inspect = Command::new(DOCKER_BINARY_PATH)
        .args(["buildx", "inspect", &name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|err| Error::BuildFailed(err.to_string()))?;

    if !inspect.success() {
        return Ok(());
    }

    let _ = Command::new(DOCKER_BINARY_PATH)
        .args(["buildx", "rm", "-f", &name])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .status()
        .await
        .map_err(|err| Error::BuildFailed(err.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_name_is_namespaced_per_environment() {
        assert_eq!(builder_name_for_environment("env_123"), "builder-zane-env_123");
    }
}
