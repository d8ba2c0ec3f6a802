use std::time::Duration;

use tracing::instrument;
use zane_common::model::{DeploymentStatus, Healthcheck, HealthcheckKind};
use zane_docker::{ContainerDriver, TaskState, TaskSummary};

/// Maps the highest-version task for a deployment hash to a deployment
/// status, then runs the service's custom healthcheck (if any) when that
/// task is `running`.
#[instrument(skip(driver, http_client))]
pub async fn poll_once(
    driver: &dyn ContainerDriver,
    service_name: &str,
    deployment_hash: &str,
    healthcheck: Option<&Healthcheck>,
    http_client: &reqwest::Client,
) -> zane_docker::Result<(DeploymentStatus, Option<String>)> {
    let tasks = driver.list_tasks_for_deployment(service_name, deployment_hash).await?;

    let Some(task) = latest_task(&tasks) else {
        return Ok((DeploymentStatus::Unhealthy, Some("service is down".to_string())));
    };

    let running_count = tasks.iter().filter(|t| t.state == TaskState::Running).count();

    let base_status = match task.state {
        TaskState::New
        | TaskState::Pending
        | TaskState::Assigned
        | TaskState::Accepted
        | TaskState::Ready
        | TaskState::Preparing
        | TaskState::Starting => {
            if running_count > 1 {
                DeploymentStatus::Restarting
            } else {
                DeploymentStatus::Starting
            }
        }
        TaskState::Running => DeploymentStatus::Healthy,
        TaskState::Complete | TaskState::Failed | TaskState::Shutdown | TaskState::Rejected | TaskState::Orphaned | TaskState::Remove => {
            DeploymentStatus::Unhealthy
        }
    };

    if base_status != DeploymentStatus::Healthy {
        return Ok((base_status, None));
    }

    let Some(healthcheck) = healthcheck else {
        return Ok((DeploymentStatus::Healthy, None));
    };

    let Some(container_id) = &task.container_id else {
        return Ok((DeploymentStatus::Unhealthy, Some("no running container for task".to_string())));
    };

    run_custom_probe(driver, container_id, healthcheck, http_client).await
}

fn latest_task(tasks: &[TaskSummary]) -> Option<&TaskSummary> {
    tasks.iter().max_by_key(|t| t.version_index)
}

async fn run_custom_probe(
    driver: &dyn ContainerDriver,
    container_id: &str,
    healthcheck: &Healthcheck,
    http_client: &reqwest::Client,
) -> zane_docker::Result<(DeploymentStatus, Option<String>)> {
    match healthcheck.kind {
        HealthcheckKind::Command => {
            let cmd: Vec<String> = shell_words(&healthcheck.value);
            let result = driver.exec(container_id, cmd).await?;
            if result.exit_code == 0 {
                Ok((DeploymentStatus::Healthy, None))
            } else {
                Ok((DeploymentStatus::Unhealthy, Some(format!("{}{}", result.stdout, result.stderr))))
            }
        }
        HealthcheckKind::HttpPath => {
            let hostname = driver.container_hostname(container_id).await?;
            let port = healthcheck.associated_port.unwrap_or(80);
            let url = format!("http://{hostname}:{port}{}", healthcheck.value);
            let timeout = Duration::from_secs(healthcheck.timeout_seconds as u64);
            match http_client.get(&url).timeout(timeout).send().await {
                Ok(response) if response.status().is_success() => Ok((DeploymentStatus::Healthy, None)),
                Ok(response) => Ok((DeploymentStatus::Unhealthy, Some(format!("http status {}", response.status())))),
                Err(err) => Ok((DeploymentStatus::Unhealthy, Some(err.to_string()))),
            }
        }
    }
}

/// Minimal whitespace-delimited command split; the scripts materialised for
/// command healthchecks don't use quoting.
pub(crate) fn shell_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(state: TaskState, version_index: u64, container_id: Option<&str>) -> TaskSummary {
        TaskSummary {
            id: format!("task-{version_index}"),
            container_id: container_id.map(str::to_string),
            state,
            desired_state: "running".to_string(),
            version_index,
            deployment_hash: Some("d-abc".to_string()),
        }
    }

    #[test]
    fn latest_task_picks_highest_version_index() {
        let tasks = vec![task(TaskState::Running, 1, None), task(TaskState::Starting, 3, None)];
        assert_eq!(latest_task(&tasks).unwrap().version_index, 3);
    }

    #[test]
    fn shell_words_splits_on_whitespace() {
        assert_eq!(shell_words("curl -f http://localhost"), vec!["curl", "-f", "http://localhost"]);
    }
}
