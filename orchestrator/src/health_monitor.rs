//! Health monitor: a recurring re-poll of every service's current production
//! deployment, installed once a deployment first goes healthy.
//! A single `tokio::spawn`ed background task sweeps every current-production
//! deployment on a fixed interval rather than scheduling one timer per
//! deployment.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{instrument, warn};
use zane_common::model::DeploymentStatus;
use zane_common::Deployment;
use zane_docker::ContainerDriver;

use crate::deployment::healthcheck::poll_once;
use crate::persistence::Persistence;

/// Default tick cadence: frequent enough to catch a crashed container within
/// a few seconds, without hammering the container daemon.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(10);

pub struct HealthMonitor {
    persistence: Persistence,
    driver: Arc<dyn ContainerDriver>,
    http_client: reqwest::Client,
}

impl HealthMonitor {
    pub fn new(persistence: Persistence, driver: Arc<dyn ContainerDriver>, http_client: reqwest::Client) -> Self {
        Self { persistence, driver, http_client }
    }

    /// Runs the tick loop forever. Intended to be spawned once at startup
    /// (`tokio::spawn(monitor.run(DEFAULT_TICK_INTERVAL))`); a single tick
    /// failing is logged and never stops the loop.
    pub async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                warn!(%err, "health monitor tick failed");
            }
        }
    }

    #[instrument(skip(self))]
    async fn tick(&self) -> crate::error::Result<()> {
        self.persistence.close_stale_connections().await?;

        let deployments = self.persistence.list_current_production_deployments().await?;
        let checks = deployments
            .into_iter()
            .filter(|d| !matches!(d.status, DeploymentStatus::Sleeping | DeploymentStatus::Removed))
            .map(|d| self.check_one(d));
        join_all(checks).await;
        Ok(())
    }

    #[instrument(skip(self, deployment), fields(deployment_id = %deployment.id, service_id = %deployment.service_id))]
    async fn check_one(&self, deployment: Deployment) {
        if let Err(err) = self.check_and_persist(&deployment).await {
            warn!(%err, "health monitor check failed for deployment");
        }
    }

    async fn check_and_persist(&self, deployment: &Deployment) -> crate::error::Result<()> {
        let project_slug = self.persistence.project_slug_for_service(deployment.service_id).await?;
        let service_name = deployment.swarm_service_name(&project_slug);

        let (status, reason) = poll_once(
            self.driver.as_ref(),
            &service_name,
            &deployment.hash,
            deployment.snapshot.healthcheck.as_ref(),
            &self.http_client,
        )
        .await?;

        // Re-read under the persistence layer's own view right before
        // writing: the deployment may have been superseded, archived, or put
        // to sleep by a concurrent workflow since this tick started.
        let current = self.persistence.get_deployment(deployment.id).await?;
        if !current.is_current_production || matches!(current.status, DeploymentStatus::Sleeping | DeploymentStatus::Removed) {
            return Ok(());
        }

        self.persistence.update_status(deployment.id, status, reason.as_deref()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use zane_common::model::Slot;
    use zane_common::{DeploymentId, EnvironmentId, ProjectId, ServiceId};
    use zane_docker::{ExecResult, SwarmServiceSpec, TaskState, TaskSummary};

    use super::*;
    use crate::persistence::test_persistence;

    struct StubDriver {
        task_state: TaskState,
    }

    #[async_trait]
    impl ContainerDriver for StubDriver {
        async fn ensure_network(&self, _name: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn remove_network(&self, _name: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn ensure_volume(&self, _name: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn remove_volume(&self, _name: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn create_config(&self, _name: &str, _contents: &[u8]) -> zane_docker::Result<String> {
            Ok("cfg".to_string())
        }
        async fn remove_config(&self, _id_or_name: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn pull_image(&self, _image: &str, _username: Option<&str>, _password: Option<&str>) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn create_service(&self, _spec: SwarmServiceSpec) -> zane_docker::Result<String> {
            Ok("svc".to_string())
        }
        async fn scale_service(&self, _name_or_id: &str, _replicas: u64) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn remove_service(&self, _name_or_id: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn list_tasks_for_deployment(&self, _service_name: &str, deployment_hash: &str) -> zane_docker::Result<Vec<TaskSummary>> {
            Ok(vec![TaskSummary {
                id: "task-1".to_string(),
                container_id: Some("container-1".to_string()),
                state: self.task_state,
                desired_state: "running".to_string(),
                version_index: 1,
                deployment_hash: Some(deployment_hash.to_string()),
            }])
        }
        async fn exec(&self, _container_id: &str, _cmd: Vec<String>) -> zane_docker::Result<ExecResult> {
            unimplemented!()
        }
        async fn container_hostname(&self, _container_id: &str) -> zane_docker::Result<String> {
            Ok("host".to_string())
        }
    }

    async fn seed_current_production(persistence: &Persistence) -> Deployment {
        let project_id = ProjectId::new();
        persistence.insert_project(project_id, "acme").await.unwrap();

        let environment_id = EnvironmentId::new();
        persistence
            .insert_environment(&zane_common::model::Environment {
                id: environment_id,
                project_id,
                name: "production".to_string(),
                status: zane_common::model::EnvironmentStatus::Active,
                network_name: "net".to_string(),
                builder_name: "builder".to_string(),
                variables: Default::default(),
                preview: None,
            })
            .await
            .unwrap();

        let service_id = ServiceId::new();
        let spec = zane_common::model::ServiceSpec {
            slug: "api".to_string(),
            network_alias: "api".to_string(),
            source: zane_common::model::ServiceSource::DockerImage { image: "nginx:latest".to_string(), credentials: None },
            volumes: vec![],
            configs: vec![],
            env_vars: Default::default(),
            ports: vec![],
            urls: vec![],
            healthcheck: None,
            resource_limits: None,
            command: None,
        };
        persistence.insert_service(service_id, environment_id, "api", "dtok", &spec).await.unwrap();

        let deployment = Deployment {
            id: DeploymentId::new(),
            service_id,
            hash: "d-abc".to_string(),
            slot: Slot::Blue,
            status: DeploymentStatus::Healthy,
            status_reason: None,
            queued_at: Utc::now(),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
            build_started_at: None,
            build_finished_at: None,
            snapshot: spec,
            changes: vec![],
            is_current_production: true,
            commit_sha: None,
            commit_message: None,
            image_tag: None,
            network_alias: "blue-api".to_string(),
            reached_swarm_service: true,
        };
        persistence.insert_deployment(&deployment).await.unwrap();
        persistence.promote_to_current_production(service_id, deployment.id).await.unwrap();
        deployment
    }

    #[tokio::test]
    async fn tick_persists_unhealthy_when_task_failed() {
        let persistence = test_persistence().await;
        let deployment = seed_current_production(&persistence).await;
        let driver: Arc<dyn ContainerDriver> = Arc::new(StubDriver { task_state: TaskState::Failed });
        let monitor = HealthMonitor::new(persistence.clone(), driver, reqwest::Client::new());

        monitor.tick().await.unwrap();

        let updated = persistence.get_deployment(deployment.id).await.unwrap();
        assert_eq!(updated.status, DeploymentStatus::Unhealthy);
    }

    #[tokio::test]
    async fn tick_skips_sleeping_deployments() {
        let persistence = test_persistence().await;
        let deployment = seed_current_production(&persistence).await;
        persistence
            .update_status(deployment.id, DeploymentStatus::Sleeping, None)
            .await
            .unwrap();

        let driver: Arc<dyn ContainerDriver> = Arc::new(StubDriver { task_state: TaskState::Failed });
        let monitor = HealthMonitor::new(persistence.clone(), driver, reqwest::Client::new());
        monitor.tick().await.unwrap();

        let updated = persistence.get_deployment(deployment.id).await.unwrap();
        assert_eq!(updated.status, DeploymentStatus::Sleeping);
    }
}
