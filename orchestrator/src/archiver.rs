//! Tears down the external resources a service/environment/project holds
//! before moving its row into an archive table.

use serde_json::json;
use zane_common::{EnvironmentId, ProjectId, ServiceId};
use zane_docker::ContainerDriver;
use zane_proxy::{deployment_url_route_id, service_url_route_id, ProxyAdminClient};

use crate::deployment::workflow::{config_name, volume_name};
use crate::persistence::Persistence;

pub struct Archiver<'a> {
    persistence: &'a Persistence,
    driver: &'a dyn ContainerDriver,
    proxy: &'a ProxyAdminClient,
    root_domain: &'a str,
}

impl<'a> Archiver<'a> {
    pub fn new(persistence: &'a Persistence, driver: &'a dyn ContainerDriver, proxy: &'a ProxyAdminClient, root_domain: &'a str) -> Self {
        Self { persistence, driver, proxy, root_domain }
    }

    /// Archives one service: unexposes its URLs, drops it from the health
    /// monitor's rotation, scales and removes its swarm service, then
    /// deletes its owned volumes and configs. A service that was never
    /// deployed skips straight to dropping the record.
    pub async fn archive_service(&self, service_id: ServiceId) -> crate::error::Result<()> {
        let service = self.persistence.get_service(service_id).await?;
        let Some(latest) = self.persistence.latest_deployment(service_id).await? else {
            return self.persistence.archive_service(service_id, &json!({"ever_deployed": false})).await;
        };

        let project_slug = self.persistence.project_slug_for_service(service_id).await?;

        let mut removed_urls = Vec::new();
        for url in &service.spec.urls {
            let route_id = service_url_route_id(&service_id.to_string(), &url.domain, &url.base_path);
            self.proxy.delete_route(&route_id).await?;
            removed_urls.push(route_id);
        }
        let preview_domain = format!("{}.{}", latest.hash, self.root_domain);
        let preview_route_id = deployment_url_route_id(&latest.hash, &preview_domain);
        self.proxy.delete_route(&preview_route_id).await?;

        self.persistence.clear_current_production(service_id).await?;

        let swarm_service_removed = if latest.reached_swarm_service {
            let name = latest.swarm_service_name(&project_slug);
            self.driver.scale_service(&name, 0).await?;
            self.driver.remove_service(&name).await?;
            Some(name)
        } else {
            None
        };

        let mut removed_volumes = Vec::new();
        for volume in &service.spec.volumes {
            let name = volume_name(&project_slug, service_id, &volume.name);
            self.driver.remove_volume(&name).await?;
            removed_volumes.push(name);
        }

        let mut removed_configs = Vec::new();
        for config in &service.spec.configs {
            let name = config_name(&project_slug, service_id, &config.name);
            self.driver.remove_config(&name).await?;
            removed_configs.push(name);
        }

        let manifest = json!({
            "ever_deployed": true,
            "removed_url_routes": removed_urls,
            "removed_preview_route": preview_route_id,
            "removed_swarm_service": swarm_service_removed,
            "removed_volumes": removed_volumes,
            "removed_configs": removed_configs,
        });
        self.persistence.archive_service(service_id, &manifest).await
    }

    /// Archives every service in the environment, deletes its builder, then
    /// its overlay network.
    pub async fn archive_environment(&self, environment_id: EnvironmentId) -> crate::error::Result<()> {
        let environment = self.persistence.get_environment(environment_id).await?;
        for service_id in self.persistence.list_services_for_environment(environment_id).await? {
            self.archive_service(service_id).await?;
        }
        zane_builder::delete_builder(&environment_id.to_string())
            .await
            .map_err(crate::error::Error::Build)?;
        self.driver.remove_network(&environment.network_name).await?;
        self.persistence.archive_environment(environment_id).await
    }

    /// Archives every environment in the project.
    pub async fn archive_project(&self, project_id: ProjectId) -> crate::error::Result<()> {
        for environment_id in self.persistence.list_environments_for_project(project_id).await? {
            self.archive_environment(environment_id).await?;
        }
        self.persistence.archive_project(project_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use zane_common::model::{AccessMode, Environment, EnvironmentStatus, ServiceSource, Volume};
    use zane_common::{DeploymentId, EnvironmentId, ProjectId, VolumeId};
    use zane_docker::{ExecResult, SwarmServiceSpec, TaskSummary};

    use super::*;
    use crate::persistence::test_persistence;

    struct CountingDriver {
        removed_services: AtomicUsize,
        removed_volumes: AtomicUsize,
        removed_networks: AtomicUsize,
    }

    impl CountingDriver {
        fn new() -> Self {
            Self {
                removed_services: AtomicUsize::new(0),
                removed_volumes: AtomicUsize::new(0),
                removed_networks: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ContainerDriver for CountingDriver {
        async fn ensure_network(&self, _name: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn remove_network(&self, _name: &str) -> zane_docker::Result<()> {
            self.removed_networks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn ensure_volume(&self, _name: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn remove_volume(&self, _name: &str) -> zane_docker::Result<()> {
            self.removed_volumes.fetch_add(1, Ordering::SeqCst);
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
            self.removed_services.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn list_tasks_for_deployment(&self, _service_name: &str, _deployment_hash: &str) -> zane_docker::Result<Vec<TaskSummary>> {
            Ok(vec![])
        }
        async fn exec(&self, _container_id: &str, _cmd: Vec<String>) -> zane_docker::Result<ExecResult> {
            unimplemented!()
        }
        async fn container_hostname(&self, _container_id: &str) -> zane_docker::Result<String> {
            Ok("host".to_string())
        }
    }

    /// A proxy admin server that reports every route as already absent, so
    /// `delete_route` resolves as a no-op the same way it would once a
    /// service's routes have already been cleaned up.
    async fn empty_proxy_server() -> wiremock::MockServer {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    }

    async fn seed_deployed_service(persistence: &Persistence) -> (ProjectId, EnvironmentId, ServiceId) {
        let project_id = ProjectId::new();
        persistence.insert_project(project_id, "acme").await.unwrap();

        let environment_id = EnvironmentId::new();
        persistence
            .insert_environment(&Environment {
                id: environment_id,
                project_id,
                name: "production".to_string(),
                status: EnvironmentStatus::Active,
                network_name: "net-acme-prod".to_string(),
                builder_name: "builder-acme-prod".to_string(),
                variables: Default::default(),
                preview: None,
            })
            .await
            .unwrap();

        let service_id = ServiceId::new();
        let spec = zane_common::model::ServiceSpec {
            slug: "api".to_string(),
            network_alias: "api".to_string(),
            source: ServiceSource::DockerImage { image: "nginx:latest".to_string(), credentials: None },
            volumes: vec![Volume {
                id: VolumeId::new(),
                service_id,
                name: "data".to_string(),
                container_path: "/data".to_string(),
                mode: AccessMode::Rw,
                host_path: None,
            }],
            configs: vec![],
            env_vars: Default::default(),
            ports: vec![],
            urls: vec![],
            healthcheck: None,
            resource_limits: None,
            command: None,
        };
        persistence.insert_service(service_id, environment_id, "api", "dtok", &spec).await.unwrap();

        let deployment = zane_common::Deployment {
            id: DeploymentId::new(),
            service_id,
            hash: "d-abc".to_string(),
            slot: zane_common::model::Slot::Blue,
            status: zane_common::model::DeploymentStatus::Healthy,
            status_reason: None,
            queued_at: chrono::Utc::now(),
            started_at: Some(chrono::Utc::now()),
            finished_at: Some(chrono::Utc::now()),
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

        (project_id, environment_id, service_id)
    }

    #[tokio::test]
    async fn archive_service_removes_swarm_service_and_volumes() {
        let persistence = test_persistence().await;
        let (_project_id, _environment_id, service_id) = seed_deployed_service(&persistence).await;
        let driver = CountingDriver::new();
        let server = empty_proxy_server().await;
        let proxy = ProxyAdminClient::new(reqwest::Client::new(), server.uri());
        let archiver = Archiver::new(&persistence, &driver, &proxy, "example.com");

        archiver.archive_service(service_id).await.unwrap();

        assert_eq!(driver.removed_volumes.load(Ordering::SeqCst), 1);
        assert_eq!(driver.removed_services.load(Ordering::SeqCst), 1);

        let current_production = persistence.current_production_deployment(service_id).await.unwrap();
        assert!(current_production.is_none());
    }

    #[tokio::test]
    async fn archive_service_skips_teardown_for_never_deployed_service() {
        let persistence = test_persistence().await;
        let project_id = ProjectId::new();
        persistence.insert_project(project_id, "acme").await.unwrap();
        let environment_id = EnvironmentId::new();
        persistence
            .insert_environment(&Environment {
                id: environment_id,
                project_id,
                name: "production".to_string(),
                status: EnvironmentStatus::Active,
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
            source: ServiceSource::DockerImage { image: "nginx:latest".to_string(), credentials: None },
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

        let driver = CountingDriver::new();
        let server = empty_proxy_server().await;
        let proxy = ProxyAdminClient::new(reqwest::Client::new(), server.uri());
        let archiver = Archiver::new(&persistence, &driver, &proxy, "example.com");

        archiver.archive_service(service_id).await.unwrap();

        assert_eq!(driver.removed_services.load(Ordering::SeqCst), 0);
    }
}
