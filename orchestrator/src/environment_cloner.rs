//! Copies a source environment's services into a freshly created target
//! environment as pending changes, the same way an operator would
//! hand-build each service through the change ledger one field at a time —
//! just automated and done in bulk.

use serde_json::{json, Value};
use ulid::Ulid;
use zane_common::model::{ChangeType, Environment, EnvironmentStatus};
use zane_common::{DeploymentId, EnvironmentId, Error, ErrorKind, ServiceId};
use zane_docker::ContainerDriver;

use crate::ledger::{ChangeLedger, NewChange};
use crate::persistence::Persistence;

pub struct CloneRequest {
    pub source_environment_id: EnvironmentId,
    pub target_name: String,
    /// When true, every cloned service is immediately materialised into a
    /// queued deployment (via the change ledger's `apply`), ready for a
    /// caller to hand to `deployment::workflow::run`.
    pub deploy_services: bool,
}

pub struct ClonedService {
    pub source_service_id: ServiceId,
    pub new_service_id: ServiceId,
    /// Populated only when the request asked for `deploy_services`.
    pub queued_deployment_id: Option<DeploymentId>,
}

pub struct CloneOutcome {
    pub target_environment_id: EnvironmentId,
    pub services: Vec<ClonedService>,
}

pub struct EnvironmentCloner<'a> {
    persistence: &'a Persistence,
    driver: &'a dyn ContainerDriver,
    root_domain: &'a str,
}

impl<'a> EnvironmentCloner<'a> {
    pub fn new(persistence: &'a Persistence, driver: &'a dyn ContainerDriver, root_domain: &'a str) -> Self {
        Self { persistence, driver, root_domain }
    }

    pub async fn clone_environment(&self, request: CloneRequest) -> crate::error::Result<CloneOutcome> {
        let source = self.persistence.get_environment(request.source_environment_id).await?;

        if self
            .persistence
            .environment_name_taken(source.project_id, &request.target_name)
            .await?
        {
            return Err(invalid(format!("environment name {} already taken", request.target_name)).into());
        }

        let target_id = EnvironmentId::new();
        let network_name = format!("net-{}-{}", source.project_id, target_id);
        let builder_name = zane_builder::builder_name_for_environment(&target_id.to_string());

        self.driver.ensure_network(&network_name).await?;
        zane_builder::ensure_builder(&target_id.to_string(), &network_name)
            .await
            .map_err(crate::error::Error::Build)?;

        let target = Environment {
            id: target_id,
            project_id: source.project_id,
            name: request.target_name,
            status: EnvironmentStatus::Active,
            network_name,
            builder_name,
            variables: source.variables.clone(),
            preview: None,
        };
        self.persistence.insert_environment(&target).await?;

        let mut services = Vec::new();
        for source_service_id in self.persistence.list_services_for_environment(request.source_environment_id).await? {
            let cloned = self.clone_service(source_service_id, target_id, request.deploy_services).await?;
            services.push(cloned);
        }

        Ok(CloneOutcome { target_environment_id: target_id, services })
    }

    async fn clone_service(
        &self,
        source_service_id: ServiceId,
        target_environment_id: EnvironmentId,
        deploy_services: bool,
    ) -> crate::error::Result<ClonedService> {
        let source = self.persistence.get_service(source_service_id).await?;
        let new_service_id = ServiceId::new();
        let deploy_token = format!("dtok_{}", Ulid::new());

        let bootstrap = zane_common::model::ServiceSpec {
            slug: source.spec.slug.clone(),
            network_alias: source.spec.network_alias.clone(),
            source: source.spec.source.clone(),
            volumes: vec![],
            configs: vec![],
            env_vars: Default::default(),
            ports: vec![],
            urls: vec![],
            healthcheck: None,
            resource_limits: None,
            command: None,
        };
        self.persistence
            .insert_service(new_service_id, target_environment_id, &source.spec.slug, &deploy_token, &bootstrap)
            .await?;

        let ledger = ChangeLedger::new(self.persistence);

        ledger
            .request_change(new_service_id, add_change("source", json!(source.spec.source)))
            .await?;
        if let Some(command) = &source.spec.command {
            ledger
                .request_change(new_service_id, add_change("command", json!(command)))
                .await?;
        }
        if let Some(limits) = &source.spec.resource_limits {
            ledger
                .request_change(new_service_id, add_change("resource_limits", json!(limits)))
                .await?;
        }
        if let Some(healthcheck) = &source.spec.healthcheck {
            ledger
                .request_change(new_service_id, add_change("healthcheck", json!(healthcheck)))
                .await?;
        }
        for (key, value) in &source.spec.env_vars {
            ledger
                .request_change(new_service_id, NewChange {
                    field: "env_var".to_string(),
                    change_type: ChangeType::Add,
                    new_value: json!(value),
                    old_value: None,
                    item_id: Some(key.clone()),
                })
                .await?;
        }
        for volume in &source.spec.volumes {
            ledger
                .request_change(
                    new_service_id,
                    add_change(
                        "volume",
                        json!({
                            "name": volume.name,
                            "container_path": volume.container_path,
                            "mode": volume.mode,
                            "host_path": volume.host_path,
                        }),
                    ),
                )
                .await?;
        }
        for config in &source.spec.configs {
            ledger
                .request_change(
                    new_service_id,
                    add_change(
                        "config",
                        json!({
                            "name": config.name,
                            "contents": config.contents,
                            "mount_path": config.mount_path,
                            "language_hint": config.language_hint,
                        }),
                    ),
                )
                .await?;
        }
        // Host-mapped ports would collide with the source's own binding on
        // the same docker host, so only forwarded-only ports are copied.
        for port in source.spec.ports.iter().filter(|p| p.host_port.is_none()) {
            ledger
                .request_change(
                    new_service_id,
                    add_change("port", json!({"host_port": Value::Null, "forwarded_port": port.forwarded_port})),
                )
                .await?;
        }
        for url in &source.spec.urls {
            if url.is_redirect() {
                continue;
            }
            let domain = unique_preview_domain(&source.spec.slug, self.root_domain);
            ledger
                .request_change(
                    new_service_id,
                    add_change(
                        "url",
                        json!({
                            "domain": domain,
                            "base_path": url.base_path,
                            "strip_prefix": url.strip_prefix,
                            "associated_port": url.associated_port,
                            "redirect": Value::Null,
                        }),
                    ),
                )
                .await?;
        }

        let queued_deployment_id = if deploy_services {
            let (_, deployment) = ledger.apply(new_service_id).await?;
            Some(deployment.id)
        } else {
            None
        };

        Ok(ClonedService { source_service_id, new_service_id, queued_deployment_id })
    }
}

fn add_change(field: &str, new_value: Value) -> NewChange {
    NewChange {
        field: field.to_string(),
        change_type: ChangeType::Add,
        new_value,
        old_value: None,
        item_id: None,
    }
}

/// Generates a domain guaranteed not to collide with the source's own URL,
/// the same shape as the deployment workflow's own preview routes
/// (`{token}.{root_domain}`) but keyed to the service slug for readability.
fn unique_preview_domain(slug: &str, root_domain: &str) -> String {
    let token = Ulid::new().to_string().to_lowercase();
    let short = &token[token.len() - 8..];
    format!("{slug}-{short}.{root_domain}")
}

fn invalid(message: impl Into<String>) -> Error {
    Error::custom(ErrorKind::InvalidChange, message.into())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use zane_common::model::{AccessMode, Healthcheck, HealthcheckKind, ServiceSource, Volume};
    use zane_common::{EnvironmentId, ProjectId, VolumeId};
    use zane_docker::BollardDriver;

    use super::*;
    use crate::persistence::test_persistence;

    struct NoopDriver;

    #[async_trait::async_trait]
    impl ContainerDriver for NoopDriver {
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
        async fn create_service(&self, _spec: zane_docker::SwarmServiceSpec) -> zane_docker::Result<String> {
            Ok("svc".to_string())
        }
        async fn scale_service(&self, _name_or_id: &str, _replicas: u64) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn remove_service(&self, _name_or_id: &str) -> zane_docker::Result<()> {
            Ok(())
        }
        async fn list_tasks_for_deployment(&self, _service_name: &str, _deployment_hash: &str) -> zane_docker::Result<Vec<zane_docker::TaskSummary>> {
            Ok(vec![])
        }
        async fn exec(&self, _container_id: &str, _cmd: Vec<String>) -> zane_docker::Result<zane_docker::ExecResult> {
            unimplemented!()
        }
        async fn container_hostname(&self, _container_id: &str) -> zane_docker::Result<String> {
            Ok("host".to_string())
        }
    }

    async fn seed_environment_with_service(persistence: &Persistence) -> EnvironmentId {
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
                variables: BTreeMap::new(),
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
                mode: AccessMode::ReadWrite,
                host_path: None,
            }],
            configs: vec![],
            env_vars: BTreeMap::from([("FOO".to_string(), "bar".to_string())]),
            ports: vec![],
            urls: vec![],
            healthcheck: Some(Healthcheck {
                kind: HealthcheckKind::Http,
                value: "/healthz".to_string(),
                timeout_seconds: 5,
                interval_seconds: 30,
                associated_port: None,
            }),
            resource_limits: None,
            command: None,
        };
        persistence.insert_service(service_id, environment_id, "api", "dtok_source", &spec).await.unwrap();

        environment_id
    }

    #[tokio::test]
    async fn clone_environment_copies_services_as_pending_changes() {
        let persistence = test_persistence().await;
        let source_environment_id = seed_environment_with_service(&persistence).await;
        let driver: &dyn ContainerDriver = &NoopDriver;
        let cloner = EnvironmentCloner::new(&persistence, driver, "example.com");

        let outcome = cloner
            .clone_environment(CloneRequest {
                source_environment_id,
                target_name: "staging".to_string(),
                deploy_services: false,
            })
            .await
            .unwrap();

        assert_eq!(outcome.services.len(), 1);
        let cloned = &outcome.services[0];
        assert!(cloned.queued_deployment_id.is_none());

        let pending = persistence.list_pending_changes(cloned.new_service_id).await.unwrap();
        let fields: Vec<&str> = pending.iter().map(|c| c.field.as_str()).collect();
        assert!(fields.contains(&"source"));
        assert!(fields.contains(&"env_var"));
        assert!(fields.contains(&"volume"));
        assert!(fields.contains(&"healthcheck"));
    }

    #[tokio::test]
    async fn clone_environment_rejects_name_conflict() {
        let persistence = test_persistence().await;
        let source_environment_id = seed_environment_with_service(&persistence).await;
        let driver: &dyn ContainerDriver = &NoopDriver;
        let cloner = EnvironmentCloner::new(&persistence, driver, "example.com");

        let result = cloner
            .clone_environment(CloneRequest {
                source_environment_id,
                target_name: "production".to_string(),
                deploy_services: false,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn clone_environment_with_deploy_services_materialises_a_deployment() {
        let persistence = test_persistence().await;
        let source_environment_id = seed_environment_with_service(&persistence).await;
        let driver: &dyn ContainerDriver = &NoopDriver;
        let cloner = EnvironmentCloner::new(&persistence, driver, "example.com");

        let outcome = cloner
            .clone_environment(CloneRequest {
                source_environment_id,
                target_name: "staging".to_string(),
                deploy_services: true,
            })
            .await
            .unwrap();

        assert!(outcome.services[0].queued_deployment_id.is_some());
        let _ = BollardDriver::connect_local; // keep import honest without needing a real daemon in this test
    }
}
