mod merge;
pub mod registry_probe;
pub mod validate;

use chrono::Utc;
use serde_json::Value;
use zane_common::model::{ChangeType, ServiceSource, Slot};
use zane_common::{generate_deployment_hash, Change, ChangeId, Deployment, DeploymentId, Error, ErrorKind, ServiceId};

use crate::persistence::Persistence;
use registry_probe::RegistryProbe;

/// A not-yet-persisted mutation, as submitted by a caller of `request_change`.
pub struct NewChange {
    pub field: String,
    pub change_type: ChangeType,
    pub new_value: Value,
    pub old_value: Option<Value>,
    pub item_id: Option<String>,
}

pub struct ChangeLedger<'a> {
    persistence: &'a Persistence,
    registry_probe: Option<&'a (dyn RegistryProbe + Sync)>,
}

impl<'a> ChangeLedger<'a> {
    pub fn new(persistence: &'a Persistence) -> Self {
        Self {
            persistence,
            registry_probe: None,
        }
    }

    pub fn with_registry_probe(mut self, probe: &'a (dyn RegistryProbe + Sync)) -> Self {
        self.registry_probe = Some(probe);
        self
    }

    /// Replays every already-accepted pending change onto the service's
    /// currently-applied spec, in insertion order, to get the effective
    /// in-flight state a new change is validated against.
    async fn effective_spec(&self, service_id: ServiceId) -> crate::error::Result<zane_common::model::ServiceSpec> {
        let service = self.persistence.get_service(service_id).await?;
        let pending = self.persistence.list_pending_changes(service_id).await?;
        let mut spec = service.spec;
        for change in &pending {
            merge::apply_one(
                &mut spec,
                service_id,
                &change.field,
                change.change_type,
                change.item_id.as_deref(),
                &change.new_value,
            )?;
        }
        Ok(spec)
    }

    pub async fn request_change(&self, service_id: ServiceId, change: NewChange) -> crate::error::Result<Change> {
        let mut spec = self.effective_spec(service_id).await?;

        merge::apply_one(
            &mut spec,
            service_id,
            &change.field,
            change.change_type,
            change.item_id.as_deref(),
            &change.new_value,
        )?;

        validate::validate_spec_invariants(&spec)?;
        validate::validate_against_other_services(self.persistence, service_id, &spec).await?;

        if change.field == "source" {
            if let Ok(ServiceSource::DockerImage {
                image,
                credentials: Some(credentials),
            }) = serde_json::from_value::<ServiceSource>(change.new_value.clone())
            {
                if let Some(probe) = self.registry_probe {
                    if !probe.probe(&image, Some(&credentials)).await {
                        return Err(invalid(format!("registry probe failed for image {image}")).into());
                    }
                }
            }
        }

        let record = Change {
            id: ChangeId::new(),
            service_id,
            field: change.field,
            change_type: change.change_type,
            new_value: change.new_value,
            old_value: change.old_value,
            item_id: change.item_id,
            applied: false,
            deployment_id: None,
            created_at: Utc::now(),
        };
        self.persistence.insert_change(&record).await?;
        Ok(record)
    }

    /// Removes a pending change. Rejects removal when doing so would be
    /// incoherent (the change does not exist, or has already been applied).
    pub async fn cancel_change(&self, service_id: ServiceId, change_id: ChangeId) -> crate::error::Result<()> {
        let pending = self.persistence.list_pending_changes(service_id).await?;
        if !pending.iter().any(|c| c.id == change_id) {
            return Err(Error::custom(ErrorKind::NotFound, format!("change {change_id} not found or already applied")).into());
        }
        self.persistence.cancel_change(change_id).await?;
        Ok(())
    }

    /// Merges every pending change into the service's applied spec, freezes
    /// it as a Snapshot inside a new Deployment, and flips every consumed
    /// change to `applied`. All in one transaction-shaped sequence: on any
    /// failure nothing is marked applied and no deployment is created.
    pub async fn apply(&self, service_id: ServiceId) -> crate::error::Result<(zane_common::model::Snapshot, Deployment)> {
        let service = self.persistence.get_service(service_id).await?;
        let pending = self.persistence.list_pending_changes(service_id).await?;

        let mut snapshot = service.spec.clone();
        for change in &pending {
            merge::apply_one(
                &mut snapshot,
                service_id,
                &change.field,
                change.change_type,
                change.item_id.as_deref(),
                &change.new_value,
            )?;
        }
        snapshot = auto_default_url(snapshot, service_id)?;
        validate::validate_spec_invariants(&snapshot)?;

        let is_git = matches!(snapshot.source, ServiceSource::Git { .. });
        // Successive production deployments alternate slot unless the
        // preceding attempt (not necessarily the current-production one)
        // failed before ever creating a swarm service, in which case its slot
        // is reused rather than left to collide with whatever is still
        // running in production.
        let previous = self.persistence.latest_deployment(service_id).await?;
        let slot = match &previous {
            None => Slot::Blue,
            Some(previous) if !previous.reached_swarm_service && previous.status.is_failed_without_service() => previous.slot,
            Some(previous) => previous.slot.alternate(),
        };
        let network_alias = slot.qualify_alias(&snapshot.network_alias);

        let deployment = Deployment {
            id: DeploymentId::new(),
            service_id,
            hash: generate_deployment_hash(is_git),
            slot,
            status: zane_common::model::DeploymentStatus::Queued,
            status_reason: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            build_started_at: None,
            build_finished_at: None,
            snapshot: snapshot.clone(),
            changes: pending.iter().map(|c| c.id).collect(),
            is_current_production: false,
            commit_sha: match &snapshot.source {
                ServiceSource::Git { commit_sha, .. } => commit_sha.clone(),
                _ => None,
            },
            commit_message: None,
            image_tag: None,
            network_alias,
            reached_swarm_service: false,
        };

        self.persistence.apply_service_spec(service_id, &snapshot).await?;
        self.persistence.insert_deployment(&deployment).await?;
        let change_ids: Vec<ChangeId> = pending.iter().map(|c| c.id).collect();
        self.persistence.mark_changes_applied(&change_ids, deployment.id).await?;

        Ok((snapshot, deployment))
    }
}

/// Applying a forwarded-only HTTP port with no URL yet declared auto-creates
/// a default URL at `$service_slug-$env.$root_domain`.
///
/// `root_domain`/environment name aren't known at this layer, so the
/// generated host uses the service's network alias as a stand-in label; the
/// deployment workflow rewrites it to the real root domain once it has the
/// environment in scope. Tracked as a resolved Open Question in DESIGN.md.
fn auto_default_url(mut spec: zane_common::model::ServiceSpec, service_id: ServiceId) -> crate::error::Result<zane_common::model::ServiceSpec> {
    let needs_default = spec.urls.is_empty()
        && spec
            .ports
            .iter()
            .any(|p| p.is_http_only() && p.forwarded_port > 0);
    if !needs_default {
        return Ok(spec);
    }
    let forwarded_port = spec
        .ports
        .iter()
        .find(|p| p.is_http_only() && p.forwarded_port > 0)
        .map(|p| p.forwarded_port)
        .expect("needs_default only set when such a port exists");

    spec.urls.push(zane_common::model::UrlRoute {
        id: zane_common::UrlId::new(),
        service_id,
        domain: format!("{}.localhost", spec.slug),
        base_path: "/".to_string(),
        strip_prefix: true,
        associated_port: forwarded_port,
        redirect: None,
    });
    Ok(spec)
}

fn invalid(message: impl Into<String>) -> Error {
    Error::custom(ErrorKind::InvalidChange, message.into())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use zane_common::model::{PortMapping, ServiceSpec};
    use zane_common::{EnvironmentId, PortId};

    use super::*;
    use crate::persistence::test_persistence;

    async fn seed_service(persistence: &Persistence, spec: ServiceSpec) -> ServiceId {
        let environment_id = EnvironmentId::new();
        let service_id = ServiceId::new();
        persistence
            .insert_service(service_id, environment_id, &spec.slug, "token", &spec)
            .await
            .unwrap();
        service_id
    }

    fn bare_spec(slug: &str) -> ServiceSpec {
        ServiceSpec {
            slug: slug.to_string(),
            network_alias: slug.to_string(),
            source: ServiceSource::DockerImage {
                image: "nginx:latest".to_string(),
                credentials: None,
            },
            volumes: vec![],
            configs: vec![],
            env_vars: BTreeMap::new(),
            ports: vec![],
            urls: vec![],
            healthcheck: None,
            resource_limits: None,
            command: None,
        }
    }

    #[tokio::test]
    async fn request_change_rejects_duplicate_env_var_add() {
        let persistence = test_persistence().await;
        let mut spec = bare_spec("api");
        spec.env_vars.insert("FOO".into(), "bar".into());
        let service_id = seed_service(&persistence, spec).await;

        let ledger = ChangeLedger::new(&persistence);
        let result = ledger
            .request_change(
                service_id,
                NewChange {
                    field: "env_var".into(),
                    change_type: ChangeType::Add,
                    new_value: Value::String("baz".into()),
                    old_value: None,
                    item_id: Some("FOO".into()),
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn request_change_accepts_new_env_var() {
        let persistence = test_persistence().await;
        let service_id = seed_service(&persistence, bare_spec("api")).await;

        let ledger = ChangeLedger::new(&persistence);
        let change = ledger
            .request_change(
                service_id,
                NewChange {
                    field: "env_var".into(),
                    change_type: ChangeType::Add,
                    new_value: Value::String("bar".into()),
                    old_value: None,
                    item_id: Some("FOO".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(change.field, "env_var");
    }

    #[tokio::test]
    async fn apply_merges_pending_changes_into_a_deployment() {
        let persistence = test_persistence().await;
        let service_id = seed_service(&persistence, bare_spec("api")).await;

        let ledger = ChangeLedger::new(&persistence);
        ledger
            .request_change(
                service_id,
                NewChange {
                    field: "env_var".into(),
                    change_type: ChangeType::Add,
                    new_value: Value::String("bar".into()),
                    old_value: None,
                    item_id: Some("FOO".into()),
                },
            )
            .await
            .unwrap();

        let (snapshot, deployment) = ledger.apply(service_id).await.unwrap();
        assert_eq!(snapshot.env_vars.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(deployment.slot, Slot::Blue);
        assert_eq!(deployment.changes.len(), 1);

        let pending_after = persistence.list_pending_changes(service_id).await.unwrap();
        assert!(pending_after.is_empty());
    }

    #[tokio::test]
    async fn apply_auto_creates_default_url_for_http_only_port() {
        let persistence = test_persistence().await;
        let mut spec = bare_spec("web");
        spec.ports.push(PortMapping {
            id: PortId::new(),
            service_id: ServiceId::new(),
            host_port: None,
            forwarded_port: 8080,
        });
        let service_id = seed_service(&persistence, spec).await;

        let ledger = ChangeLedger::new(&persistence);
        let (snapshot, _deployment) = ledger.apply(service_id).await.unwrap();
        assert_eq!(snapshot.urls.len(), 1);
        assert_eq!(snapshot.urls[0].associated_port, 8080);
    }

    #[tokio::test]
    async fn apply_alternates_slot_on_successive_deployments() {
        let persistence = test_persistence().await;
        let service_id = seed_service(&persistence, bare_spec("api")).await;
        let ledger = ChangeLedger::new(&persistence);

        let (_, first) = ledger.apply(service_id).await.unwrap();
        persistence
            .promote_to_current_production(service_id, first.id)
            .await
            .unwrap();

        let (_, second) = ledger.apply(service_id).await.unwrap();
        assert_eq!(second.slot, first.slot.alternate());
    }

    /// Regression test: an intervening deployment that reaches
    /// `swarm_service_created` and then fails must still make the *next*
    /// deploy alternate off of it, not off of whatever is still
    /// current-production, or the next deploy's service can collide with
    /// the still-running production one on the overlay network alias.
    #[tokio::test]
    async fn apply_alternates_off_failed_swarm_service_not_current_production() {
        let persistence = test_persistence().await;
        let service_id = seed_service(&persistence, bare_spec("api")).await;
        let ledger = ChangeLedger::new(&persistence);

        let (_, first) = ledger.apply(service_id).await.unwrap();
        persistence.promote_to_current_production(service_id, first.id).await.unwrap();
        assert_eq!(first.slot, Slot::Blue);

        let (_, second) = ledger.apply(service_id).await.unwrap();
        assert_eq!(second.slot, Slot::Green);
        persistence.mark_swarm_service_created(second.id).await.unwrap();
        persistence
            .update_status(second.id, zane_common::model::DeploymentStatus::Failed, Some("unhealthy"))
            .await
            .unwrap();

        let (_, third) = ledger.apply(service_id).await.unwrap();
        assert_eq!(third.slot, Slot::Blue, "must alternate off the failed attempt, not off production");
    }

    /// Regression test: when the preceding attempt failed *before* ever
    /// creating a swarm service, its slot was never actually occupied, so
    /// the next deploy reuses it instead of skipping ahead.
    #[tokio::test]
    async fn apply_reuses_slot_when_preceding_attempt_never_created_a_service() {
        let persistence = test_persistence().await;
        let service_id = seed_service(&persistence, bare_spec("api")).await;
        let ledger = ChangeLedger::new(&persistence);

        let (_, first) = ledger.apply(service_id).await.unwrap();
        persistence.promote_to_current_production(service_id, first.id).await.unwrap();

        let (_, second) = ledger.apply(service_id).await.unwrap();
        assert_eq!(second.slot, Slot::Green);
        persistence
            .update_status(second.id, zane_common::model::DeploymentStatus::Failed, Some("build failed"))
            .await
            .unwrap();

        let (_, third) = ledger.apply(service_id).await.unwrap();
        assert_eq!(third.slot, Slot::Green, "slot was never occupied, so it's reused rather than alternated past");
    }
}
