use sqlx::Row;
use zane_common::model::{AccessMode, ServiceSpec, Volume};
use zane_common::{EnvironmentId, Error, ErrorKind, Service, ServiceId, VolumeId};

use super::Persistence;

pub struct ServiceRow(pub Service);

impl Persistence {
    pub async fn insert_service(
        &self,
        id: ServiceId,
        environment_id: EnvironmentId,
        slug: &str,
        deploy_token: &str,
        spec: &ServiceSpec,
    ) -> crate::error::Result<()> {
        let spec_json = serde_json::to_string(spec).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?;
        sqlx::query(
            "INSERT INTO services (id, environment_id, slug, deploy_token, applied_spec) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(environment_id.to_string())
        .bind(slug)
        .bind(deploy_token)
        .bind(&spec_json)
        .execute(self.pool())
        .await?;
        self.sync_projection_tables(id, spec).await?;
        Ok(())
    }

    pub async fn get_service(&self, id: ServiceId) -> crate::error::Result<Service> {
        let row = sqlx::query("SELECT environment_id, deploy_token, applied_spec FROM services WHERE id = ? AND archived_at IS NULL")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::custom(ErrorKind::NotFound, format!("service {id} not found")))?;

        let environment_id: String = row.try_get("environment_id")?;
        let deploy_token: String = row.try_get("deploy_token")?;
        let spec_json: String = row.try_get("applied_spec")?;
        let spec: ServiceSpec =
            serde_json::from_str(&spec_json).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?;

        Ok(Service {
            id,
            environment_id: environment_id
                .parse::<EnvironmentId>()
                .map_err(|_| Error::custom(ErrorKind::Internal, "malformed environment_id"))?,
            deploy_token,
            spec,
        })
    }

    /// Resolves the project slug a service belongs to, for building its
    /// swarm service name (`srv-<project_slug>-<service_id>-<hash>`).
    pub async fn project_slug_for_service(&self, id: ServiceId) -> crate::error::Result<String> {
        let row = sqlx::query(
            "SELECT p.slug AS slug FROM services s
             JOIN environments e ON e.id = s.environment_id
             JOIN projects p ON p.id = e.project_id
             WHERE s.id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::custom(ErrorKind::NotFound, format!("service {id} not found")))?;
        Ok(row.try_get("slug")?)
    }

    pub async fn list_services_for_environment(&self, environment_id: EnvironmentId) -> crate::error::Result<Vec<ServiceId>> {
        let rows = sqlx::query("SELECT id FROM services WHERE environment_id = ? AND archived_at IS NULL")
            .bind(environment_id.to_string())
            .fetch_all(self.pool())
            .await?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            ids.push(
                id.parse::<ServiceId>()
                    .map_err(|_| Error::custom(ErrorKind::Internal, "malformed service id"))?,
            );
        }
        Ok(ids)
    }

    /// Replaces a service's applied spec wholesale. Called by the deployment
    /// workflow once a deployment is promoted to current production, never by
    /// the change ledger directly (that only ever touches pending `changes`).
    pub async fn apply_service_spec(&self, id: ServiceId, spec: &ServiceSpec) -> crate::error::Result<()> {
        let spec_json = serde_json::to_string(spec).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?;
        sqlx::query("UPDATE services SET applied_spec = ? WHERE id = ?")
            .bind(&spec_json)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        self.sync_projection_tables(id, spec).await?;
        Ok(())
    }

    /// Rewrites the per-service projection rows (volumes, configs, ports,
    /// urls, healthchecks) from the service spec's embedded lists. These exist
    /// alongside the `applied_spec` JSON blob so that ledger validation can
    /// run cheap SQL-level uniqueness checks (e.g. `(domain, base_path)`
    /// across every service) instead of deserializing every service's spec.
    async fn sync_projection_tables(&self, id: ServiceId, spec: &ServiceSpec) -> crate::error::Result<()> {
        let mut tx = self.pool().begin().await?;
        let sid = id.to_string();

        for table in ["volumes", "configs", "ports", "urls", "healthchecks"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE service_id = ?"))
                .bind(&sid)
                .execute(&mut *tx)
                .await?;
        }

        for volume in &spec.volumes {
            sqlx::query(
                "INSERT INTO volumes (id, service_id, name, container_path, mode, host_path)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(volume.id.to_string())
            .bind(&sid)
            .bind(&volume.name)
            .bind(&volume.container_path)
            .bind(volume.mode.to_string())
            .bind(&volume.host_path)
            .execute(&mut *tx)
            .await?;
        }

        for config in &spec.configs {
            sqlx::query(
                "INSERT INTO configs (id, service_id, name, contents, mount_path, language_hint)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(config.id.to_string())
            .bind(&sid)
            .bind(&config.name)
            .bind(&config.contents)
            .bind(&config.mount_path)
            .bind(&config.language_hint)
            .execute(&mut *tx)
            .await?;
        }

        for port in &spec.ports {
            sqlx::query("INSERT INTO ports (id, service_id, host_port, forwarded_port) VALUES (?, ?, ?, ?)")
                .bind(port.id.to_string())
                .bind(&sid)
                .bind(port.host_port.map(|p| p as i64))
                .bind(port.forwarded_port as i64)
                .execute(&mut *tx)
                .await?;
        }

        for url in &spec.urls {
            sqlx::query(
                "INSERT INTO urls (id, service_id, domain, base_path, strip_prefix, associated_port, redirect_url, redirect_permanent)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(url.id.to_string())
            .bind(&sid)
            .bind(&url.domain)
            .bind(&url.base_path)
            .bind(url.strip_prefix)
            .bind(url.associated_port as i64)
            .bind(url.redirect.as_ref().map(|r| r.url.clone()))
            .bind(url.redirect.as_ref().map(|r| r.permanent))
            .execute(&mut *tx)
            .await?;
        }

        if let Some(hc) = &spec.healthcheck {
            sqlx::query(
                "INSERT INTO healthchecks (service_id, kind, value, timeout_seconds, interval_seconds, associated_port)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&sid)
            .bind(hc.kind.to_string())
            .bind(&hc.value)
            .bind(hc.timeout_seconds)
            .bind(hc.interval_seconds)
            .bind(hc.associated_port.map(|p| p as i64))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Whether `(domain, base_path)` is already claimed by a URL route
    /// belonging to a service other than `excluding_service`.
    pub async fn url_identity_taken(&self, domain: &str, base_path: &str, excluding_service: ServiceId) -> crate::error::Result<bool> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM urls WHERE domain = ? AND base_path = ? AND service_id != ?",
        )
        .bind(domain)
        .bind(base_path)
        .bind(excluding_service.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(count.0 > 0)
    }

    /// Whether `domain` is a wildcard overlapping a concrete domain (or vice
    /// versa) already claimed by some other service's URL route.
    pub async fn wildcard_domain_overlap_exists(&self, domain: &str, excluding_service: ServiceId) -> crate::error::Result<bool> {
        let rows = sqlx::query("SELECT domain FROM urls WHERE service_id != ?")
            .bind(excluding_service.to_string())
            .fetch_all(self.pool())
            .await?;
        for row in rows {
            let other: String = row.try_get("domain")?;
            if other != domain && crate::ledger::validate::domains_overlap(domain, &other) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether a host port is already bound by another service's port mapping.
    pub async fn host_port_taken(&self, host_port: u16, excluding_service: ServiceId) -> crate::error::Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ports WHERE host_port = ? AND service_id != ?")
            .bind(host_port as i64)
            .bind(excluding_service.to_string())
            .fetch_one(self.pool())
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn archive_service(&self, id: ServiceId, teardown_manifest: &serde_json::Value) -> crate::error::Result<()> {
        let service = self.get_service(id).await?;
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE services SET archived_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO archived_services (id, environment_id, slug, teardown_manifest, archived_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(service.environment_id.to_string())
        .bind(&service.spec.slug)
        .bind(teardown_manifest.to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Reconstructs a single [`Volume`] row. Kept separate from [`ServiceSpec`]
/// deserialization for callers (e.g. the ledger) that want to inspect a
/// projection row without pulling in the whole spec.
pub fn volume_from_row(row: &sqlx::sqlite::SqliteRow) -> crate::error::Result<Volume> {
    let id: String = row.try_get("id")?;
    let service_id: String = row.try_get("service_id")?;
    let mode: String = row.try_get("mode")?;
    Ok(Volume {
        id: id
            .parse::<VolumeId>()
            .map_err(|_| Error::custom(ErrorKind::Internal, "malformed volume id"))?,
        service_id: service_id
            .parse::<ServiceId>()
            .map_err(|_| Error::custom(ErrorKind::Internal, "malformed service id"))?,
        name: row.try_get("name")?,
        container_path: row.try_get("container_path")?,
        mode: mode
            .parse::<AccessMode>()
            .map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?,
        host_path: row.try_get("host_path")?,
    })
}
