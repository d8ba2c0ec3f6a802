use chrono::{DateTime, Utc};
use sqlx::Row;
use zane_common::model::{DeploymentStatus, Slot};
use zane_common::{ChangeId, Deployment, DeploymentId, Error, ErrorKind, ServiceId};

use super::Persistence;

pub struct DeploymentRow(pub Deployment);

impl Persistence {
    pub async fn insert_deployment(&self, deployment: &Deployment) -> crate::error::Result<()> {
        let snapshot = serde_json::to_string(&deployment.snapshot).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?;
        let changes = serde_json::to_string(&deployment.changes).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?;

        sqlx::query(
            "INSERT INTO deployments (
                id, service_id, hash, slot, status, status_reason, queued_at, started_at, finished_at,
                build_started_at, build_finished_at, snapshot, changes, is_current_production,
                commit_sha, commit_message, image_tag, network_alias, reached_swarm_service
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(deployment.id.to_string())
        .bind(deployment.service_id.to_string())
        .bind(&deployment.hash)
        .bind(deployment.slot.to_string())
        .bind(deployment.status.to_string())
        .bind(&deployment.status_reason)
        .bind(deployment.queued_at.to_rfc3339())
        .bind(deployment.started_at.map(|t| t.to_rfc3339()))
        .bind(deployment.finished_at.map(|t| t.to_rfc3339()))
        .bind(deployment.build_started_at.map(|t| t.to_rfc3339()))
        .bind(deployment.build_finished_at.map(|t| t.to_rfc3339()))
        .bind(&snapshot)
        .bind(&changes)
        .bind(deployment.is_current_production)
        .bind(&deployment.commit_sha)
        .bind(&deployment.commit_message)
        .bind(&deployment.image_tag)
        .bind(&deployment.network_alias)
        .bind(deployment.reached_swarm_service)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_deployment(&self, id: DeploymentId) -> crate::error::Result<Deployment> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::custom(ErrorKind::NotFound, format!("deployment {id} not found")))?;
        deployment_from_row(row)
    }

    /// All deployments for a service still in the `Queued` state, oldest
    /// first — the set the cancel-previous-queued rule sweeps over.
    pub async fn list_queued_deployments(&self, service_id: ServiceId) -> crate::error::Result<Vec<Deployment>> {
        let rows = sqlx::query("SELECT * FROM deployments WHERE service_id = ? AND status = 'queued' ORDER BY queued_at ASC")
            .bind(service_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(deployment_from_row).collect()
    }

    /// Every deployment currently marked `is_current_production`, across all
    /// services. The set the health monitor re-polls on each tick.
    pub async fn list_current_production_deployments(&self) -> crate::error::Result<Vec<Deployment>> {
        let rows = sqlx::query("SELECT * FROM deployments WHERE is_current_production = 1")
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(deployment_from_row).collect()
    }

    pub async fn current_production_deployment(&self, service_id: ServiceId) -> crate::error::Result<Option<Deployment>> {
        let row = sqlx::query("SELECT * FROM deployments WHERE service_id = ? AND is_current_production = 1")
            .bind(service_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(deployment_from_row).transpose()
    }

    /// The immediately-preceding deployment attempt for a service, regardless
    /// of whether it ever became current production. Used by the change
    /// ledger's slot reuse-vs-alternate rule, which keys off the last
    /// attempt, not the last one that went live.
    pub async fn latest_deployment(&self, service_id: ServiceId) -> crate::error::Result<Option<Deployment>> {
        let row = sqlx::query("SELECT * FROM deployments WHERE service_id = ? ORDER BY queued_at DESC, id DESC LIMIT 1")
            .bind(service_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(deployment_from_row).transpose()
    }

    /// Records that step 10 (swarm service creation) completed. Read back by
    /// [`latest_deployment`] callers to tell "failed while still
    /// provisioning" apart from "failed after the service was already up".
    pub async fn mark_swarm_service_created(&self, id: DeploymentId) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET reached_swarm_service = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Drops every deployment of a service out of the health monitor's
    /// rotation. Called by the archiver in place of deleting a per-deployment
    /// schedule row, since this persistence layer keys the monitor's sweep
    /// off `is_current_production` rather than a separate schedule table.
    pub async fn clear_current_production(&self, service_id: ServiceId) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET is_current_production = 0 WHERE service_id = ?")
            .bind(service_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn update_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        status_reason: Option<&str>,
    ) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET status = ?, status_reason = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(status_reason)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_started(&self, id: DeploymentId) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET started_at = ? WHERE id = ? AND started_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_finished(&self, id: DeploymentId) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET finished_at = ? WHERE id = ? AND finished_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_build_started(&self, id: DeploymentId) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET build_started_at = ? WHERE id = ? AND build_started_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Records the commit actually checked out by a Git deployment's clone
    /// step, once it differs from (or resolves) the requested `commit_sha`.
    pub async fn record_git_commit(&self, id: DeploymentId, commit_sha: &str, commit_message: &str) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET commit_sha = ?, commit_message = ? WHERE id = ?")
            .bind(commit_sha)
            .bind(commit_message)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn mark_build_finished(&self, id: DeploymentId, image_tag: &str) -> crate::error::Result<()> {
        sqlx::query("UPDATE deployments SET build_finished_at = ?, image_tag = ? WHERE id = ? AND build_finished_at IS NULL")
            .bind(Utc::now().to_rfc3339())
            .bind(image_tag)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Atomically demotes the current production deployment (if any) and
    /// promotes `id` in its place. Called once a deployment reaches a
    /// healthy terminal state.
    pub async fn promote_to_current_production(&self, service_id: ServiceId, id: DeploymentId) -> crate::error::Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE deployments SET is_current_production = 0 WHERE service_id = ? AND is_current_production = 1")
            .bind(service_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE deployments SET is_current_production = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_deployment_urls(&self, id: DeploymentId, domains: &[String]) -> crate::error::Result<()> {
        let mut tx = self.pool().begin().await?;
        for domain in domains {
            sqlx::query("INSERT OR IGNORE INTO deployment_urls (deployment_id, domain) VALUES (?, ?)")
                .bind(id.to_string())
                .bind(domain)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_deployment_urls(&self, id: DeploymentId) -> crate::error::Result<Vec<String>> {
        let rows = sqlx::query("SELECT domain FROM deployment_urls WHERE deployment_id = ?")
            .bind(id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.into_iter().map(|row| Ok(row.try_get("domain")?)).collect()
    }
}

fn deployment_from_row(row: sqlx::sqlite::SqliteRow) -> crate::error::Result<Deployment> {
    let id: String = row.try_get("id")?;
    let service_id: String = row.try_get("service_id")?;
    let slot: String = row.try_get("slot")?;
    let status: String = row.try_get("status")?;
    let queued_at: String = row.try_get("queued_at")?;
    let started_at: Option<String> = row.try_get("started_at")?;
    let finished_at: Option<String> = row.try_get("finished_at")?;
    let build_started_at: Option<String> = row.try_get("build_started_at")?;
    let build_finished_at: Option<String> = row.try_get("build_finished_at")?;
    let snapshot: String = row.try_get("snapshot")?;
    let changes: String = row.try_get("changes")?;
    let is_current_production: bool = row.try_get("is_current_production")?;
    let reached_swarm_service: bool = row.try_get("reached_swarm_service")?;

    Ok(Deployment {
        id: id
            .parse::<DeploymentId>()
            .map_err(|_| Error::custom(ErrorKind::Internal, "malformed deployment id"))?,
        service_id: service_id
            .parse::<ServiceId>()
            .map_err(|_| Error::custom(ErrorKind::Internal, "malformed service id"))?,
        hash: row.try_get("hash")?,
        slot: slot
            .parse::<Slot>()
            .map_err(|e| Error::custom(ErrorKind::Internal, e))?,
        status: status
            .parse::<DeploymentStatus>()
            .map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?,
        status_reason: row.try_get("status_reason")?,
        queued_at: parse_timestamp(&queued_at)?,
        started_at: started_at.as_deref().map(parse_timestamp).transpose()?,
        finished_at: finished_at.as_deref().map(parse_timestamp).transpose()?,
        build_started_at: build_started_at.as_deref().map(parse_timestamp).transpose()?,
        build_finished_at: build_finished_at.as_deref().map(parse_timestamp).transpose()?,
        snapshot: serde_json::from_str(&snapshot).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?,
        changes: serde_json::from_str::<Vec<ChangeId>>(&changes).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?,
        is_current_production,
        commit_sha: row.try_get("commit_sha")?,
        commit_message: row.try_get("commit_message")?,
        image_tag: row.try_get("image_tag")?,
        network_alias: row.try_get("network_alias")?,
        reached_swarm_service,
    })
}

fn parse_timestamp(raw: &str) -> crate::error::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?
        .with_timezone(&Utc))
}
