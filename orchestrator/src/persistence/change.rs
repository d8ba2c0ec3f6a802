use chrono::{DateTime, Utc};
use sqlx::Row;
use zane_common::model::ChangeType;
use zane_common::{Change, ChangeId, DeploymentId, Error, ErrorKind, ServiceId};

use super::Persistence;

pub struct PendingChange(pub Change);

impl Persistence {
    pub async fn insert_change(&self, change: &Change) -> crate::error::Result<()> {
        sqlx::query(
            "INSERT INTO changes (id, service_id, field, change_type, new_value, old_value, item_id, applied, deployment_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)",
        )
        .bind(change.id.to_string())
        .bind(change.service_id.to_string())
        .bind(&change.field)
        .bind(change.change_type.to_string())
        .bind(change.new_value.to_string())
        .bind(change.old_value.as_ref().map(|v| v.to_string()))
        .bind(&change.item_id)
        .bind(change.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_pending_changes(&self, service_id: ServiceId) -> crate::error::Result<Vec<Change>> {
        let rows = sqlx::query(
            "SELECT id, field, change_type, new_value, old_value, item_id, created_at
             FROM changes WHERE service_id = ? AND applied = 0 ORDER BY created_at ASC",
        )
        .bind(service_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(|row| change_from_row(row, service_id)).collect()
    }

    /// Removes a single pending change, e.g. in response to a cancel request.
    /// Has no effect on already-applied changes.
    pub async fn cancel_change(&self, id: ChangeId) -> crate::error::Result<()> {
        sqlx::query("DELETE FROM changes WHERE id = ? AND applied = 0")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn clear_pending_changes(&self, service_id: ServiceId) -> crate::error::Result<()> {
        sqlx::query("DELETE FROM changes WHERE service_id = ? AND applied = 0")
            .bind(service_id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Marks every change in `ids` as applied and links it to the deployment
    /// that consumed it, inside one transaction.
    pub async fn mark_changes_applied(&self, ids: &[ChangeId], deployment_id: DeploymentId) -> crate::error::Result<()> {
        let mut tx = self.pool().begin().await?;
        for id in ids {
            sqlx::query("UPDATE changes SET applied = 1, deployment_id = ? WHERE id = ?")
                .bind(deployment_id.to_string())
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn change_from_row(row: sqlx::sqlite::SqliteRow, service_id: ServiceId) -> crate::error::Result<Change> {
    let id: String = row.try_get("id")?;
    let change_type: String = row.try_get("change_type")?;
    let new_value: String = row.try_get("new_value")?;
    let old_value: Option<String> = row.try_get("old_value")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Change {
        id: id
            .parse::<ChangeId>()
            .map_err(|_| Error::custom(ErrorKind::Internal, "malformed change id"))?,
        service_id,
        field: row.try_get("field")?,
        change_type: change_type
            .parse::<ChangeType>()
            .map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?,
        new_value: serde_json::from_str(&new_value).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?,
        old_value: old_value
            .map(|v| serde_json::from_str(&v))
            .transpose()
            .map_err(|e: serde_json::Error| Error::custom(ErrorKind::Internal, e.to_string()))?,
        item_id: row.try_get("item_id")?,
        applied: false,
        deployment_id: None,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?
            .with_timezone(&Utc),
    })
}
