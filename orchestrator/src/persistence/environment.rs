use std::collections::BTreeMap;

use chrono::Utc;
use serde_json;
use sqlx::Row;
use zane_common::model::{BasicAuthCredentials, EnvironmentStatus, PreviewConfig};
use zane_common::{Environment, EnvironmentId, Error, ErrorKind, ProjectId};

use super::Persistence;

pub struct EnvironmentRow(pub Environment);

impl Persistence {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_environment(&self, env: &Environment) -> crate::error::Result<()> {
        let preview = match &env.preview {
            Some(p) => Some(serde_json::to_string(p).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?),
            None => None,
        };
        sqlx::query(
            "INSERT INTO environments (id, project_id, name, status, network_name, builder_name, preview)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(env.id.to_string())
        .bind(env.project_id.to_string())
        .bind(&env.name)
        .bind("active")
        .bind(&env.network_name)
        .bind(&env.builder_name)
        .bind(preview)
        .execute(self.pool())
        .await?;

        for (key, value) in &env.variables {
            sqlx::query("INSERT INTO environment_variables (environment_id, key, value) VALUES (?, ?, ?)")
                .bind(env.id.to_string())
                .bind(key)
                .bind(value)
                .execute(self.pool())
                .await?;
        }
        Ok(())
    }

    pub async fn get_environment(&self, id: EnvironmentId) -> crate::error::Result<Environment> {
        let row = sqlx::query(
            "SELECT project_id, name, status, network_name, builder_name, preview
             FROM environments WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::custom(ErrorKind::NotFound, format!("environment {id} not found")))?;

        let project_id: String = row.try_get("project_id")?;
        let status: String = row.try_get("status")?;
        let preview_json: Option<String> = row.try_get("preview")?;
        let preview: Option<PreviewConfig> = match preview_json {
            Some(s) => Some(serde_json::from_str(&s).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?),
            None => None,
        };

        let variable_rows = sqlx::query("SELECT key, value FROM environment_variables WHERE environment_id = ?")
            .bind(id.to_string())
            .fetch_all(self.pool())
            .await?;
        let mut variables = BTreeMap::new();
        for row in variable_rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            variables.insert(key, value);
        }

        Ok(Environment {
            id,
            project_id: project_id
                .parse::<ProjectId>()
                .map_err(|_| Error::custom(ErrorKind::Internal, "malformed project_id"))?,
            name: row.try_get("name")?,
            status: if status == "archived" {
                EnvironmentStatus::Archived
            } else {
                EnvironmentStatus::Active
            },
            network_name: row.try_get("network_name")?,
            builder_name: row.try_get("builder_name")?,
            variables,
            preview,
        })
    }

    pub async fn list_environments_for_project(&self, project_id: ProjectId) -> crate::error::Result<Vec<EnvironmentId>> {
        let rows = sqlx::query("SELECT id FROM environments WHERE project_id = ? AND status = 'active'")
            .bind(project_id.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                id.parse::<EnvironmentId>()
                    .map_err(|_| Error::custom(ErrorKind::Internal, "malformed environment id").into())
            })
            .collect()
    }

    pub async fn environment_name_taken(&self, project_id: ProjectId, name: &str) -> crate::error::Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM environments WHERE project_id = ? AND name = ?")
            .bind(project_id.to_string())
            .bind(name)
            .fetch_one(self.pool())
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn set_basic_auth(&self, id: EnvironmentId, credentials: Option<BasicAuthCredentials>) -> crate::error::Result<()> {
        let mut env = self.get_environment(id).await?;
        let preview = env.preview.get_or_insert_with(|| PreviewConfig {
            basic_auth: None,
            pull_request_ref: None,
        });
        preview.basic_auth = credentials;
        let preview_json = serde_json::to_string(&env.preview).map_err(|e| Error::custom(ErrorKind::Internal, e.to_string()))?;
        sqlx::query("UPDATE environments SET preview = ? WHERE id = ?")
            .bind(preview_json)
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn archive_environment(&self, id: EnvironmentId) -> crate::error::Result<()> {
        let env = self.get_environment(id).await?;
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE environments SET status = 'archived' WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO archived_environments (id, project_id, name, archived_at) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(env.project_id.to_string())
            .bind(&env.name)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
