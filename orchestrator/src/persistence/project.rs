use chrono::Utc;
use zane_common::{Error, ErrorKind, ProjectId};

use super::Persistence;

pub struct ProjectRow {
    pub id: ProjectId,
    pub slug: String,
    pub archived: bool,
}

impl Persistence {
    pub async fn insert_project(&self, id: ProjectId, slug: &str) -> crate::error::Result<()> {
        sqlx::query("INSERT INTO projects (id, slug, status) VALUES (?, ?, 'active')")
            .bind(id.to_string())
            .bind(slug)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_project(&self, id: ProjectId) -> crate::error::Result<ProjectRow> {
        let row = sqlx::query_as::<_, (String, String, String)>("SELECT id, slug, status FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| Error::custom(ErrorKind::NotFound, format!("project {id} not found")))?;
        Ok(ProjectRow {
            id,
            slug: row.1,
            archived: row.2 == "archived",
        })
    }

    pub async fn project_slug_taken(&self, slug: &str) -> crate::error::Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM projects WHERE slug = ?")
            .bind(slug)
            .fetch_one(self.pool())
            .await?;
        Ok(count.0 > 0)
    }

    pub async fn archive_project(&self, id: ProjectId) -> crate::error::Result<()> {
        let project = self.get_project(id).await?;
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE projects SET status = 'archived' WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO archived_projects (id, slug, archived_at) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(&project.slug)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
