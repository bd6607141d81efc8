//! Baseline lookup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stagehand_core::ProjectId;
use stagehand_core::baseline::Baseline;

use crate::DbResult;

#[derive(Debug, Clone, sqlx::FromRow)]
struct BaselineRow {
    id: i64,
    project_id: i64,
    name: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl From<BaselineRow> for Baseline {
    fn from(row: BaselineRow) -> Self {
        Baseline {
            id: row.id,
            project_id: ProjectId::new(row.project_id),
            name: row.name,
            active: row.active,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
pub trait BaselineRepo: Send + Sync {
    /// The project's active baseline, newest first.
    async fn active_for_project(&self, project_id: ProjectId) -> DbResult<Option<Baseline>>;
}

/// PostgreSQL implementation of BaselineRepo.
pub struct PgBaselineRepo {
    pool: PgPool,
}

impl PgBaselineRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BaselineRepo for PgBaselineRepo {
    async fn active_for_project(&self, project_id: ProjectId) -> DbResult<Option<Baseline>> {
        let row = sqlx::query_as::<_, BaselineRow>(
            r#"
            SELECT * FROM baselines
            WHERE project_id = $1 AND active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(project_id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Baseline::from))
    }
}
