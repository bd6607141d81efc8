//! Artifact and verification record repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stagehand_core::BuildId;
use stagehand_core::artifact::{ArtifactRecord, BuildOutputs, FileVerify};

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct OutputsRow {
    build_id: i64,
    output_location: String,
    log_location: String,
    recorded_at: DateTime<Utc>,
    verified: bool,
    detail: Option<String>,
    checked_at: DateTime<Utc>,
}

impl From<OutputsRow> for BuildOutputs {
    fn from(row: OutputsRow) -> Self {
        let build_id = BuildId::new(row.build_id);
        BuildOutputs {
            artifact: ArtifactRecord {
                build_id,
                output_location: row.output_location,
                log_location: row.log_location,
                recorded_at: row.recorded_at,
            },
            verification: FileVerify {
                build_id,
                verified: row.verified,
                detail: row.detail,
                checked_at: row.checked_at,
            },
        }
    }
}

#[async_trait]
pub trait OutputsRepo: Send + Sync {
    /// Write both records of a build. Fails with `Duplicate` if either exists.
    async fn record(&self, outputs: &BuildOutputs) -> DbResult<()>;

    async fn get(&self, build_id: BuildId) -> DbResult<Option<BuildOutputs>>;
}

/// PostgreSQL implementation of OutputsRepo.
pub struct PgOutputsRepo {
    pool: PgPool,
}

impl PgOutputsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutputsRepo for PgOutputsRepo {
    async fn record(&self, outputs: &BuildOutputs) -> DbResult<()> {
        let build_id = outputs.artifact.build_id;
        let what = || format!("outputs for build {}", build_id);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO build_artifacts (build_id, output_location, log_location, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(build_id.get())
        .bind(&outputs.artifact.output_location)
        .bind(&outputs.artifact.log_location)
        .bind(outputs.artifact.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::unique(e, what()))?;

        sqlx::query(
            r#"
            INSERT INTO file_verifications (build_id, verified, detail, checked_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(build_id.get())
        .bind(outputs.verification.verified)
        .bind(&outputs.verification.detail)
        .bind(outputs.verification.checked_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| DbError::unique(e, what()))?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, build_id: BuildId) -> DbResult<Option<BuildOutputs>> {
        let row = sqlx::query_as::<_, OutputsRow>(
            r#"
            SELECT a.build_id, a.output_location, a.log_location, a.recorded_at,
                   v.verified, v.detail, v.checked_at
            FROM build_artifacts a
            JOIN file_verifications v ON v.build_id = a.build_id
            WHERE a.build_id = $1
            "#,
        )
        .bind(build_id.get())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(BuildOutputs::from))
    }
}
