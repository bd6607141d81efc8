//! Phase ledger repository.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use stagehand_core::ledger::{PhaseLedger, Stages};
use stagehand_core::{BuildId, LedgerId, OwnerId, ProjectId};

use crate::{DbError, DbResult};

/// A phase ledger row. Stage entries are stored as one JSONB document.
#[derive(Debug, Clone, sqlx::FromRow)]
struct LedgerRow {
    id: i64,
    owner_id: i64,
    project_id: i64,
    build_id: i64,
    stages: Json<Stages>,
    in_queue: bool,
    download: bool,
}

impl From<LedgerRow> for PhaseLedger {
    fn from(row: LedgerRow) -> Self {
        PhaseLedger {
            id: LedgerId::new(row.id),
            owner_id: OwnerId::new(row.owner_id),
            project_id: ProjectId::new(row.project_id),
            build_id: BuildId::new(row.build_id),
            stages: row.stages.0,
            in_queue: row.in_queue,
            download: row.download,
        }
    }
}

#[async_trait]
pub trait LedgerRepo: Send + Sync {
    async fn find_by_build(&self, build_id: BuildId) -> DbResult<Option<PhaseLedger>>;

    /// Create the ledger of a build. A build has at most one ledger.
    async fn create(
        &self,
        owner_id: OwnerId,
        project_id: ProjectId,
        build_id: BuildId,
        stages: &Stages,
    ) -> DbResult<PhaseLedger>;

    /// Persist every mutable field of an existing ledger.
    async fn save(&self, ledger: &PhaseLedger) -> DbResult<()>;

    async fn delete_for_build(&self, build_id: BuildId) -> DbResult<()>;
}

/// PostgreSQL implementation of LedgerRepo.
pub struct PgLedgerRepo {
    pool: PgPool,
}

impl PgLedgerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepo for PgLedgerRepo {
    async fn find_by_build(&self, build_id: BuildId) -> DbResult<Option<PhaseLedger>> {
        let row =
            sqlx::query_as::<_, LedgerRow>("SELECT * FROM phase_ledgers WHERE build_id = $1")
                .bind(build_id.get())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(PhaseLedger::from))
    }

    async fn create(
        &self,
        owner_id: OwnerId,
        project_id: ProjectId,
        build_id: BuildId,
        stages: &Stages,
    ) -> DbResult<PhaseLedger> {
        let row = sqlx::query_as::<_, LedgerRow>(
            r#"
            INSERT INTO phase_ledgers (owner_id, project_id, build_id, stages, in_queue, download)
            VALUES ($1, $2, $3, $4, FALSE, FALSE)
            RETURNING *
            "#,
        )
        .bind(owner_id.get())
        .bind(project_id.get())
        .bind(build_id.get())
        .bind(Json(stages))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DbError::unique(e, format!("phase ledger for build {}", build_id)))?;
        Ok(row.into())
    }

    async fn save(&self, ledger: &PhaseLedger) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE phase_ledgers SET stages = $2, in_queue = $3, download = $4
            WHERE id = $1
            "#,
        )
        .bind(ledger.id.get())
        .bind(Json(&ledger.stages))
        .bind(ledger.in_queue)
        .bind(ledger.download)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("phase ledger {}", ledger.id)));
        }
        Ok(())
    }

    async fn delete_for_build(&self, build_id: BuildId) -> DbResult<()> {
        sqlx::query("DELETE FROM phase_ledgers WHERE build_id = $1")
            .bind(build_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
