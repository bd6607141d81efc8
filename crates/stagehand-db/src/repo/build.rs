//! Build request repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use stagehand_core::build::{BuildRequest, NewBuild};
use stagehand_core::{BuildId, BuildStatus, OwnerId, ProjectId};

use crate::{DbError, DbResult};

/// A build row in the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct BuildRow {
    id: i64,
    project_id: i64,
    owner_id: i64,
    developer: String,
    uploaded_at: DateTime<Utc>,
    tag_name: String,
    tag_description: String,
    file_name: String,
    file_hash: String,
    status: String,
    send_notification: bool,
    deleted: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BuildRow> for BuildRequest {
    type Error = DbError;

    fn try_from(row: BuildRow) -> DbResult<Self> {
        let status = row
            .status
            .parse::<BuildStatus>()
            .map_err(|e| DbError::Corrupt(format!("build {}: {}", row.id, e)))?;
        Ok(BuildRequest {
            id: BuildId::new(row.id),
            project_id: ProjectId::new(row.project_id),
            owner_id: OwnerId::new(row.owner_id),
            developer: row.developer,
            uploaded_at: row.uploaded_at,
            tag_name: row.tag_name,
            tag_description: row.tag_description,
            file_name: row.file_name,
            file_hash: row.file_hash,
            status,
            send_notification: row.send_notification,
            deleted: row.deleted,
            updated_at: row.updated_at,
        })
    }
}

fn into_builds(rows: Vec<BuildRow>) -> DbResult<Vec<BuildRequest>> {
    rows.into_iter().map(BuildRequest::try_from).collect()
}

fn status_names(statuses: impl Iterator<Item = BuildStatus>) -> Vec<String> {
    statuses.map(|s| s.as_str().to_string()).collect()
}

/// A conditional status change that also enforces one running build per owner.
#[derive(Debug, Clone, Copy)]
pub struct Claim {
    pub build_id: BuildId,
    pub owner_id: OwnerId,
    /// Status the row must still hold for the claim to apply.
    pub expected: BuildStatus,
    pub next: BuildStatus,
    pub send_notification: bool,
}

#[async_trait]
pub trait BuildRepo: Send + Sync {
    async fn create(&self, build: &NewBuild) -> DbResult<BuildRequest>;

    /// Fetch a build; soft-deleted builds are reported as not found.
    async fn get(&self, id: BuildId) -> DbResult<BuildRequest>;

    /// Builds executing a pipeline phase.
    async fn list_in_progress(&self) -> DbResult<Vec<BuildRequest>>;

    /// Builds held in the CI engine's queue.
    async fn list_in_queue(&self) -> DbResult<Vec<BuildRequest>>;

    /// In-flight builds whose status has not changed since `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<BuildRequest>>;

    /// The owner's oldest queued build.
    async fn first_queued(&self, owner_id: OwnerId) -> DbResult<Option<BuildRequest>>;

    /// The owner's most recently uploaded build.
    async fn latest_uploaded(&self, owner_id: OwnerId) -> DbResult<Option<BuildRequest>>;

    /// Whether the owner has a running build other than `except`.
    async fn owner_has_running(&self, owner_id: OwnerId, except: BuildId) -> DbResult<bool>;

    /// Apply a claim. Returns false if the row changed or the owner already
    /// has another running build.
    async fn claim(&self, claim: &Claim) -> DbResult<bool>;

    /// Change status from `expected` to `next`. Returns false if the row no
    /// longer holds `expected`.
    async fn update_status(
        &self,
        id: BuildId,
        expected: BuildStatus,
        next: BuildStatus,
    ) -> DbResult<bool>;

    async fn soft_delete(&self, id: BuildId) -> DbResult<()>;
}

/// PostgreSQL implementation of BuildRepo.
pub struct PgBuildRepo {
    pool: PgPool,
}

impl PgBuildRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BuildRepo for PgBuildRepo {
    async fn create(&self, build: &NewBuild) -> DbResult<BuildRequest> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            INSERT INTO builds (project_id, owner_id, developer, tag_name, tag_description,
                                file_name, file_hash, status, uploaded_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(build.project_id.get())
        .bind(build.owner_id.get())
        .bind(&build.developer)
        .bind(&build.tag_name)
        .bind(&build.tag_description)
        .bind(&build.file_name)
        .bind(&build.file_hash)
        .bind(BuildStatus::Uploaded.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get(&self, id: BuildId) -> DbResult<BuildRequest> {
        let row = sqlx::query_as::<_, BuildRow>(
            "SELECT * FROM builds WHERE id = $1 AND NOT deleted",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("build {}", id)))?;
        row.try_into()
    }

    async fn list_in_progress(&self) -> DbResult<Vec<BuildRequest>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            "SELECT * FROM builds WHERE status = ANY($1) AND NOT deleted ORDER BY updated_at",
        )
        .bind(status_names(BuildStatus::running()))
        .fetch_all(&self.pool)
        .await?;
        into_builds(rows)
    }

    async fn list_in_queue(&self) -> DbResult<Vec<BuildRequest>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            "SELECT * FROM builds WHERE status = $1 AND NOT deleted ORDER BY updated_at",
        )
        .bind(BuildStatus::InQueue.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_builds(rows)
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<BuildRequest>> {
        let rows = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT * FROM builds
            WHERE status = ANY($1) AND NOT deleted AND updated_at < $2
            ORDER BY updated_at
            "#,
        )
        .bind(status_names(BuildStatus::in_flight()))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        into_builds(rows)
    }

    async fn first_queued(&self, owner_id: OwnerId) -> DbResult<Option<BuildRequest>> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT * FROM builds
            WHERE owner_id = $1 AND status = $2 AND NOT deleted
            ORDER BY updated_at, id
            LIMIT 1
            "#,
        )
        .bind(owner_id.get())
        .bind(BuildStatus::InQueue.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(BuildRequest::try_from).transpose()
    }

    async fn latest_uploaded(&self, owner_id: OwnerId) -> DbResult<Option<BuildRequest>> {
        let row = sqlx::query_as::<_, BuildRow>(
            r#"
            SELECT * FROM builds
            WHERE owner_id = $1 AND NOT deleted
            ORDER BY uploaded_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id.get())
        .fetch_optional(&self.pool)
        .await?;
        row.map(BuildRequest::try_from).transpose()
    }

    async fn owner_has_running(&self, owner_id: OwnerId, except: BuildId) -> DbResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM builds
                WHERE owner_id = $1 AND id <> $2 AND status = ANY($3) AND NOT deleted
            )
            "#,
        )
        .bind(owner_id.get())
        .bind(except.get())
        .bind(status_names(BuildStatus::running()))
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn claim(&self, claim: &Claim) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Serializes claims per owner for the length of this transaction only.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(claim.owner_id.get())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE builds
            SET status = $3, send_notification = $4, updated_at = NOW()
            WHERE id = $1 AND status = $2 AND NOT deleted
              AND NOT EXISTS (
                  SELECT 1 FROM builds other
                  WHERE other.owner_id = $5 AND other.id <> $1
                    AND other.status = ANY($6) AND NOT other.deleted
              )
            "#,
        )
        .bind(claim.build_id.get())
        .bind(claim.expected.as_str())
        .bind(claim.next.as_str())
        .bind(claim.send_notification)
        .bind(claim.owner_id.get())
        .bind(status_names(BuildStatus::running()))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_status(
        &self,
        id: BuildId,
        expected: BuildStatus,
        next: BuildStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE builds SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2 AND NOT deleted
            "#,
        )
        .bind(id.get())
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn soft_delete(&self, id: BuildId) -> DbResult<()> {
        let result = sqlx::query("UPDATE builds SET deleted = TRUE WHERE id = $1 AND NOT deleted")
            .bind(id.get())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("build {}", id)));
        }
        Ok(())
    }
}
