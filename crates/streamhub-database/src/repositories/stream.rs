//! Stream repository implementation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;
use streamhub_core::types::{CategoryId, StreamId};
use streamhub_entity::stream::{NewStream, StreamRow};

/// Repository for durable stream rows.
#[derive(Debug, Clone)]
pub struct StreamRepository {
    pool: PgPool,
}

impl StreamRepository {
    /// Create a new stream repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a live stream row.
    ///
    /// Any row of the same user still marked live is ended first, in the
    /// same transaction.
    pub async fn create(&self, data: &NewStream) -> AppResult<StreamRow> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to begin transaction", e)
        })?;

        sqlx::query("UPDATE streams SET ended_at = $2 WHERE user_id = $1 AND ended_at IS NULL")
            .bind(data.user_id)
            .bind(data.started_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to close stale streams", e)
            })?;

        let row = sqlx::query_as::<_, StreamRow>(
            r#"INSERT INTO streams
                   (user_id, category_id, title, thumbnail, source, external_id, started_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING *"#,
        )
        .bind(data.user_id)
        .bind(data.category_id)
        .bind(&data.title)
        .bind(&data.thumbnail)
        .bind(data.source)
        .bind(&data.external_id)
        .bind(data.started_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to create stream", e))?;

        tx.commit().await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to commit stream", e)
        })?;
        Ok(row)
    }

    /// Mark a stream as ended. Ending an ended stream is a no-op.
    pub async fn end(&self, id: StreamId, ended_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE streams SET ended_at = $2 WHERE id = $1 AND ended_at IS NULL")
            .bind(id)
            .bind(ended_at)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to end stream", e))?;
        Ok(())
    }

    /// Store the latest viewer count.
    pub async fn update_viewers(&self, id: StreamId, viewers: i64) -> AppResult<()> {
        sqlx::query("UPDATE streams SET viewers = $2 WHERE id = $1")
            .bind(id)
            .bind(viewers)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to update stream viewers", e)
            })?;
        Ok(())
    }

    /// Update title and/or category.
    pub async fn update_metadata(
        &self,
        id: StreamId,
        title: Option<&str>,
        category_id: Option<CategoryId>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"UPDATE streams SET
                   title = COALESCE($2, title),
                   category_id = COALESCE($3, category_id)
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(title)
        .bind(category_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to update stream metadata", e)
        })?;
        Ok(())
    }
}
