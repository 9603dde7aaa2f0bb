//! The durable store contract and its PostgreSQL implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::info;

use streamhub_core::config::DatabaseConfig;
use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;
use streamhub_core::types::{CategoryId, StreamId};
use streamhub_entity::category::Category;
use streamhub_entity::stream::{NewStream, StreamRow};
use streamhub_entity::user::{UpsertUser, User};

use crate::repositories::{CategoryRepository, StreamRepository, UserRepository};

/// Relational source of stream, category and user identity.
///
/// Not on the hot read path; the live-state cache serves reads.
#[async_trait]
pub trait DurableStore: Send + Sync + std::fmt::Debug + 'static {
    /// Insert a user or refresh its profile fields.
    async fn upsert_user(&self, data: &UpsertUser) -> AppResult<User>;

    /// Find a user by username (case-insensitive).
    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>>;

    /// Return the category with this name, creating it if needed.
    async fn find_or_create_category(&self, name: &str) -> AppResult<Category>;

    /// Every known category.
    async fn list_categories(&self) -> AppResult<Vec<Category>>;

    /// Insert a live stream row, ending any row of the same user still live.
    async fn create_stream(&self, data: &NewStream) -> AppResult<StreamRow>;

    /// Mark a stream as ended.
    async fn end_stream(&self, id: StreamId, ended_at: DateTime<Utc>) -> AppResult<()>;

    /// Store the latest viewer count of a stream.
    async fn update_stream_viewers(&self, id: StreamId, viewers: u64) -> AppResult<()>;

    /// Update a stream's title and/or category.
    async fn update_stream_metadata(
        &self,
        id: StreamId,
        title: Option<&str>,
        category_id: Option<CategoryId>,
    ) -> AppResult<()>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> AppResult<bool>;
}

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// PostgreSQL-backed durable store.
#[derive(Debug, Clone)]
pub struct PgDurableStore {
    pool: PgPool,
    users: UserRepository,
    categories: CategoryRepository,
    streams: StreamRepository,
}

impl PgDurableStore {
    /// Connect a pool, then apply pending migrations.
    ///
    /// Connections report `streamhub:{instance_id}` as their application
    /// name, so each instance's sessions can be told apart server-side.
    pub async fn connect(config: &DatabaseConfig, instance_id: &str) -> AppResult<Self> {
        let options = connect_options(config, instance_id)?;
        info!(
            host = options.get_host(),
            port = options.get_port(),
            database = options.get_database().unwrap_or("-"),
            max_connections = config.max_connections,
            "Connecting durable store"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .min_connections(config.min_connections.min(config.max_connections))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to connect to PostgreSQL", e)
            })?;

        MIGRATOR.run(&pool).await.map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to apply migrations", e)
        })?;
        info!(migrations = MIGRATOR.iter().count(), "Durable store ready");

        Ok(Self::new(pool))
    }

    /// Create the store over a connected, migrated pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            categories: CategoryRepository::new(pool.clone()),
            streams: StreamRepository::new(pool.clone()),
            pool,
        }
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Durable store closed");
    }
}

fn connect_options(config: &DatabaseConfig, instance_id: &str) -> AppResult<PgConnectOptions> {
    let options: PgConnectOptions = config.url.parse().map_err(|e| {
        AppError::with_source(ErrorKind::Configuration, "Invalid database URL", e)
    })?;
    Ok(options.application_name(&format!("streamhub:{instance_id}")))
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn upsert_user(&self, data: &UpsertUser) -> AppResult<User> {
        self.users.upsert(data).await
    }

    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        self.users.find_by_username(username).await
    }

    async fn find_or_create_category(&self, name: &str) -> AppResult<Category> {
        self.categories.find_or_create(name).await
    }

    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        self.categories.find_all().await
    }

    async fn create_stream(&self, data: &NewStream) -> AppResult<StreamRow> {
        self.streams.create(data).await
    }

    async fn end_stream(&self, id: StreamId, ended_at: DateTime<Utc>) -> AppResult<()> {
        self.streams.end(id, ended_at).await
    }

    async fn update_stream_viewers(&self, id: StreamId, viewers: u64) -> AppResult<()> {
        let viewers = i64::try_from(viewers).unwrap_or(i64::MAX);
        self.streams.update_viewers(id, viewers).await
    }

    async fn update_stream_metadata(
        &self,
        id: StreamId,
        title: Option<&str>,
        category_id: Option<CategoryId>,
    ) -> AppResult<()> {
        self.streams.update_metadata(id, title, category_id).await
    }

    async fn health_check(&self) -> AppResult<bool> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|v| v == 1)
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Health check failed", e))
    }
}
