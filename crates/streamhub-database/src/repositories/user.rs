//! User repository implementation.

use sqlx::PgPool;

use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;
use streamhub_entity::user::{UpsertUser, User};

/// Repository for channel owners.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find a user by username (case-insensitive).
    pub async fn find_by_username(&self, username: &str) -> AppResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(username) = LOWER($1)")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::with_source(ErrorKind::Database, "Failed to find user by username", e)
            })
    }

    /// Insert a user, or refresh display name and avatar of an existing one.
    pub async fn upsert(&self, data: &UpsertUser) -> AppResult<User> {
        sqlx::query_as::<_, User>(
            r#"INSERT INTO users (username, display_name, avatar)
               VALUES ($1, $2, $3)
               ON CONFLICT ((LOWER(username))) DO UPDATE SET
                   display_name = COALESCE(EXCLUDED.display_name, users.display_name),
                   avatar = COALESCE(EXCLUDED.avatar, users.avatar)
               RETURNING *"#,
        )
        .bind(&data.username)
        .bind(&data.display_name)
        .bind(&data.avatar)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to upsert user", e))
    }
}
