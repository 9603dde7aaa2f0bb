//! Category repository implementation.

use sqlx::PgPool;

use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;
use streamhub_entity::category::Category;

/// Repository for stream categories.
#[derive(Debug, Clone)]
pub struct CategoryRepository {
    pool: PgPool,
}

impl CategoryRepository {
    /// Create a new category repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Return the category with this name's slug, creating it if needed.
    pub async fn find_or_create(&self, name: &str) -> AppResult<Category> {
        let slug = Category::slugify(name);
        sqlx::query_as::<_, Category>(
            r#"INSERT INTO categories (name, slug) VALUES ($1, $2)
               ON CONFLICT (slug) DO UPDATE SET name = categories.name
               RETURNING *"#,
        )
        .bind(name)
        .bind(&slug)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find or create category", e)
        })
    }

    /// List every category.
    pub async fn find_all(&self) -> AppResult<Vec<Category>> {
        sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::with_source(ErrorKind::Database, "Failed to list categories", e))
    }
}
