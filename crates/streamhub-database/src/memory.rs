//! In-memory durable store for single-node runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;
use streamhub_core::types::{CategoryId, StreamId, UserId};
use streamhub_entity::category::Category;
use streamhub_entity::stream::{NewStream, StreamRow};
use streamhub_entity::user::{UpsertUser, User};

use crate::durable::DurableStore;

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    categories: Vec<Category>,
    streams: HashMap<StreamId, StreamRow>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Durable store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryDurableStore {
    tables: Mutex<Tables>,
}

impl MemoryDurableStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stream row (for inspection).
    pub async fn stream(&self, id: StreamId) -> Option<StreamRow> {
        self.tables.lock().await.streams.get(&id).cloned()
    }

    /// Rows still marked live.
    pub async fn live_streams(&self) -> Vec<StreamRow> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<StreamRow> = tables
            .streams
            .values()
            .filter(|row| row.is_live())
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn upsert_user(&self, data: &UpsertUser) -> AppResult<User> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables
            .users
            .iter_mut()
            .find(|u| u.username.eq_ignore_ascii_case(&data.username))
        {
            if data.display_name.is_some() {
                user.display_name = data.display_name.clone();
            }
            if data.avatar.is_some() {
                user.avatar = data.avatar.clone();
            }
            return Ok(user.clone());
        }

        let user = User {
            id: UserId(tables.next_id()),
            username: data.username.clone(),
            display_name: data.display_name.clone(),
            avatar: data.avatar.clone(),
            created_at: Utc::now(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn find_or_create_category(&self, name: &str) -> AppResult<Category> {
        let slug = Category::slugify(name);
        let mut tables = self.tables.lock().await;
        if let Some(category) = tables.categories.iter().find(|c| c.slug == slug) {
            return Ok(category.clone());
        }

        let category = Category {
            id: CategoryId(tables.next_id()),
            name: name.to_string(),
            slug,
            created_at: Utc::now(),
        };
        tables.categories.push(category.clone());
        Ok(category)
    }

    async fn list_categories(&self) -> AppResult<Vec<Category>> {
        Ok(self.tables.lock().await.categories.clone())
    }

    async fn create_stream(&self, data: &NewStream) -> AppResult<StreamRow> {
        let mut tables = self.tables.lock().await;
        for row in tables.streams.values_mut() {
            if row.user_id == data.user_id && row.is_live() {
                row.ended_at = Some(data.started_at);
            }
        }

        let row = StreamRow {
            id: StreamId(tables.next_id()),
            user_id: data.user_id,
            category_id: data.category_id,
            title: data.title.clone(),
            thumbnail: data.thumbnail.clone(),
            viewers: 0,
            source: data.source,
            external_id: data.external_id.clone(),
            started_at: data.started_at,
            ended_at: None,
        };
        tables.streams.insert(row.id, row.clone());
        Ok(row)
    }

    async fn end_stream(&self, id: StreamId, ended_at: DateTime<Utc>) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(row) = tables.streams.get_mut(&id) {
            if row.is_live() {
                row.ended_at = Some(ended_at);
            }
        }
        Ok(())
    }

    async fn update_stream_viewers(&self, id: StreamId, viewers: u64) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .streams
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Stream {id} not found")))?;
        row.viewers = i64::try_from(viewers).unwrap_or(i64::MAX);
        Ok(())
    }

    async fn update_stream_metadata(
        &self,
        id: StreamId,
        title: Option<&str>,
        category_id: Option<CategoryId>,
    ) -> AppResult<()> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .streams
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("Stream {id} not found")))?;
        if let Some(title) = title {
            row.title = title.to_string();
        }
        if let Some(category_id) = category_id {
            row.category_id = category_id;
        }
        Ok(())
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
