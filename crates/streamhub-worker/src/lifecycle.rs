//! Starting and ending streams across the durable store and the cache.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing;

use streamhub_cache::{LiveStateCache, StreamTarget};
use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;
use streamhub_core::types::StreamId;
use streamhub_database::DurableStore;
use streamhub_entity::stream::{LiveStream, NewStream, StreamCategory, StreamOwner, StreamSource};
use streamhub_entity::user::UpsertUser;
use streamhub_external::ExternalChannel;

/// Everything needed to bring a stream live.
#[derive(Debug, Clone)]
pub struct StartStream {
    /// Channel name.
    pub username: String,
    /// Display name of the owner.
    pub display_name: Option<String>,
    /// Avatar URL of the owner.
    pub avatar: Option<String>,
    /// Broadcast title.
    pub title: String,
    /// Category name.
    pub category: String,
    /// Thumbnail URL.
    pub thumbnail: Option<String>,
    /// How the stream was discovered.
    pub source: StreamSource,
    /// Upstream identifier.
    pub external_id: Option<String>,
    /// Broadcast start time.
    pub started_at: DateTime<Utc>,
}

impl StartStream {
    /// A stream discovered on the upstream service.
    pub fn from_external(channel: &ExternalChannel) -> Self {
        Self {
            username: channel.name.clone(),
            display_name: channel.display_name.clone(),
            avatar: channel.avatar.clone(),
            title: channel.title.clone(),
            category: channel.category.clone(),
            thumbnail: channel.thumbnail.clone(),
            source: StreamSource::External,
            external_id: Some(channel.external_id.clone()),
            started_at: channel.started_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Keeps the durable store and the live-state cache in step when a stream
/// starts or ends.
#[derive(Debug, Clone)]
pub struct StreamLifecycle {
    cache: LiveStateCache,
    durable: Arc<dyn DurableStore>,
}

impl StreamLifecycle {
    /// Create a lifecycle over the cache and durable store.
    pub fn new(cache: LiveStateCache, durable: Arc<dyn DurableStore>) -> Self {
        Self { cache, durable }
    }

    /// Bring a stream live.
    ///
    /// Fails with `AlreadyLive` before touching the durable store when the
    /// user is already live. If the cache rejects the stream after the
    /// durable row was written, the row is ended again.
    pub async fn start(&self, request: StartStream) -> AppResult<LiveStream> {
        match self.cache.get_by_username(&request.username).await {
            Ok(existing) => {
                return Err(AppError::already_live(format!(
                    "User '{}' is already live as stream {}",
                    request.username, existing.id
                )));
            }
            Err(e) if e.is(ErrorKind::NotFound) => {}
            Err(e) => return Err(e),
        }

        let user = self
            .durable
            .upsert_user(&UpsertUser {
                username: request.username.clone(),
                display_name: request.display_name.clone(),
                avatar: request.avatar.clone(),
            })
            .await?;
        let category = self
            .durable
            .find_or_create_category(&request.category)
            .await?;
        let row = self
            .durable
            .create_stream(&NewStream {
                user_id: user.id,
                category_id: category.id,
                title: request.title.clone(),
                thumbnail: request.thumbnail.clone(),
                source: request.source,
                external_id: request.external_id.clone(),
                started_at: request.started_at,
            })
            .await?;

        let stream = LiveStream {
            id: row.id,
            title: row.title,
            thumbnail: row.thumbnail,
            viewers: 0,
            polled_viewers: 0,
            started_at: row.started_at,
            owner: StreamOwner {
                id: user.id,
                display_name: user.display_name_or_username().to_string(),
                username: user.username,
                avatar: user.avatar,
            },
            category: StreamCategory {
                id: category.id,
                name: category.name,
                slug: category.slug,
            },
            source: row.source,
            external_id: row.external_id,
        };

        if let Err(e) = self.cache.create(&stream).await {
            if let Err(end_err) = self.durable.end_stream(stream.id, Utc::now()).await {
                tracing::warn!(
                    stream_id = %stream.id,
                    error = %end_err,
                    "Failed to end durable row of rejected stream"
                );
            }
            return Err(e);
        }

        Ok(stream)
    }

    /// End a stream in the cache, then in the durable store.
    ///
    /// Durable failures are logged; the cache is authoritative for liveness.
    pub async fn end(&self, target: StreamTarget) -> AppResult<LiveStream> {
        let ended = self.cache.delete(target).await?;
        if let Err(e) = self.durable.end_stream(ended.id, Utc::now()).await {
            tracing::warn!(
                stream_id = %ended.id,
                error = %e,
                "Failed to end stream in durable store"
            );
        }
        Ok(ended)
    }

    /// Change the title and/or category of a live stream.
    ///
    /// The category is resolved by name, created if unknown. The cache is
    /// updated first; a durable failure is logged.
    pub async fn update_metadata(
        &self,
        id: StreamId,
        title: Option<&str>,
        category: Option<&str>,
    ) -> AppResult<LiveStream> {
        let category = match category {
            Some(name) => {
                let found = self.durable.find_or_create_category(name).await?;
                Some(StreamCategory {
                    id: found.id,
                    name: found.name,
                    slug: found.slug,
                })
            }
            None => None,
        };

        let updated = self
            .cache
            .update_metadata(id, title, category.as_ref())
            .await?;
        if let Err(e) = self
            .durable
            .update_stream_metadata(id, title, category.as_ref().map(|c| c.id))
            .await
        {
            tracing::warn!(
                stream_id = %id,
                error = %e,
                "Failed to update stream metadata in durable store"
            );
        }
        Ok(updated)
    }

    /// The live-state cache.
    pub fn cache(&self) -> &LiveStateCache {
        &self.cache
    }

    /// The durable store.
    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }
}
