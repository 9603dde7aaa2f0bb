//! Live-state cache: per-stream records, category leaderboards and the
//! identity indexes that point at them.
//!
//! Every mutation is one guarded [`Transaction`], so the record, the
//! leaderboard entry, the username index and the global live set never
//! drift apart. Updates guard on the record's current category; when a
//! concurrent write moves the stream first, the update is rebuilt against
//! the fresh record and retried.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::{CategoryId, CommitOutcome, PageRequest, StreamId, Transaction};
use streamhub_entity::stream::{LiveStream, StreamCategory};

use super::record;
use crate::keys;

/// Attempts made when a guard fails because of a concurrent update.
const MAX_GUARD_RETRIES: usize = 3;

/// Field of the category hash holding the aggregate viewer count.
const CATEGORY_VIEWERS: &str = "viewers";
/// Field of the category hash holding the time of the last aggregation.
const CATEGORY_UPDATED_AT: &str = "updated_at";

/// How a stream is addressed when ending it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    /// By stream id.
    Id(StreamId),
    /// By owner's username.
    Username(String),
}

/// Read/write access to live-stream state.
#[derive(Debug, Clone)]
pub struct LiveStateCache {
    store: Arc<dyn LiveStore>,
}

impl LiveStateCache {
    /// Create a cache over a store.
    pub fn new(store: Arc<dyn LiveStore>) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn LiveStore> {
        &self.store
    }

    /// Register a stream as live.
    ///
    /// The record and its leaderboard entry start at zero viewers. Fails
    /// with `AlreadyLive` when the owner already has a live stream.
    pub async fn create(&self, stream: &LiveStream) -> AppResult<()> {
        let index_key = keys::user_stream(stream.username());
        if let Some(existing) = self.store.get(&index_key).await? {
            return Err(AppError::already_live(format!(
                "User '{}' is already live as stream {existing}",
                stream.username()
            )));
        }

        let mut fresh = stream.clone();
        fresh.viewers = 0;
        fresh.polled_viewers = 0;

        let record_key = keys::stream(stream.id);
        let member = stream.id.to_string();
        let tx = Transaction::new()
            .require_absent(&index_key)
            .require_absent(&record_key)
            .hash_set(&record_key, record::encode(&fresh))
            .set_add(keys::LIVE_STREAMS, &member)
            .ranked_add(keys::category_leaderboard(stream.category.id), &member, 0.0)
            .put(&index_key, &member);

        match self.store.commit(tx).await? {
            CommitOutcome::Applied => {
                info!(
                    stream_id = %stream.id,
                    username = %stream.username(),
                    category_id = %stream.category.id,
                    "Stream is live"
                );
                Ok(())
            }
            CommitOutcome::Rejected { guard: 0 } => Err(AppError::already_live(format!(
                "User '{}' is already live",
                stream.username()
            ))),
            CommitOutcome::Rejected { .. } => {
                error!(
                    stream_id = %stream.id,
                    username = %stream.username(),
                    "Stream record exists without a username index entry"
                );
                Err(AppError::inconsistent_state(format!(
                    "Record for stream {} exists but '{}' is not indexed",
                    stream.id,
                    stream.username()
                )))
            }
        }
    }

    /// Fetch a live stream by id.
    pub async fn get(&self, id: StreamId) -> AppResult<LiveStream> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Stream {id} is not live")))
    }

    /// Fetch a live stream by its owner's username.
    ///
    /// An index entry without a record is reported as `InconsistentState`,
    /// never as not found.
    pub async fn get_by_username(&self, username: &str) -> AppResult<LiveStream> {
        let id = self
            .indexed_id(username)
            .await?
            .ok_or_else(|| AppError::not_found(format!("User '{username}' is not live")))?;

        match self.find(id).await? {
            Some(stream) => Ok(stream),
            None => Err(dangling_index(username, id)),
        }
    }

    /// One page of a category's live streams, most viewers first.
    ///
    /// Leaderboard entries whose record is missing are skipped.
    pub async fn list(&self, category: CategoryId, page: PageRequest) -> AppResult<Vec<LiveStream>> {
        let entries = self
            .store
            .ranked_range(
                &keys::category_leaderboard(category),
                page.offset() as usize,
                page.limit() as usize,
            )
            .await?;

        let mut ids = Vec::with_capacity(entries.len());
        for (member, _) in entries {
            match member.parse::<StreamId>() {
                Ok(id) => ids.push(id),
                Err(_) => warn!(%category, member = %member, "Skipping malformed leaderboard member"),
            }
        }

        let records = join_all(ids.iter().map(|id| self.find(*id))).await;
        let mut streams = Vec::with_capacity(ids.len());
        for (id, record) in ids.into_iter().zip(records) {
            match record? {
                Some(stream) => streams.push(stream),
                None => warn!(
                    %category,
                    stream_id = %id,
                    "Leaderboard entry has no stream record, skipping"
                ),
            }
        }
        Ok(streams)
    }

    /// Number of live streams in a category.
    pub async fn count(&self, category: CategoryId) -> AppResult<u64> {
        self.store
            .ranked_len(&keys::category_leaderboard(category))
            .await
    }

    /// Ids of every live stream, ascending.
    pub async fn live_ids(&self) -> AppResult<Vec<StreamId>> {
        let members = self.store.set_members(keys::LIVE_STREAMS).await?;
        let mut ids: Vec<StreamId> = members
            .iter()
            .filter_map(|m| match m.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(member = %m, "Skipping malformed live-set member");
                    None
                }
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Every live stream, read `page_size` records at a time.
    pub async fn live_streams(&self, page_size: usize) -> AppResult<Vec<LiveStream>> {
        let ids = self.live_ids().await?;
        let mut streams = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(page_size.max(1)) {
            let records = join_all(chunk.iter().map(|id| self.find(*id))).await;
            for (id, record) in chunk.iter().zip(records) {
                match record? {
                    Some(stream) => streams.push(stream),
                    None => warn!(stream_id = %id, "Live id has no stream record, skipping"),
                }
            }
        }
        Ok(streams)
    }

    /// Whether a stream id is live.
    pub async fn is_live(&self, id: StreamId) -> AppResult<bool> {
        self.store
            .set_contains(keys::LIVE_STREAMS, &id.to_string())
            .await
    }

    /// Set the effective viewer count of a stream and its leaderboard score.
    pub async fn update_viewers(&self, id: StreamId, viewers: u64) -> AppResult<()> {
        self.write_viewers(id, viewers, None).await
    }

    /// Store a polled upstream count together with the effective count it
    /// produced.
    pub async fn record_polled_viewers(
        &self,
        id: StreamId,
        polled: u64,
        effective: u64,
    ) -> AppResult<()> {
        self.write_viewers(id, effective, Some(polled)).await
    }

    async fn write_viewers(&self, id: StreamId, viewers: u64, polled: Option<u64>) -> AppResult<()> {
        let member = id.to_string();
        self.commit_against(id, stream_not_live, |current| {
            let record_key = keys::stream(id);
            let mut fields = vec![(record::VIEWERS.to_string(), viewers.to_string())];
            if let Some(polled) = polled {
                fields.push((record::POLLED_VIEWERS.to_string(), polled.to_string()));
            }
            Transaction::new()
                .require_exists(&record_key)
                .require_field(&record_key, record::CATEGORY_ID, current.category.id.to_string())
                .hash_set(&record_key, fields)
                .ranked_add(
                    keys::category_leaderboard(current.category.id),
                    &member,
                    viewers as f64,
                )
        })
        .await?;

        debug!(stream_id = %id, viewers, "Updated viewer count");
        Ok(())
    }

    /// Replace a stream's thumbnail.
    pub async fn update_thumbnail(&self, id: StreamId, thumbnail: &str) -> AppResult<()> {
        self.commit_against(id, stream_not_live, |_| {
            let record_key = keys::stream(id);
            Transaction::new()
                .require_exists(&record_key)
                .hash_set_field(&record_key, record::THUMBNAIL, thumbnail)
        })
        .await?;
        Ok(())
    }

    /// Change a stream's title and/or category.
    ///
    /// A category change moves the leaderboard entry in the same
    /// transaction, keeping the current viewer count as its score.
    pub async fn update_metadata(
        &self,
        id: StreamId,
        title: Option<&str>,
        category: Option<&StreamCategory>,
    ) -> AppResult<LiveStream> {
        if title.is_none() && category.is_none() {
            return self.get(id).await;
        }

        let member = id.to_string();
        let current = self
            .commit_against(id, stream_not_live, |current| {
                let record_key = keys::stream(id);
                let old_category = current.category.id;
                let mut fields = Vec::new();
                let mut tx = Transaction::new()
                    .require_exists(&record_key)
                    .require_field(&record_key, record::CATEGORY_ID, old_category.to_string());

                if let Some(title) = title {
                    fields.push((record::TITLE.to_string(), title.to_string()));
                }
                if let Some(category) = category {
                    fields.extend(record::category_fields(category));
                    if category.id != old_category {
                        tx = tx
                            .require_field(&record_key, record::VIEWERS, current.viewers.to_string())
                            .ranked_remove(keys::category_leaderboard(old_category), &member)
                            .ranked_add(
                                keys::category_leaderboard(category.id),
                                &member,
                                current.viewers as f64,
                            );
                    }
                }
                tx.hash_set(&record_key, fields)
            })
            .await?;

        let mut updated = current;
        if let Some(title) = title {
            updated.title = title.to_string();
        }
        if let Some(category) = category {
            if category.id != updated.category.id {
                info!(
                    stream_id = %id,
                    from = %updated.category.id,
                    to = %category.id,
                    "Stream moved to another category"
                );
            }
            updated.category = category.clone();
        }
        Ok(updated)
    }

    /// End a live stream, removing every structure that references it.
    ///
    /// Returns the record as it was just before removal. Fails with
    /// `AlreadyEnded` when the stream is not live.
    pub async fn delete(&self, target: StreamTarget) -> AppResult<LiveStream> {
        let id = match &target {
            StreamTarget::Id(id) => *id,
            StreamTarget::Username(username) => {
                let id = self.indexed_id(username).await?.ok_or_else(|| {
                    AppError::already_ended(format!("User '{username}' is not live"))
                })?;
                if self.find(id).await?.is_none() {
                    return Err(dangling_index(username, id));
                }
                id
            }
        };

        let member = id.to_string();
        let ended = self
            .commit_against(id, stream_already_ended, |current| {
                let record_key = keys::stream(id);
                Transaction::new()
                    .require_exists(&record_key)
                    .require_field(
                        &record_key,
                        record::CATEGORY_ID,
                        current.category.id.to_string(),
                    )
                    .delete(&record_key)
                    .ranked_remove(keys::category_leaderboard(current.category.id), &member)
                    .set_remove(keys::LIVE_STREAMS, &member)
                    .delete(keys::user_stream(current.username()))
            })
            .await?;

        info!(stream_id = %id, username = %ended.username(), "Stream ended");
        Ok(ended)
    }

    /// Sum of the viewer counts of a category's `n` largest streams.
    pub async fn top_viewer_sum(&self, category: CategoryId, n: usize) -> AppResult<u64> {
        let entries = self
            .store
            .ranked_range(&keys::category_leaderboard(category), 0, n)
            .await?;
        Ok(entries.iter().map(|(_, score)| score.max(0.0) as u64).sum())
    }

    /// Store a category's aggregate viewer count.
    pub async fn set_category_viewers(&self, category: CategoryId, viewers: u64) -> AppResult<()> {
        let tx = Transaction::new().hash_set(
            keys::category(category),
            vec![
                (CATEGORY_VIEWERS.to_string(), viewers.to_string()),
                (CATEGORY_UPDATED_AT.to_string(), Utc::now().to_rfc3339()),
            ],
        );
        self.store.commit(tx).await?;
        Ok(())
    }

    /// Last aggregate viewer count written for a category.
    pub async fn category_viewers(&self, category: CategoryId) -> AppResult<Option<u64>> {
        let fields = self.store.hash_get_all(&keys::category(category)).await?;
        Ok(fields.get(CATEGORY_VIEWERS).and_then(|v| v.parse().ok()))
    }

    async fn find(&self, id: StreamId) -> AppResult<Option<LiveStream>> {
        let fields = self.store.hash_get_all(&keys::stream(id)).await?;
        record::decode(&fields)
    }

    async fn indexed_id(&self, username: &str) -> AppResult<Option<StreamId>> {
        let Some(raw) = self.store.get(&keys::user_stream(username)).await? else {
            return Ok(None);
        };
        raw.parse().map(Some).map_err(|_| {
            error!(username, value = %raw, "Username index holds a malformed stream id");
            AppError::inconsistent_state(format!("Index for '{username}' holds '{raw}'"))
        })
    }

    /// Build a transaction against the current record and commit it,
    /// rebuilding when a concurrent write invalidated a guard.
    ///
    /// Returns the record snapshot the applied transaction was built from.
    async fn commit_against<F>(
        &self,
        id: StreamId,
        missing: fn(StreamId) -> AppError,
        build: F,
    ) -> AppResult<LiveStream>
    where
        F: Fn(&LiveStream) -> Transaction,
    {
        for attempt in 1..=MAX_GUARD_RETRIES {
            let current = self.find(id).await?.ok_or_else(|| missing(id))?;
            match self.store.commit(build(&current)).await? {
                CommitOutcome::Applied => return Ok(current),
                CommitOutcome::Rejected { guard } => {
                    debug!(stream_id = %id, attempt, guard, "Stream changed concurrently, retrying");
                }
            }
        }
        Err(AppError::conflict(format!(
            "Stream {id} kept changing during update"
        )))
    }
}

fn stream_not_live(id: StreamId) -> AppError {
    AppError::not_found(format!("Stream {id} is not live"))
}

fn stream_already_ended(id: StreamId) -> AppError {
    AppError::already_ended(format!("Stream {id} is not live"))
}

fn dangling_index(username: &str, id: StreamId) -> AppError {
    error!(
        username,
        stream_id = %id,
        "Username index points at a missing stream record"
    );
    AppError::inconsistent_state(format!(
        "Index for '{username}' points at stream {id} which has no record"
    ))
}
