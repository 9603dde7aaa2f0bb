//! Redis implementation of [`LiveStore`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::debug;

use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::{CommitOutcome, Transaction};

use super::client::{RedisClient, map_err};
use super::script::{DELETE_IF_EQUALS_SCRIPT, EncodedTransaction, TRANSACTION_SCRIPT};

/// Redis-backed live-state store.
///
/// Transactions touch several keys in one script, so all live-state keys
/// must reside on one Redis node.
#[derive(Clone)]
pub struct RedisLiveStore {
    /// Redis client.
    client: RedisClient,
    /// Transaction interpreter.
    transaction: Script,
    /// Compare-and-delete script.
    delete_if_equals: Script,
}

impl std::fmt::Debug for RedisLiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLiveStore")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl RedisLiveStore {
    /// Create a new Redis live store.
    pub fn new(client: RedisClient) -> Self {
        Self {
            client,
            transaction: Script::new(TRANSACTION_SCRIPT),
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
        }
    }
}

#[async_trait]
impl LiveStore for RedisLiveStore {
    async fn commit(&self, tx: Transaction) -> AppResult<CommitOutcome> {
        if tx.is_empty() && tx.guards().is_empty() {
            return Ok(CommitOutcome::Applied);
        }

        let encoded = EncodedTransaction::encode(&tx);
        let mut invocation = self.transaction.prepare_invoke();
        for key in &encoded.keys {
            invocation.key(self.client.prefixed_key(key));
        }
        for arg in &encoded.args {
            invocation.arg(arg);
        }

        let mut conn = self.client.conn_mut();
        let rejected: i64 = invocation.invoke_async(&mut conn).await.map_err(map_err)?;

        match rejected {
            0 => Ok(CommitOutcome::Applied),
            n if n > 0 => {
                debug!(guard = n - 1, keys = ?encoded.keys, "Transaction rejected");
                Ok(CommitOutcome::Rejected {
                    guard: (n - 1) as usize,
                })
            }
            n => Err(AppError::cache(format!(
                "Transaction script returned unexpected value {n}"
            ))),
        }
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.client.conn_mut();
        conn.get(self.client.prefixed_key(key))
            .await
            .map_err(map_err)
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<HashMap<String, String>> {
        let mut conn = self.client.conn_mut();
        conn.hgetall(self.client.prefixed_key(key))
            .await
            .map_err(map_err)
    }

    async fn ranked_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = offset as isize;
        let stop = (offset + limit - 1) as isize;
        let mut conn = self.client.conn_mut();
        conn.zrevrange_withscores(self.client.prefixed_key(key), start, stop)
            .await
            .map_err(map_err)
    }

    async fn ranked_len(&self, key: &str) -> AppResult<u64> {
        let mut conn = self.client.conn_mut();
        conn.zcard(self.client.prefixed_key(key))
            .await
            .map_err(map_err)
    }

    async fn set_members(&self, key: &str) -> AppResult<Vec<String>> {
        let mut conn = self.client.conn_mut();
        conn.smembers(self.client.prefixed_key(key))
            .await
            .map_err(map_err)
    }

    async fn set_contains(&self, key: &str, member: &str) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        conn.sismember(self.client.prefixed_key(key), member)
            .await
            .map_err(map_err)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();

        // SET key value PX ttl NX
        let result: Option<String> = redis::cmd("SET")
            .arg(self.client.prefixed_key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        Ok(result.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let deleted: i64 = self
            .delete_if_equals
            .key(self.client.prefixed_key(key))
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(deleted == 1)
    }

    async fn health_check(&self) -> AppResult<bool> {
        let mut conn = self.client.conn_mut();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;
        Ok(pong == "PONG")
    }
}
