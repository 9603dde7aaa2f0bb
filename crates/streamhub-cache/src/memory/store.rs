//! In-memory implementation of [`LiveStore`].
//!
//! All state sits behind one mutex. A transaction checks its guards, applies
//! its operations to a scratch copy of the touched keys and only then writes
//! the scratch back, so a failing operation leaves the store unchanged.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use streamhub_core::error::AppError;
use streamhub_core::result::AppResult;
use streamhub_core::traits::LiveStore;
use streamhub_core::types::{CommitOutcome, Guard, StoreOp, Transaction};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Ranked(HashMap<String, RankedScore>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone, Copy)]
struct RankedScore {
    score: f64,
    /// Insertion order, breaks score ties.
    seq: u64,
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    slots: HashMap<String, Slot>,
    next_seq: u64,
}

impl State {
    /// Look up a key, dropping it first if it has expired.
    fn slot(&mut self, key: &str) -> Option<&Slot> {
        let now = Instant::now();
        if self.slots.get(key).is_some_and(|s| s.is_expired(now)) {
            self.slots.remove(key);
        }
        self.slots.get(key)
    }
}

/// In-process live-state store.
#[derive(Debug, Default)]
pub struct MemoryLiveStore {
    state: Mutex<State>,
}

impl MemoryLiveStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::cache(format!("Operation against a key holding the wrong kind of value: {key}"))
}

fn op_key(op: &StoreOp) -> &str {
    match op {
        StoreOp::HashSet { key, .. }
        | StoreOp::HashDelete { key, .. }
        | StoreOp::RankedAdd { key, .. }
        | StoreOp::RankedRemove { key, .. }
        | StoreOp::SetAdd { key, .. }
        | StoreOp::SetRemove { key, .. }
        | StoreOp::Put { key, .. }
        | StoreOp::Delete { key }
        | StoreOp::Expire { key, .. } => key,
    }
}

fn hash_mut<'a>(slot: &'a mut Option<Slot>, key: &str) -> AppResult<&'a mut HashMap<String, String>> {
    match &mut slot.get_or_insert_with(|| Slot::new(Value::Hash(HashMap::new()))).value {
        Value::Hash(hash) => Ok(hash),
        _ => Err(wrong_type(key)),
    }
}

fn ranked_mut<'a>(
    slot: &'a mut Option<Slot>,
    key: &str,
) -> AppResult<&'a mut HashMap<String, RankedScore>> {
    match &mut slot.get_or_insert_with(|| Slot::new(Value::Ranked(HashMap::new()))).value {
        Value::Ranked(ranked) => Ok(ranked),
        _ => Err(wrong_type(key)),
    }
}

fn set_mut<'a>(slot: &'a mut Option<Slot>, key: &str) -> AppResult<&'a mut HashSet<String>> {
    match &mut slot.get_or_insert_with(|| Slot::new(Value::Set(HashSet::new()))).value {
        Value::Set(set) => Ok(set),
        _ => Err(wrong_type(key)),
    }
}

/// Drop a collection that became empty, as Redis does.
fn drop_if_empty(slot: &mut Option<Slot>) {
    let empty = match slot.as_ref().map(|s| &s.value) {
        Some(Value::Hash(h)) => h.is_empty(),
        Some(Value::Ranked(r)) => r.is_empty(),
        Some(Value::Set(s)) => s.is_empty(),
        _ => false,
    };
    if empty {
        *slot = None;
    }
}

fn apply(slot: &mut Option<Slot>, op: &StoreOp, next_seq: &mut u64) -> AppResult<()> {
    match op {
        StoreOp::HashSet { key, fields } => {
            let hash = hash_mut(slot, key)?;
            for (field, value) in fields {
                hash.insert(field.clone(), value.clone());
            }
        }
        StoreOp::HashDelete { key, field } => {
            if slot.is_some() {
                hash_mut(slot, key)?.remove(field);
                drop_if_empty(slot);
            }
        }
        StoreOp::RankedAdd { key, member, score } => {
            let ranked = ranked_mut(slot, key)?;
            match ranked.get_mut(member) {
                Some(existing) => existing.score = *score,
                None => {
                    *next_seq += 1;
                    ranked.insert(
                        member.clone(),
                        RankedScore {
                            score: *score,
                            seq: *next_seq,
                        },
                    );
                }
            }
        }
        StoreOp::RankedRemove { key, member } => {
            if slot.is_some() {
                ranked_mut(slot, key)?.remove(member);
                drop_if_empty(slot);
            }
        }
        StoreOp::SetAdd { key, member } => {
            set_mut(slot, key)?.insert(member.clone());
        }
        StoreOp::SetRemove { key, member } => {
            if slot.is_some() {
                set_mut(slot, key)?.remove(member);
                drop_if_empty(slot);
            }
        }
        StoreOp::Put { value, .. } => {
            *slot = Some(Slot::new(Value::Str(value.clone())));
        }
        StoreOp::Delete { .. } => {
            *slot = None;
        }
        StoreOp::Expire { ttl, .. } => {
            if let Some(existing) = slot.as_mut() {
                existing.expires_at = Some(Instant::now() + *ttl);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl LiveStore for MemoryLiveStore {
    async fn commit(&self, tx: Transaction) -> AppResult<CommitOutcome> {
        let mut state = self.state.lock().await;

        for (index, guard) in tx.guards().iter().enumerate() {
            let holds = match guard {
                Guard::Absent(key) => state.slot(key).is_none(),
                Guard::Exists(key) => state.slot(key).is_some(),
                Guard::FieldEquals { key, field, value } => match state.slot(key) {
                    Some(Slot {
                        value: Value::Hash(hash),
                        ..
                    }) => hash.get(field) == Some(value),
                    Some(_) => return Err(wrong_type(key)),
                    None => false,
                },
            };
            if !holds {
                return Ok(CommitOutcome::Rejected { guard: index });
            }
        }

        let mut scratch: HashMap<String, Option<Slot>> = HashMap::new();
        let mut next_seq = state.next_seq;
        for op in tx.ops() {
            let key = op_key(op);
            let slot = match scratch.entry(key.to_string()) {
                MapEntry::Occupied(e) => e.into_mut(),
                MapEntry::Vacant(e) => e.insert(state.slot(key).cloned()),
            };
            apply(slot, op, &mut next_seq)?;
        }

        for (key, slot) in scratch {
            match slot {
                Some(slot) => {
                    state.slots.insert(key, slot);
                }
                None => {
                    state.slots.remove(&key);
                }
            }
        }
        state.next_seq = next_seq;

        Ok(CommitOutcome::Applied)
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut state = self.state.lock().await;
        match state.slot(key) {
            Some(Slot {
                value: Value::Str(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn hash_get_all(&self, key: &str) -> AppResult<HashMap<String, String>> {
        let mut state = self.state.lock().await;
        match state.slot(key) {
            Some(Slot {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn ranked_range(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> AppResult<Vec<(String, f64)>> {
        let mut state = self.state.lock().await;
        let ranked = match state.slot(key) {
            Some(Slot {
                value: Value::Ranked(ranked),
                ..
            }) => ranked,
            Some(_) => return Err(wrong_type(key)),
            None => return Ok(Vec::new()),
        };

        let mut entries: Vec<(&String, &RankedScore)> = ranked.iter().collect();
        entries.sort_by(|a, b| {
            b.1.score
                .total_cmp(&a.1.score)
                .then_with(|| a.1.seq.cmp(&b.1.seq))
        });

        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(member, score)| (member.clone(), score.score))
            .collect())
    }

    async fn ranked_len(&self, key: &str) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        match state.slot(key) {
            Some(Slot {
                value: Value::Ranked(ranked),
                ..
            }) => Ok(ranked.len() as u64),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn set_members(&self, key: &str) -> AppResult<Vec<String>> {
        let mut state = self.state.lock().await;
        match state.slot(key) {
            Some(Slot {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.slot(key) {
            Some(Slot {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        if state.slot(key).is_some() {
            return Ok(false);
        }
        state.slots.insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let matches = matches!(
            state.slot(key),
            Some(Slot { value: Value::Str(current), .. }) if current == value
        );
        if matches {
            state.slots.remove(key);
        }
        Ok(matches)
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}
