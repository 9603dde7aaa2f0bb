//! Atomic mutation groups for the live-state store.
//!
//! A [`Transaction`] is a value: a list of preconditions ([`Guard`]) and a
//! list of operations ([`StoreOp`]) against one store. Backends commit it as
//! a single unit. Either every guard holds and every operation is applied,
//! or nothing is applied and the first failing guard is reported.

use std::time::Duration;

/// Precondition checked before any operation of a transaction runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// The key must not exist.
    Absent(String),
    /// The key must exist.
    Exists(String),
    /// The hash at `key` must hold `value` under `field`.
    FieldEquals {
        /// Hash key.
        key: String,
        /// Field name.
        field: String,
        /// Expected value.
        value: String,
    },
}

/// A single mutation inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Set one or more hash fields.
    HashSet {
        /// Hash key.
        key: String,
        /// Field/value pairs.
        fields: Vec<(String, String)>,
    },
    /// Remove one hash field.
    HashDelete {
        /// Hash key.
        key: String,
        /// Field name.
        field: String,
    },
    /// Add or re-score a member of a ranked set.
    RankedAdd {
        /// Ranked set key.
        key: String,
        /// Member.
        member: String,
        /// Score.
        score: f64,
    },
    /// Remove a member from a ranked set.
    RankedRemove {
        /// Ranked set key.
        key: String,
        /// Member.
        member: String,
    },
    /// Add a member to a plain set.
    SetAdd {
        /// Set key.
        key: String,
        /// Member.
        member: String,
    },
    /// Remove a member from a plain set.
    SetRemove {
        /// Set key.
        key: String,
        /// Member.
        member: String,
    },
    /// Write a string value.
    Put {
        /// Key.
        key: String,
        /// Value.
        value: String,
    },
    /// Remove a key of any type.
    Delete {
        /// Key.
        key: String,
    },
    /// Set a time-to-live on an existing key.
    Expire {
        /// Key.
        key: String,
        /// Time to live.
        ttl: Duration,
    },
}

/// Outcome of committing a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// All guards held; every operation was applied.
    Applied,
    /// The guard at this index failed; nothing was applied.
    Rejected {
        /// Index into [`Transaction::guards`].
        guard: usize,
    },
}

impl CommitOutcome {
    /// Whether the transaction was applied.
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// A batch of guarded mutations committed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    guards: Vec<Guard>,
    ops: Vec<StoreOp>,
}

impl Transaction {
    /// Create an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to be absent.
    pub fn require_absent(mut self, key: impl Into<String>) -> Self {
        self.guards.push(Guard::Absent(key.into()));
        self
    }

    /// Require `key` to exist.
    pub fn require_exists(mut self, key: impl Into<String>) -> Self {
        self.guards.push(Guard::Exists(key.into()));
        self
    }

    /// Require hash `key` to hold `value` under `field`.
    pub fn require_field(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.guards.push(Guard::FieldEquals {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Set hash fields.
    pub fn hash_set(mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        if !fields.is_empty() {
            self.ops.push(StoreOp::HashSet {
                key: key.into(),
                fields,
            });
        }
        self
    }

    /// Set a single hash field.
    pub fn hash_set_field(
        self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.hash_set(key, vec![(field.into(), value.into())])
    }

    /// Remove a hash field.
    pub fn hash_delete(mut self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.ops.push(StoreOp::HashDelete {
            key: key.into(),
            field: field.into(),
        });
        self
    }

    /// Add or re-score a ranked-set member.
    pub fn ranked_add(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.ops.push(StoreOp::RankedAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    /// Remove a ranked-set member.
    pub fn ranked_remove(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(StoreOp::RankedRemove {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    /// Add a set member.
    pub fn set_add(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(StoreOp::SetAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    /// Remove a set member.
    pub fn set_remove(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.ops.push(StoreOp::SetRemove {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    /// Write a string value.
    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Remove a key.
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(StoreOp::Delete { key: key.into() });
        self
    }

    /// Set a TTL on a key.
    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.ops.push(StoreOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    /// Preconditions, in evaluation order.
    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Operations, in application order.
    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    /// Whether the transaction has no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
