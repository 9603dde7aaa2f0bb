//! Lua encoding of [`Transaction`] values.
//!
//! Every transaction is executed by the same interpreter script so Redis
//! caches it once. The transaction is flattened into `KEYS` (deduplicated)
//! and an `ARGV` program:
//!
//! ```text
//! <guard count> { <kind> <key index> [<field> <value>] }*
//! <op count>    { <kind> <key index> <operands>* }*
//! ```
//!
//! The script returns `0` when applied, or the 1-based index of the first
//! failing guard. Guards are evaluated before any write, so a rejected
//! transaction leaves the store untouched.
//!
//! Redis does not roll back a script that fails midway, so a dry pass over
//! the ops checks each key's type (tracking the types earlier ops leave
//! behind) and raises `WRONGTYPE` before the first write. Apart from a
//! server fault, a transaction is applied whole or not at all.

use std::collections::HashMap;

use streamhub_core::types::{Guard, StoreOp, Transaction};

/// Interpreter for encoded transactions.
pub const TRANSACTION_SCRIPT: &str = r#"
    local pos = 1
    local function nxt()
        local v = ARGV[pos]
        pos = pos + 1
        return v
    end

    local guard_count = tonumber(nxt())
    for g = 1, guard_count do
        local kind = nxt()
        local key = KEYS[tonumber(nxt())]
        if kind == 'absent' then
            if redis.call('EXISTS', key) == 1 then return g end
        elseif kind == 'exists' then
            if redis.call('EXISTS', key) == 0 then return g end
        else
            local field = nxt()
            local expected = nxt()
            if redis.call('HGET', key, field) ~= expected then return g end
        end
    end

    local wants = { hset = 'hash', hdel = 'hash', zadd = 'zset', zrem = 'zset', sadd = 'set', srem = 'set' }
    local operands = { hdel = 1, zadd = 2, zrem = 1, sadd = 1, srem = 1, set = 1, del = 0, pexpire = 1 }
    local ops_start = pos
    local op_count = tonumber(nxt())
    local types = {}
    for o = 1, op_count do
        local kind = nxt()
        local key = KEYS[tonumber(nxt())]
        if kind == 'hset' then
            pos = pos + tonumber(nxt()) * 2
        else
            pos = pos + operands[kind]
        end
        local current = types[key]
        if current == nil then
            current = redis.call('TYPE', key)['ok']
        end
        local want = wants[kind]
        if want then
            if current ~= 'none' and current ~= want then
                return redis.error_reply('WRONGTYPE ' .. kind .. ' against ' .. current .. ' key ' .. key)
            end
            types[key] = want
        elseif kind == 'set' then
            types[key] = 'string'
        elseif kind == 'del' then
            types[key] = 'none'
        else
            types[key] = current
        end
    end

    pos = ops_start
    op_count = tonumber(nxt())
    for o = 1, op_count do
        local kind = nxt()
        local key = KEYS[tonumber(nxt())]
        if kind == 'hset' then
            local n = tonumber(nxt())
            local args = {}
            for i = 1, n * 2 do args[i] = nxt() end
            redis.call('HSET', key, unpack(args))
        elseif kind == 'hdel' then
            redis.call('HDEL', key, nxt())
        elseif kind == 'zadd' then
            local score = nxt()
            local member = nxt()
            redis.call('ZADD', key, score, member)
        elseif kind == 'zrem' then
            redis.call('ZREM', key, nxt())
        elseif kind == 'sadd' then
            redis.call('SADD', key, nxt())
        elseif kind == 'srem' then
            redis.call('SREM', key, nxt())
        elseif kind == 'set' then
            redis.call('SET', key, nxt())
        elseif kind == 'del' then
            redis.call('DEL', key)
        elseif kind == 'pexpire' then
            redis.call('PEXPIRE', key, nxt())
        end
    end
    return 0
"#;

/// Delete a key only if it holds the expected value.
///
/// KEYS[1] = key, ARGV[1] = expected value. Returns 1 if deleted.
pub const DELETE_IF_EQUALS_SCRIPT: &str = r#"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
"#;

/// A transaction flattened into script inputs.
#[derive(Debug, Default, PartialEq)]
pub struct EncodedTransaction {
    /// Logical keys, in `KEYS` order.
    pub keys: Vec<String>,
    /// Script arguments.
    pub args: Vec<String>,
}

impl EncodedTransaction {
    /// Flatten a transaction.
    pub fn encode(tx: &Transaction) -> Self {
        let mut encoder = Encoder::default();

        encoder.push(tx.guards().len());
        for guard in tx.guards() {
            match guard {
                Guard::Absent(key) => {
                    encoder.push("absent");
                    encoder.key(key);
                }
                Guard::Exists(key) => {
                    encoder.push("exists");
                    encoder.key(key);
                }
                Guard::FieldEquals { key, field, value } => {
                    encoder.push("field");
                    encoder.key(key);
                    encoder.push(field);
                    encoder.push(value);
                }
            }
        }

        encoder.push(tx.ops().len());
        for op in tx.ops() {
            match op {
                StoreOp::HashSet { key, fields } => {
                    encoder.push("hset");
                    encoder.key(key);
                    encoder.push(fields.len());
                    for (field, value) in fields {
                        encoder.push(field);
                        encoder.push(value);
                    }
                }
                StoreOp::HashDelete { key, field } => {
                    encoder.push("hdel");
                    encoder.key(key);
                    encoder.push(field);
                }
                StoreOp::RankedAdd { key, member, score } => {
                    encoder.push("zadd");
                    encoder.key(key);
                    encoder.push(score);
                    encoder.push(member);
                }
                StoreOp::RankedRemove { key, member } => {
                    encoder.push("zrem");
                    encoder.key(key);
                    encoder.push(member);
                }
                StoreOp::SetAdd { key, member } => {
                    encoder.push("sadd");
                    encoder.key(key);
                    encoder.push(member);
                }
                StoreOp::SetRemove { key, member } => {
                    encoder.push("srem");
                    encoder.key(key);
                    encoder.push(member);
                }
                StoreOp::Put { key, value } => {
                    encoder.push("set");
                    encoder.key(key);
                    encoder.push(value);
                }
                StoreOp::Delete { key } => {
                    encoder.push("del");
                    encoder.key(key);
                }
                StoreOp::Expire { key, ttl } => {
                    encoder.push("pexpire");
                    encoder.key(key);
                    encoder.push(ttl.as_millis().max(1));
                }
            }
        }

        encoder.finish()
    }
}

#[derive(Default)]
struct Encoder {
    keys: Vec<String>,
    index: HashMap<String, usize>,
    args: Vec<String>,
}

impl Encoder {
    fn push(&mut self, value: impl ToString) {
        self.args.push(value.to_string());
    }

    fn key(&mut self, key: &str) {
        let next = self.keys.len() + 1;
        let position = *self.index.entry(key.to_string()).or_insert(next);
        if position == next {
            self.keys.push(key.to_string());
        }
        self.push(position);
    }

    fn finish(self) -> EncodedTransaction {
        EncodedTransaction {
            keys: self.keys,
            args: self.args,
        }
    }
}
