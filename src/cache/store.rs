//! Key-value store contract and the in-process backend.
//!
//! [`KvStore`] is the only way the cache touches storage. Every operation is atomic
//! per key; nothing spans keys. `infra::redis` provides the production backend,
//! [`MemoryStore`] serves tests and single-process deployments.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use super::lock::{rw_read, rw_write};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Connection, IO or timeout failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store answered, but not in a shape we understand.
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// Subset of the store's self-reported statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreInfo {
    /// Bytes in use; `None` when the store does not report it.
    pub used_memory: Option<u64>,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<(), StoreError>;

    /// Deleting an absent field is not an error.
    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError>;

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Deleting an absent key is not an error.
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Keys matching a glob (`*`, `?`, `[...]`, `\` escapes).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Expire `key` at the given unix timestamp (seconds). Absent keys are left alone.
    async fn expire_at(&self, key: &str, unix_seconds: i64) -> Result<(), StoreError>;

    async fn info(&self) -> Result<StoreInfo, StoreError>;
}

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, Bytes>),
    Set(BTreeSet<String>),
}

impl Value {
    fn footprint(&self) -> u64 {
        let bytes = match self {
            Value::Hash(fields) => fields.iter().map(|(k, v)| k.len() + v.len()).sum::<usize>(),
            Value::Set(members) => members.iter().map(String::len).sum::<usize>(),
        };
        bytes as u64
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

impl Entry {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`KvStore`] with lazy expiry.
///
/// Reported memory is the sum of stored field and member sizes unless pinned with
/// [`MemoryStore::pin_used_memory`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    pinned_memory: RwLock<Option<Option<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a fixed `used_memory` figure from [`KvStore::info`].
    pub fn pin_used_memory(&self, used: Option<u64>) {
        *rw_write(&self.pinned_memory, "pin_used_memory") = Some(used);
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = now();
        rw_read(&self.entries, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_live<R>(&self, key: &str, op: &'static str, read: impl FnOnce(&Value) -> R) -> Option<R> {
        let now = now();
        let entries = rw_read(&self.entries, op);
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| read(&entry.value))
    }

    fn with_live_mut<R>(
        &self,
        key: &str,
        op: &'static str,
        write: impl FnOnce(&mut Entry) -> R,
    ) -> Option<R> {
        let now = now();
        let mut entries = rw_write(&self.entries, op);
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key).map(write)
    }

    fn upsert(
        &self,
        key: &str,
        op: &'static str,
        fresh: impl FnOnce() -> Value,
        write: impl FnOnce(&mut Value) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let now = now();
        let mut entries = rw_write(&self.entries, op);
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: fresh(),
            expires_at: None,
        });
        write(&mut entry.value)
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Protocol(format!("key `{key}` holds the wrong kind of value"))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>, StoreError> {
        match self.with_live(key, "hget", |value| match value {
            Value::Hash(fields) => Ok(fields.get(field).cloned()),
            Value::Set(_) => Err(wrong_type(key)),
        }) {
            Some(result) => result,
            None => Ok(None),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<(), StoreError> {
        self.upsert(
            key,
            "hset",
            || Value::Hash(HashMap::new()),
            |stored| match stored {
                Value::Hash(fields) => {
                    fields.insert(field.to_string(), value);
                    Ok(())
                }
                Value::Set(_) => Err(wrong_type(key)),
            },
        )
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), StoreError> {
        let mut entries = rw_write(&self.entries, "hdel");
        let now_empty = match entries.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::Hash(fields)) => {
                fields.remove(field);
                fields.is_empty()
            }
            Some(Value::Set(_)) => return Err(wrong_type(key)),
            None => false,
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        match self.with_live(key, "hexists", |value| match value {
            Value::Hash(fields) => Ok(fields.contains_key(field)),
            Value::Set(_) => Err(wrong_type(key)),
        }) {
            Some(result) => result,
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_live(key, "exists", |_| ()).is_some())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        rw_write(&self.entries, "del").remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = now();
        let entries = rw_read(&self.entries, "keys");
        let mut matched: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.upsert(
            key,
            "sadd",
            || Value::Set(BTreeSet::new()),
            |stored| match stored {
                Value::Set(members) => {
                    members.insert(member.to_string());
                    Ok(())
                }
                Value::Hash(_) => Err(wrong_type(key)),
            },
        )
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.with_live(key, "smembers", |value| match value {
            Value::Set(members) => Ok(members.iter().cloned().collect()),
            Value::Hash(_) => Err(wrong_type(key)),
        }) {
            Some(result) => result,
            None => Ok(Vec::new()),
        }
    }

    async fn expire_at(&self, key: &str, unix_seconds: i64) -> Result<(), StoreError> {
        self.with_live_mut(key, "expire_at", |entry| {
            entry.expires_at = Some(unix_seconds);
        });
        Ok(())
    }

    async fn info(&self) -> Result<StoreInfo, StoreError> {
        if let Some(pinned) = *rw_read(&self.pinned_memory, "info") {
            return Ok(StoreInfo {
                used_memory: pinned,
            });
        }

        let now = now();
        let used: u64 = rw_read(&self.entries, "info")
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, entry)| key.len() as u64 + entry.value.footprint())
            .sum();
        Ok(StoreInfo {
            used_memory: Some(used),
        })
    }
}

/// Redis-style glob matching over characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_at(&pattern, &text)
}

fn glob_at(pattern: &[char], text: &[char]) -> bool {
    let Some((&head, rest)) = pattern.split_first() else {
        return text.is_empty();
    };

    match head {
        '*' => (0..=text.len()).any(|skip| glob_at(rest, &text[skip..])),
        '?' => !text.is_empty() && glob_at(rest, &text[1..]),
        '[' => {
            let Some((&ch, text_rest)) = text.split_first() else {
                return false;
            };
            match class_match(rest, ch) {
                Some((true, after)) => glob_at(after, text_rest),
                Some((false, _)) => false,
                // Unterminated class: treat `[` literally.
                None => ch == '[' && glob_at(rest, text_rest),
            }
        }
        '\\' if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_at(&rest[1..], &text[1..])
        }
        literal => text.first() == Some(&literal) && glob_at(rest, &text[1..]),
    }
}

/// Match `ch` against a class body starting right after `[`. Returns the verdict and
/// the pattern remainder after `]`.
fn class_match(body: &[char], ch: char) -> Option<(bool, &[char])> {
    let (negate, mut index) = match body.first() {
        Some('^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;

    while index < body.len() {
        match body[index] {
            ']' => return Some((matched != negate, &body[index + 1..])),
            '\\' if index + 1 < body.len() => {
                matched |= body[index + 1] == ch;
                index += 2;
            }
            low if index + 2 < body.len() && body[index + 1] == '-' && body[index + 2] != ']' => {
                let high = body[index + 2];
                matched |= low <= ch && ch <= high;
                index += 3;
            }
            single => {
                matched |= single == ch;
                index += 1;
            }
        }
    }
    None
}
