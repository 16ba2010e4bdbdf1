//! Advisory task locks in a shared key-value store.
//!
//! A lock is a key holding a random token with a TTL. Only the holder of the token may delete
//! it, so a runner whose lock already expired and was taken over cannot release somebody
//! else's lock.

use crate::clock::Clock;
use crate::constants::TASK_LOCK_KEY_PREFIX;
use crate::{CoreError, CoreResult};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// The subset of a shared KV store the reconciliation tasks rely on.
pub trait KeyValueStore: Send + Sync {
    /// Stores `value` under `key` for `ttl` unless the key is present. Returns whether the
    /// value was stored.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<bool>;

    fn get(&self, key: &str) -> CoreResult<Option<String>>;

    /// Stores `value` under `key` without expiry.
    fn set(&self, key: &str, value: &str) -> CoreResult<()>;

    /// Deletes `key` only while it still holds `value`. Returns whether it was deleted.
    fn delete_if_value(&self, key: &str, value: &str) -> CoreResult<bool>;
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Process-local [`KeyValueStore`] whose expiry follows the given clock.
pub struct InMemoryKeyValueStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKeyValueStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Locks the map and drops every expired entry.
    fn live_entries(&self) -> CoreResult<MutexGuard<'_, HashMap<String, Entry>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CoreError::Transient("key-value store lock poisoned".into()))?;
        let now = self.clock.now();
        entries.retain(|_, e| e.expires_at.map_or(true, |at| at > now));
        Ok(entries)
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CoreResult<bool> {
        let expires_at = self.clock.now() + ttl;
        let mut entries = self.live_entries()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(true)
    }

    fn get(&self, key: &str) -> CoreResult<Option<String>> {
        Ok(self.live_entries()?.get(key).map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        self.live_entries()?.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    fn delete_if_value(&self, key: &str, value: &str) -> CoreResult<bool> {
        let mut entries = self.live_entries()?;
        if entries.get(key).is_some_and(|e| e.value == value) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }
}

/// A held advisory lock for one scheduled task.
///
/// Released on [`TaskLock::release`] or, best effort, on drop.
pub struct TaskLock {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    task: String,
    key: String,
    token: String,
    deadline: DateTime<Utc>,
    released: bool,
}

impl TaskLock {
    /// Tries to take the lock of `task` for `ttl`. `None` when another runner holds it.
    pub fn acquire(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        task: &str,
        ttl: Duration,
    ) -> CoreResult<Option<Self>> {
        let key = format!("{TASK_LOCK_KEY_PREFIX}{task}");
        let token = Uuid::new_v4().to_string();
        let deadline = clock.now() + ttl;
        if !kv.set_if_absent(&key, &token, ttl)? {
            tracing::debug!(task, "task lock is held elsewhere");
            return Ok(None);
        }
        Ok(Some(Self {
            kv,
            clock,
            task: task.to_string(),
            key,
            token,
            deadline,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Fails with [`CoreError::Transient`] once the lock expired or changed hands.
    ///
    /// Tasks call this before every side effect.
    pub fn ensure_held(&self) -> CoreResult<()> {
        if self.clock.now() >= self.deadline {
            return Err(CoreError::Transient(format!(
                "lock of task {} expired",
                self.task
            )));
        }
        if self.kv.get(&self.key)?.as_deref() != Some(self.token.as_str()) {
            return Err(CoreError::Transient(format!(
                "lock of task {} is no longer held",
                self.task
            )));
        }
        Ok(())
    }

    /// Releases the lock if it is still ours. Returns whether it was.
    pub fn release(mut self) -> CoreResult<bool> {
        self.released = true;
        self.kv.delete_if_value(&self.key, &self.token)
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.kv.delete_if_value(&self.key, &self.token) {
            tracing::warn!(task = %self.task, error = %err, "failed to release task lock");
        }
    }
}
