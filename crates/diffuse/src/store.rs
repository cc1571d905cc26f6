//! # Result store
//!
//! A bounded map from result key to [`ResultHandle`]. When full, adding a new
//! key evicts an older entry, chosen by the [`EvictionPolicy`]. Eviction does
//! not care whether the evicted invocation has finished; a caller that comes
//! back for it later gets `ResultLost`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::warn;

use crate::handle::ResultHandle;

/// Identifies one execution on one peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("{:032x}", rand::random::<u128>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Oldest insertion goes first.
    #[default]
    Fifo,
    /// Oldest entry that was already resolved and collected goes first,
    /// falling back to the oldest entry.
    PreferRetrieved,
}

pub struct ResultStore {
    inner: Mutex<Inner>,
    capacity: usize,
    policy: EvictionPolicy,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, ResultHandle>,
    order: VecDeque<String>,
}

impl Inner {
    fn victim(&self, policy: EvictionPolicy) -> Option<usize> {
        if self.order.is_empty() {
            return None;
        }
        let collected = match policy {
            EvictionPolicy::Fifo => None,
            EvictionPolicy::PreferRetrieved => self.order.iter().position(|key| {
                self.entries.get(key).is_some_and(|h| h.is_resolved() && h.is_retrieved())
            }),
        };
        Some(collected.unwrap_or(0))
    }
}

impl ResultStore {
    pub fn new(capacity: usize, policy: EvictionPolicy) -> Self {
        Self { inner: Mutex::new(Inner::default()), capacity: capacity.max(1), policy }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Inserts a handle, returning the entry evicted to make room, if any.
    ///
    /// Re-adding an existing key replaces its handle in place.
    pub fn add(&self, key: impl Into<String>, handle: ResultHandle) -> Option<(String, ResultHandle)> {
        let key = key.into();
        let mut inner = self.lock();
        if let Some(slot) = inner.entries.get_mut(&key) {
            *slot = handle;
            return None;
        }

        let evicted = if inner.entries.len() >= self.capacity {
            inner.victim(self.policy).and_then(|idx| inner.order.remove(idx)).and_then(|old| {
                let handle = inner.entries.remove(&old)?;
                if !handle.is_resolved() {
                    warn!(key = %old, "evicting a result that is still running");
                }
                Some((old, handle))
            })
        } else {
            None
        };

        inner.order.push_back(key.clone());
        inner.entries.insert(key, handle);
        evicted
    }

    pub fn get(&self, key: &str) -> Option<ResultHandle> {
        self.lock().entries.get(key).cloned()
    }

    /// Whether the key is present, finished or not.
    pub fn is_cached(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Whether the key is present and not yet resolved.
    pub fn is_running(&self, key: &str) -> bool {
        self.lock().entries.get(key).is_some_and(|h| !h.is_resolved())
    }

    pub fn remove(&self, key: &str) -> Option<ResultHandle> {
        let mut inner = self.lock();
        let handle = inner.entries.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
