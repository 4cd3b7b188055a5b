//! Short-lived cache of verified identities keyed by username.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

use super::UserRecord;

/// Identity cache contract.
///
/// Implementations must be safe under concurrent access. Concurrent writes for
/// the same username are last-writer-wins.
pub trait IdentityCache: Send + Sync {
    /// Fetch a record that is still within its TTL.
    fn get(&self, username: &str) -> Option<UserRecord>;

    /// Store a record valid for `ttl` from now.
    fn put(&self, username: &str, record: UserRecord, ttl: Duration);

    /// Drop every expired entry and return how many were dropped.
    fn purge_expired(&self) -> usize {
        0
    }
}

struct CacheEntry {
    record: UserRecord,
    expires_at: Instant,
}

/// In-memory TTL cache backed by a concurrent map.
#[derive(Default)]
pub struct MemoryIdentityCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryIdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including ones that expired but were not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IdentityCache for MemoryIdentityCache {
    fn get(&self, username: &str) -> Option<UserRecord> {
        let now = Instant::now();
        let fresh = {
            let entry = self.entries.get(username)?;
            if entry.expires_at > now {
                Some(entry.record.clone())
            } else {
                None
            }
        };

        if fresh.is_none() {
            // Only evict if nobody refreshed the entry in the meantime.
            self.entries
                .remove_if(username, |_, entry| entry.expires_at <= now);
        }
        fresh
    }

    fn put(&self, username: &str, record: UserRecord, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            warn!(ttl_secs = ttl.as_secs(), "identity cache TTL out of range; not caching");
            return;
        };
        self.entries
            .insert(username.to_string(), CacheEntry { record, expires_at });
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before.saturating_sub(self.len())
    }
}

/// Cache that never stores anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIdentityCache;

impl IdentityCache for NoopIdentityCache {
    fn get(&self, _username: &str) -> Option<UserRecord> {
        None
    }

    fn put(&self, _username: &str, _record: UserRecord, _ttl: Duration) {}
}
