//! Identity caching layer shared by both authentication paths.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::Identity;

/// Cache key for a validated credential. Session and bearer keyspaces are
/// disjoint by construction.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum CacheKey {
    Session(String),
    Bearer(String),
}

struct CacheEntry {
    identity: Identity,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Time-expiring credential -> identity store, safe for arbitrarily many
/// concurrent authentications.
///
/// Only successful validations are stored; a lookup past expiration behaves
/// identically to a miss (and evicts the stale entry).
pub struct IdentityCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Identity> {
        // The read guard must drop before the eviction below can take the
        // shard's write lock.
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => return Some(entry.identity.clone()),
            Some(_) => {}
            None => return None,
        }
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        None
    }

    pub fn insert(&self, key: CacheKey, identity: Identity) {
        self.entries.insert(
            key,
            CacheEntry {
                identity,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn remove(&self, key: &CacheKey) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_within_ttl() {
        let cache = IdentityCache::new(Duration::from_secs(60));
        let key = CacheKey::Bearer("tok-1".into());
        cache.insert(key.clone(), Identity::new("u1", "u1@example.com"));

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.id(), "u1");
    }

    #[test]
    fn test_expired_behaves_like_miss() {
        let cache = IdentityCache::new(Duration::from_secs(0));
        let key = CacheKey::Bearer("tok-1".into());
        cache.insert(key.clone(), Identity::new("u1", "u1@example.com"));

        assert!(cache.get(&key).is_none());
        // Observation evicted the stale entry.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_session_and_bearer_keys_disjoint() {
        let cache = IdentityCache::new(Duration::from_secs(60));
        cache.insert(
            CacheKey::Session("same-value".into()),
            Identity::new("session-user", "s@example.com"),
        );

        assert!(cache.get(&CacheKey::Bearer("same-value".into())).is_none());
        assert!(cache.get(&CacheKey::Session("same-value".into())).is_some());
    }

    #[test]
    fn test_clear() {
        let cache = IdentityCache::new(Duration::from_secs(60));
        cache.insert(
            CacheKey::Bearer("a".into()),
            Identity::new("u1", "u1@example.com"),
        );
        cache.insert(
            CacheKey::Session("b".into()),
            Identity::new("u2", "u2@example.com"),
        );
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert!(cache.is_empty());
    }
}
