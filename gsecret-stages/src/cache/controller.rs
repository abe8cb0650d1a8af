use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use gsecret_secret::{Secret, TokenID, UpdatedSecret};

/// One cached secret plus its access bookkeeping
/// (`cached_at, last_accessed, access_count`).
#[derive(Clone)]
struct CacheEntry {
    secret: Secret,
    cached_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    access_count: u64,
}

impl CacheEntry {
    fn new(secret: Secret) -> Self {
        let now = Utc::now();
        Self {
            secret,
            cached_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    fn is_fresh(&self, ttl_seconds: i64) -> bool {
        if ttl_seconds <= 0 {
            return true;
        }
        (Utc::now() - self.cached_at).num_seconds() <= ttl_seconds
    }

    fn access(&mut self) -> Secret {
        self.access_count += 1;
        self.last_accessed = Utc::now();
        self.secret.clone()
    }
}

/// Dual-indexed cache for one token: `id -> entry` and `key -> entry`, kept
/// bi-consistent under a single mutex. All methods
/// are synchronous; callers must not hold the guard across an `.await`.
pub struct TokenCache {
    state: Mutex<TokenCacheState>,
}

#[derive(Default)]
struct TokenCacheState {
    id_cache: HashMap<String, CacheEntry>,
    key_cache: HashMap<String, CacheEntry>,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self {
            state: Mutex::new(TokenCacheState::default()),
        }
    }
}

impl TokenCache {
    /// Read-by-id: returns a fresh hit, or evicts (both mappings) and
    /// returns `None` on a stale entry or outright miss.
    pub fn get_by_id(&self, key_id: &str, ttl_seconds: i64) -> Option<Secret> {
        let mut state = self.state.lock().expect("token cache lock poisoned");
        match state.id_cache.get(key_id).map(|e| e.is_fresh(ttl_seconds)) {
            Some(true) => {
                let secret = state.id_cache.get_mut(key_id).unwrap().access();
                Some(secret)
            }
            Some(false) => {
                Self::evict_id_locked(&mut state, key_id);
                None
            }
            None => None,
        }
    }

    pub fn get_by_key(&self, key: &str, ttl_seconds: i64) -> Option<Secret> {
        let mut state = self.state.lock().expect("token cache lock poisoned");
        match state.key_cache.get(key).map(|e| e.is_fresh(ttl_seconds)) {
            Some(true) => {
                let secret = state.key_cache.get_mut(key).unwrap().access();
                Some(secret)
            }
            Some(false) => {
                Self::evict_key_locked(&mut state, key);
                None
            }
            None => None,
        }
    }

    /// Upsert a secret into both mappings.
    pub fn upsert(&self, secret: &Secret) {
        let mut state = self.state.lock().expect("token cache lock poisoned");
        Self::upsert_locked(&mut state, secret);
    }

    fn upsert_locked(state: &mut TokenCacheState, secret: &Secret) {
        state
            .id_cache
            .entry(secret.key_id.clone())
            .and_modify(|e| e.secret = secret.clone())
            .or_insert_with(|| CacheEntry::new(secret.clone()));
        state
            .key_cache
            .entry(secret.key.clone())
            .and_modify(|e| e.secret = secret.clone())
            .or_insert_with(|| CacheEntry::new(secret.clone()));
    }

    pub fn invalidate_by_id(&self, key_id: &str) {
        let mut state = self.state.lock().expect("token cache lock poisoned");
        Self::evict_id_locked(&mut state, key_id);
    }

    pub fn invalidate_by_key(&self, key: &str) {
        let mut state = self.state.lock().expect("token cache lock poisoned");
        Self::evict_key_locked(&mut state, key);
    }

    fn evict_id_locked(state: &mut TokenCacheState, key_id: &str) {
        if let Some(entry) = state.id_cache.remove(key_id) {
            state.key_cache.remove(&entry.secret.key);
        }
    }

    fn evict_key_locked(state: &mut TokenCacheState, key: &str) {
        if let Some(entry) = state.key_cache.remove(key) {
            state.id_cache.remove(&entry.secret.key_id);
        }
    }

    /// Reconcile the cache against a freshly-delivered update batch: upsert
    /// every entry, then evict anything not present in the batch (spec
    /// §4.3 "Update path").
    pub fn reconcile(&self, secrets: &[UpdatedSecret]) {
        let mut state = self.state.lock().expect("token cache lock poisoned");
        let mut incoming_ids = HashSet::new();
        let mut incoming_keys = HashSet::new();
        for updated in secrets {
            incoming_ids.insert(updated.secret.key_id.clone());
            incoming_keys.insert(updated.secret.key.clone());
            Self::upsert_locked(&mut state, &updated.secret);
        }
        let stale_ids: Vec<String> = state
            .id_cache
            .keys()
            .filter(|id| !incoming_ids.contains(*id))
            .cloned()
            .collect();
        let stale_keys: Vec<String> = state
            .key_cache
            .keys()
            .filter(|key| !incoming_keys.contains(*key))
            .cloned()
            .collect();
        for id in stale_ids {
            Self::evict_id_locked(&mut state, &id);
        }
        for key in stale_keys {
            Self::evict_key_locked(&mut state, &key);
        }
    }

    #[cfg(test)]
    pub fn ids(&self) -> HashSet<String> {
        self.state
            .lock()
            .expect("token cache lock poisoned")
            .id_cache
            .keys()
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub fn keys(&self) -> HashSet<String> {
        self.state
            .lock()
            .expect("token cache lock poisoned")
            .key_cache
            .keys()
            .cloned()
            .collect()
    }
}

/// Process-wide map of `TokenID -> TokenCache`, lazily populated on first
/// access for a given token.
#[derive(Default)]
pub struct CacheController {
    token_caches: Mutex<HashMap<String, std::sync::Arc<TokenCache>>>,
}

impl CacheController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_token_cache(&self, token_id: &TokenID) -> std::sync::Arc<TokenCache> {
        let mut caches = self.token_caches.lock().expect("cache controller lock poisoned");
        caches
            .entry(token_id.as_str().to_string())
            .or_insert_with(|| std::sync::Arc::new(TokenCache::default()))
            .clone()
    }
}
