// Auth cache (C6): process-wide map from credential fingerprint to AuthManager

use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;

use super::manager::AuthManager;
use super::types::Credentials;

/// Keyed by `token_hash` (the store's deterministic digest of the refresh
/// token), so the same Kiro credential always resolves to the same manager
/// and its single-flight refresh gate. Entries are never evicted on their
/// own; the owning token row being deleted or marked invalid is the only
/// thing that should drop one (callers do so explicitly via [`AuthCache::evict`]).
pub struct AuthCache {
    managers: DashMap<String, Arc<AuthManager>>,
    client: Client,
}

impl AuthCache {
    pub fn new(client: Client) -> Self {
        Self {
            managers: DashMap::new(),
            client,
        }
    }

    /// Concurrency-safe: if a manager already exists for this `token_hash`,
    /// returns it; otherwise constructs and inserts one.
    pub fn get_or_create(&self, token_hash: &str, credentials: Credentials) -> Arc<AuthManager> {
        if let Some(existing) = self.managers.get(token_hash) {
            return Arc::clone(&existing);
        }

        let manager = Arc::new(AuthManager::new(credentials, self.client.clone()));
        self.managers
            .entry(token_hash.to_string())
            .or_insert(manager)
            .clone()
    }

    pub fn evict(&self, token_hash: &str) {
        self.managers.remove(token_hash);
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            refresh_token: "rt".to_string(),
            region: "us-east-1".to_string(),
            profile_arn: None,
            client_id: None,
            client_secret: None,
        }
    }

    #[test]
    fn get_or_create_is_idempotent_per_hash() {
        let cache = AuthCache::new(Client::new());
        let a = cache.get_or_create("hash-1", creds());
        let b = cache.get_or_create("hash-1", creds());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_hashes_get_distinct_managers() {
        let cache = AuthCache::new(Client::new());
        let a = cache.get_or_create("hash-1", creds());
        let b = cache.get_or_create("hash-2", creds());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn evict_removes_the_manager() {
        let cache = AuthCache::new(Client::new());
        cache.get_or_create("hash-1", creds());
        cache.evict("hash-1");
        assert!(cache.is_empty());
    }
}
