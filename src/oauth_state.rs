// OAuth state registry
//
// Out-of-scope login flows (spec.md §1) still need somewhere to stash the
// CSRF-style `state` parameter between redirect and callback; this is the
// narrow interface this crate exposes for that collaborator. In-memory,
// single-use, fixed TTL.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

const STATE_TTL_MINUTES: i64 = 10;

pub struct OAuthStateRegistry {
    states: DashMap<String, DateTime<Utc>>,
}

impl OAuthStateRegistry {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Mints a fresh opaque state token and records its creation time.
    pub fn issue(&self) -> String {
        let state = Uuid::new_v4().to_string();
        self.states.insert(state.clone(), Utc::now());
        state
    }

    /// Consumes `state` if it exists and has not expired. Always removes the
    /// entry, so a state can be redeemed at most once regardless of outcome.
    pub fn consume(&self, state: &str) -> bool {
        let Some((_, created_at)) = self.states.remove(state) else {
            return false;
        };
        Utc::now() - created_at <= Duration::minutes(STATE_TTL_MINUTES)
    }

    /// Drops entries past their TTL. Intended to be called periodically by
    /// the same background task that runs health checks, so the registry
    /// doesn't grow unbounded from abandoned flows.
    pub fn sweep_expired(&self) {
        let cutoff = Utc::now() - Duration::minutes(STATE_TTL_MINUTES);
        self.states.retain(|_, created_at| *created_at > cutoff);
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for OAuthStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_state_is_consumable_once() {
        let registry = OAuthStateRegistry::new();
        let state = registry.issue();
        assert!(registry.consume(&state));
        assert!(!registry.consume(&state), "second consume must fail");
    }

    #[test]
    fn unknown_state_is_rejected() {
        let registry = OAuthStateRegistry::new();
        assert!(!registry.consume("never-issued"));
    }

    #[test]
    fn expired_state_is_rejected() {
        let registry = OAuthStateRegistry::new();
        let state = "manual-state".to_string();
        registry
            .states
            .insert(state.clone(), Utc::now() - Duration::minutes(STATE_TTL_MINUTES + 1));
        assert!(!registry.consume(&state));
    }

    #[test]
    fn sweep_expired_removes_only_stale_entries() {
        let registry = OAuthStateRegistry::new();
        registry
            .states
            .insert("stale".to_string(), Utc::now() - Duration::minutes(STATE_TTL_MINUTES + 1));
        let fresh = registry.issue();
        registry.sweep_expired();
        assert_eq!(registry.len(), 1);
        assert!(registry.consume(&fresh));
    }
}
