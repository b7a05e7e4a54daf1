//! Process-wide agent state.
//!
//! A single [`AgentState`] instance holds the mutable pieces shared
//! between the policy tick and the sync manager. It is loaded from the
//! store at agent start and persisted on every mutation, so the agent can
//! evaluate policy while offline and resume cleanly after a restart.

use crate::policy::{PolicyConfig, UsageTimer};
use crate::store::{keys, Store, StoreError};
use chrono::NaiveDate;
use std::sync::{Arc, Mutex};

/// Shared mutable agent state. All access goes through the mutex.
pub type SharedState = Arc<Mutex<AgentState>>;

/// Lock the shared state, recovering from a poisoned mutex. The agent
/// must keep running after a panicked tick; consistency comes from
/// persisting after every mutation, not from the poison flag.
pub fn lock_state(state: &SharedState) -> std::sync::MutexGuard<'_, AgentState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The agent's durable runtime state.
#[derive(Debug, Clone)]
pub struct AgentState {
    pub policy: PolicyConfig,
    pub usage: UsageTimer,
    pub stealth: bool,
}

impl AgentState {
    /// Load persisted state, falling back to defaults for anything absent.
    pub fn load(store: &Store, today: NaiveDate) -> Result<Self, StoreError> {
        let policy = store.get(keys::POLICY_CONFIG)?.unwrap_or_default();
        let usage = store
            .get(keys::USAGE_TIMER)?
            .unwrap_or_else(|| UsageTimer::new(today));
        let stealth = store.get(keys::STEALTH_ENABLED)?.unwrap_or(false);
        Ok(Self {
            policy,
            usage,
            stealth,
        })
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    /// Persist the policy config after replacing it.
    pub fn persist_policy(&self, store: &Store) -> Result<(), StoreError> {
        store.put(keys::POLICY_CONFIG, &self.policy)
    }

    /// Persist the usage timer after an evaluation tick mutated it.
    pub fn persist_usage(&self, store: &Store) -> Result<(), StoreError> {
        store.put(keys::USAGE_TIMER, &self.usage)
    }

    pub fn persist_stealth(&self, store: &Store) -> Result<(), StoreError> {
        store.put(keys::STEALTH_ENABLED, &self.stealth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_load_defaults_when_empty() {
        let store = Store::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        let state = AgentState::load(&store, today).unwrap();
        assert!(state.policy.blocked_apps.is_empty());
        assert_eq!(state.usage.date, today);
        assert!(!state.stealth);
    }

    #[test]
    fn test_persisted_state_survives_reload() {
        let store = Store::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        let mut state = AgentState::load(&store, today).unwrap();

        state.policy.blocked_apps.insert("com.example.game".into());
        state.usage.per_app.insert("com.example.game".into(), 1234);
        state.stealth = true;
        state.persist_policy(&store).unwrap();
        state.persist_usage(&store).unwrap();
        state.persist_stealth(&store).unwrap();

        let reloaded = AgentState::load(&store, today).unwrap();
        assert!(reloaded.policy.blocked_apps.contains("com.example.game"));
        assert_eq!(reloaded.usage.accumulated_ms("com.example.game"), 1234);
        assert!(reloaded.stealth);
    }

    #[test]
    fn test_lock_recovers_from_poisoned_mutex() {
        let store = Store::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        let state = AgentState::load(&store, today).unwrap().into_shared();

        let poisoner = state.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("tick panicked while holding the lock");
        })
        .join();
        assert!(state.is_poisoned());

        let guard = lock_state(&state);
        assert!(!guard.stealth);
    }
}
