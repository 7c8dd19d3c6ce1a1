//!
//! CredentialPool: selection and health bookkeeping for backend credentials.
//!
//! All state sits behind one async mutex, so `acquire` and the `report_*`
//! calls are serialized and selection never races a status change.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::config::SelectionPolicy;
use crate::credential::{
    AutoDisableRule, Clock, Credential, CredentialStatus, CredentialStore, CredentialSummary,
    SystemClock,
};
use crate::error::{ProxyError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Owns the known credentials and decides which one serves the next attempt.
pub struct CredentialPool {
    store: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    policy: SelectionPolicy,
    rule: AutoDisableRule,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    loaded: bool,
    /** keyed by id; iteration order is the round-robin order */
    credentials: BTreeMap<String, Credential>,
    /** id handed out last under round-robin */
    cursor: Option<String>,
    /** monotonically increasing hand-out counter */
    sequence: u64,
}

/// Pool-wide counts for health reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolSummary {
    pub total: usize,
    pub active: usize,
    /** cooling down for at least one scope */
    pub cooling_down: usize,
    pub disabled: usize,
}

/* --- start of code -------------------------------------------------------------------------- */

impl CredentialPool {
    ///
    /// Create a pool over `store`.
    ///
    /// The store is read lazily on the first `acquire`.
    pub fn new(store: Arc<dyn CredentialStore>, policy: SelectionPolicy, rule: AutoDisableRule) -> Self {
        Self::with_clock(store, policy, rule, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn CredentialStore>,
        policy: SelectionPolicy,
        rule: AutoDisableRule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, clock, policy, rule, state: Mutex::new(PoolState::default()) }
    }

    /// Current time as seen by the pool
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    ///
    /// Hand out one credential eligible under `scope`.
    ///
    /// # Arguments
    ///  * `scope` - partition key, normally the backend model name
    ///
    /// # Returns
    ///  * `Ok(Credential)` - a snapshot of the selected credential
    ///  * `Err(ProxyError::CredentialUnavailable)` - nothing is eligible
    pub async fn acquire(&self, scope: &str) -> Result<Credential> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            self.load_into(&mut state).await?;
        }

        let now = self.clock.now();
        let eligible: Vec<&String> = state
            .credentials
            .iter()
            .filter(|(_, c)| c.status(scope, now) == CredentialStatus::Active)
            .map(|(id, _)| id)
            .collect();

        let chosen = match self.policy {
            SelectionPolicy::RoundRobin => {
                let after_cursor = state
                    .cursor
                    .as_ref()
                    .and_then(|cursor| eligible.iter().find(|id| id.as_str() > cursor.as_str()));
                after_cursor.or_else(|| eligible.first()).map(|id| (*id).clone())
            }
            SelectionPolicy::LeastRecentlyUsed => eligible
                .iter()
                .min_by(|a, b| {
                    let (ca, cb) = (&state.credentials[a.as_str()], &state.credentials[b.as_str()]);
                    ca.last_used.cmp(&cb.last_used).then_with(|| a.cmp(b))
                })
                .map(|id| (*id).clone()),
        };

        let Some(id) = chosen else {
            let total = state.credentials.len();
            tracing::warn!("No eligible credential for scope {} ({} known)", scope, total);
            return Err(ProxyError::CredentialUnavailable(format!(
                "no eligible credential for '{}' ({} known)",
                scope, total
            )));
        };

        state.sequence += 1;
        let sequence = state.sequence;
        state.cursor = Some(id.clone());

        let credential = state
            .credentials
            .get_mut(&id)
            .ok_or_else(|| ProxyError::CredentialUnavailable(format!("credential {} vanished", id)))?;
        credential.last_used = sequence;
        credential.cooldowns.retain(|_, until| *until > now);

        tracing::debug!("Selected credential {} for scope {}", id, scope);
        Ok(credential.clone())
    }

    ///
    /// Record a successful call.
    ///
    /// Clears the error history and any cooldown for `scope`.
    pub async fn report_success(&self, credential_id: &str, scope: &str) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if let Some(credential) = state.credentials.get_mut(credential_id) {
            credential.error_history.clear();
            credential.last_success = Some(now);
            credential.cooldowns.remove(scope);
        }
    }

    ///
    /// Record a failed call.
    ///
    /// # Arguments
    ///  * `credential_id` - credential that served the call
    ///  * `status` - HTTP status to append to the history; `None` for transport failures
    ///  * `cooldown_until` - exclude the credential from `scope` until this instant
    ///  * `scope` - partition key the call was made under
    pub async fn report_error(
        &self,
        credential_id: &str,
        status: Option<u16>,
        cooldown_until: Option<DateTime<Utc>>,
        scope: &str,
    ) {
        let mut state = self.state.lock().await;
        let Some(credential) = state.credentials.get_mut(credential_id) else {
            tracing::debug!("Error reported for unknown credential {}", credential_id);
            return;
        };

        if let Some(status) = status {
            credential.record_error(status);
        }

        if let Some(until) = cooldown_until {
            tracing::info!("Credential {} cooling down for {} until {}", credential_id, scope, until);
            credential.cooldowns.insert(scope.to_string(), until);
        }

        if !credential.disabled && self.rule.matches(&credential.error_history) {
            tracing::warn!(
                "Credential {} disabled after error history {:?}",
                credential_id,
                credential.error_history
            );
            credential.disabled = true;
        }
    }

    ///
    /// Enable or disable a credential by hand.
    ///
    /// Re-enabling also clears the error history so the auto-disable rule does
    /// not fire again on the next error.
    ///
    /// # Returns
    ///  * `false` when no credential has this id
    pub async fn set_disabled(&self, credential_id: &str, disabled: bool) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            self.load_into(&mut state).await?;
        }
        let Some(credential) = state.credentials.get_mut(credential_id) else {
            return Ok(false);
        };
        credential.disabled = disabled;
        if !disabled {
            credential.error_history.clear();
        }
        tracing::info!(
            "Credential {} {} by operator",
            credential_id,
            if disabled { "disabled" } else { "enabled" }
        );
        Ok(true)
    }

    ///
    /// Re-read the store.
    ///
    /// Credentials that are still present keep their health state; new ones
    /// are added, removed ones dropped.
    pub async fn reload(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.load_into(&mut state).await?;
        Ok(state.credentials.len())
    }

    /// Snapshot of every credential, without tokens
    pub async fn snapshot(&self) -> Result<Vec<CredentialSummary>> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            self.load_into(&mut state).await?;
        }
        Ok(state.credentials.values().map(Credential::summary).collect())
    }

    /// Counts by status; cooldowns of any scope count
    pub async fn summary(&self) -> PoolSummary {
        let now = self.clock.now();
        let state = self.state.lock().await;
        let mut summary = PoolSummary { total: state.credentials.len(), ..PoolSummary::default() };
        for credential in state.credentials.values() {
            if credential.disabled {
                summary.disabled += 1;
            } else if credential.cooldowns.values().any(|until| *until > now) {
                summary.cooling_down += 1;
            } else {
                summary.active += 1;
            }
        }
        summary
    }

    /* --- private methods ----------------------------------------------------------------- */

    async fn load_into(&self, state: &mut PoolState) -> Result<()> {
        let fresh = self.store.load_all().await?;
        let mut previous = std::mem::take(&mut state.credentials);

        for mut credential in fresh {
            if let Some(old) = previous.remove(&credential.id) {
                credential.disabled = credential.disabled || old.disabled;
                credential.cooldowns = old.cooldowns;
                credential.error_history = old.error_history;
                credential.last_success = old.last_success;
                credential.last_used = old.last_used;
            }
            state.credentials.insert(credential.id.clone(), credential);
        }

        state.loaded = true;
        tracing::info!(
            "Credential pool loaded {} credential(s) from {}",
            state.credentials.len(),
            self.store.describe()
        );
        Ok(())
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{ManualClock, MemoryCredentialStore};
    use chrono::Duration;

    fn start() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z").unwrap().to_utc()
    }

    fn pool_with(ids: &[&str], policy: SelectionPolicy, rule: AutoDisableRule) -> (CredentialPool, Arc<ManualClock>) {
        let creds = ids.iter().map(|id| Credential::new(*id, format!("tok-{}", id), "proj")).collect();
        let clock = Arc::new(ManualClock::new(start()));
        let pool = CredentialPool::with_clock(
            Arc::new(MemoryCredentialStore::new(creds)),
            policy,
            rule,
            clock.clone(),
        );
        (pool, clock)
    }

    #[tokio::test]
    async fn test_round_robin_is_deterministic() {
        let (pool, _) = pool_with(&["c", "a", "b"], SelectionPolicy::RoundRobin, AutoDisableRule::default());

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(pool.acquire("m").await.unwrap().id);
        }
        assert_eq!(order, vec!["a", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_least_recently_used() {
        let (pool, _) =
            pool_with(&["a", "b", "c"], SelectionPolicy::LeastRecentlyUsed, AutoDisableRule::default());

        assert_eq!(pool.acquire("m").await.unwrap().id, "a");
        assert_eq!(pool.acquire("m").await.unwrap().id, "b");
        pool.report_error("c", Some(429), Some(start() + Duration::seconds(10)), "m").await;
        assert_eq!(pool.acquire("m").await.unwrap().id, "a");
        assert_eq!(pool.acquire("m").await.unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_cooldown_excludes_until_expiry() {
        let (pool, clock) = pool_with(&["a"], SelectionPolicy::RoundRobin, AutoDisableRule::default());
        let until = start() + Duration::seconds(30);

        pool.acquire("m").await.unwrap();
        pool.report_error("a", Some(429), Some(until), "m").await;

        assert!(matches!(pool.acquire("m").await, Err(ProxyError::CredentialUnavailable(_))));
        // Other scopes are unaffected.
        assert_eq!(pool.acquire("other").await.unwrap().id, "a");

        clock.advance(Duration::seconds(29));
        assert!(pool.acquire("m").await.is_err());

        clock.advance(Duration::seconds(2));
        assert_eq!(pool.acquire("m").await.unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_auto_disable_and_reenable() {
        let rule = AutoDisableRule {
            codes: [403].into_iter().collect(),
            threshold: 1,
            count_silent_failures: false,
        };
        let (pool, _) = pool_with(&["a", "b"], SelectionPolicy::RoundRobin, rule);

        pool.acquire("m").await.unwrap();
        pool.report_error("a", Some(403), None, "m").await;

        for _ in 0..3 {
            assert_eq!(pool.acquire("m").await.unwrap().id, "b");
        }
        assert_eq!(pool.summary().await.disabled, 1);

        assert!(pool.set_disabled("a", false).await.unwrap());
        let ids: Vec<_> = [pool.acquire("m").await.unwrap().id, pool.acquire("m").await.unwrap().id]
            .into_iter()
            .collect();
        assert!(ids.contains(&"a".to_string()));
        assert!(!pool.set_disabled("missing", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_success_clears_history_and_cooldown() {
        let (pool, _) = pool_with(&["a"], SelectionPolicy::RoundRobin, AutoDisableRule::default());
        pool.acquire("m").await.unwrap();
        pool.report_error("a", Some(500), None, "m").await;
        pool.report_error("a", None, None, "m").await;

        let before = pool.snapshot().await.unwrap();
        assert_eq!(before[0].error_history, vec![500]);

        pool.report_success("a", "m").await;
        let after = pool.snapshot().await.unwrap();
        assert!(after[0].error_history.is_empty());
        assert_eq!(after[0].last_success, Some(start()));
    }

    #[tokio::test]
    async fn test_empty_pool_is_unavailable() {
        let (pool, _) = pool_with(&[], SelectionPolicy::RoundRobin, AutoDisableRule::default());
        assert!(matches!(pool.acquire("m").await, Err(ProxyError::CredentialUnavailable(_))));
    }

    #[tokio::test]
    async fn test_reload_keeps_health_state() {
        let (pool, _) = pool_with(&["a", "b"], SelectionPolicy::RoundRobin, AutoDisableRule::default());
        pool.acquire("m").await.unwrap();
        pool.set_disabled("a", true).await.unwrap();

        assert_eq!(pool.reload().await.unwrap(), 2);
        let snapshot = pool.snapshot().await.unwrap();
        assert!(snapshot.iter().find(|c| c.id == "a").unwrap().disabled);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_respects_disabled() {
        let rule = AutoDisableRule {
            codes: [403].into_iter().collect(),
            threshold: 1,
            count_silent_failures: false,
        };
        let (pool, _) = pool_with(&["a", "b", "c"], SelectionPolicy::RoundRobin, rule);
        let pool = Arc::new(pool);
        pool.acquire("m").await.unwrap();
        pool.report_error("b", Some(403), None, "m").await;

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire("m").await.unwrap().id })
            })
            .collect();
        for handle in handles {
            assert_ne!(handle.await.unwrap(), "b");
        }
    }
}
