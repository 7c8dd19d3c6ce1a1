//!
//! Credential data model.
//!
//! A credential is one backend identity: a bearer token plus the project it
//! bills to. Health state (disabled flag, per-scope cooldowns, recent error
//! codes) lives next to the identity and is mutated only through
//! [`CredentialPool`].
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- modules --------------------------------------------------------------------------------- */

pub mod clock;
pub mod cooldown;
pub mod pool;
pub mod store;

/* --- uses ------------------------------------------------------------------------------------ */

use crate::error::{ProxyError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub use clock::{Clock, ManualClock, SystemClock};
pub use cooldown::parse_cooldown;
pub use pool::CredentialPool;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};

/* --- constants ------------------------------------------------------------------------------- */

/// Number of recent error codes kept per credential
pub const ERROR_HISTORY_LEN: usize = 10;

/* --- types ----------------------------------------------------------------------------------- */

/// Health of a credential as seen from one scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    CoolingDown,
    Disabled,
}

///
/// One backend identity and its health state.
#[derive(Debug, Clone)]
pub struct Credential {
    /** stable identifier, the originating file name */
    pub id: String,
    /** bearer token */
    pub access_token: String,
    /** backend project the token bills to */
    pub project_id: Option<String>,
    /** unrecognised fields from the source document */
    pub extra: Map<String, Value>,
    /** excluded from selection until re-enabled */
    pub disabled: bool,
    /** cooldown expiry per scope */
    pub cooldowns: BTreeMap<String, DateTime<Utc>>,
    /** most recent error codes, oldest first */
    pub error_history: VecDeque<u16>,
    pub last_success: Option<DateTime<Utc>>,
    /** pool-wide sequence number of the last hand-out, 0 if never used */
    pub(crate) last_used: u64,
}

///
/// Status-code pattern that disables a credential.
///
/// A credential is disabled once at least `threshold` entries of its error
/// history match `codes` (status 200 counts only with `count_silent_failures`).
#[derive(Debug, Clone)]
pub struct AutoDisableRule {
    pub codes: BTreeSet<u16>,
    pub threshold: usize,
    pub count_silent_failures: bool,
}

/// Serializable view of a credential, without the token
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub id: String,
    pub project_id: Option<String>,
    pub disabled: bool,
    pub cooldowns: BTreeMap<String, DateTime<Utc>>,
    pub error_history: Vec<u16>,
    pub last_success: Option<DateTime<Utc>>,
}

/* --- start of code -------------------------------------------------------------------------- */

impl Credential {
    ///
    /// Build a credential from its JSON document.
    ///
    /// # Arguments
    ///  * `id` - identifier, normally the file name
    ///  * `doc` - object with `access_token` (or `token`), optional `project_id`
    ///    and optional `disabled`; other fields are kept in `extra`
    ///
    /// # Returns
    ///  * `Err(ProxyError::Config)` when the document is not an object or has no token
    pub fn from_json(id: impl Into<String>, doc: Value) -> Result<Self> {
        let id = id.into();
        let Value::Object(mut fields) = doc else {
            return Err(ProxyError::Config(format!("Credential '{}' is not a JSON object", id)));
        };

        let token = take_string(&mut fields, "access_token").or_else(|| take_string(&mut fields, "token"));
        let access_token = token.filter(|t| !t.is_empty()).ok_or_else(|| {
            ProxyError::Config(format!(
                "Credential '{}' has no 'access_token' or 'token' field",
                id
            ))
        })?;
        let project_id = take_string(&mut fields, "project_id").filter(|p| !p.is_empty());
        let disabled = fields.remove("disabled").and_then(|v| v.as_bool()).unwrap_or(false);

        Ok(Self {
            id,
            access_token,
            project_id,
            extra: fields,
            disabled,
            cooldowns: BTreeMap::new(),
            error_history: VecDeque::with_capacity(ERROR_HISTORY_LEN),
            last_success: None,
            last_used: 0,
        })
    }

    /// Shorthand for tests and embedding
    pub fn new(id: impl Into<String>, token: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            access_token: token.into(),
            project_id: Some(project.into()),
            extra: Map::new(),
            disabled: false,
            cooldowns: BTreeMap::new(),
            error_history: VecDeque::with_capacity(ERROR_HISTORY_LEN),
            last_success: None,
            last_used: 0,
        }
    }

    /// Status of this credential for `scope` at `now`
    pub fn status(&self, scope: &str, now: DateTime<Utc>) -> CredentialStatus {
        if self.disabled {
            CredentialStatus::Disabled
        } else if self.cooldowns.get(scope).is_some_and(|until| *until > now) {
            CredentialStatus::CoolingDown
        } else {
            CredentialStatus::Active
        }
    }

    /// Whether the credential has everything needed to call the backend
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && self.project_id.is_some()
    }

    pub(crate) fn record_error(&mut self, status: u16) {
        if self.error_history.len() == ERROR_HISTORY_LEN {
            self.error_history.pop_front();
        }
        self.error_history.push_back(status);
    }

    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            id: self.id.clone(),
            project_id: self.project_id.clone(),
            disabled: self.disabled,
            cooldowns: self.cooldowns.clone(),
            error_history: self.error_history.iter().copied().collect(),
            last_success: self.last_success,
        }
    }
}

impl AutoDisableRule {
    pub fn from_config(retry: &crate::config::RetryConfig) -> Self {
        Self {
            codes: retry.auto_ban_codes(),
            threshold: retry.auto_ban_threshold.max(1),
            count_silent_failures: retry.count_silent_failures,
        }
    }

    /// Whether `history` has reached the disable threshold
    pub fn matches(&self, history: &VecDeque<u16>) -> bool {
        let hits = history
            .iter()
            .filter(|code| {
                self.codes.contains(code) || (self.count_silent_failures && **code == 200)
            })
            .count();
        hits > 0 && hits >= self.threshold
    }
}

impl Default for AutoDisableRule {
    fn default() -> Self {
        Self { codes: BTreeSet::new(), threshold: 1, count_silent_failures: false }
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            fields.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_summary_serializes_timestamps() {
        let mut cred = Credential::new("a.json", "ya29.x", "proj-1");
        let until = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        cred.cooldowns.insert("gemini-2.5-pro".to_string(), until);
        cred.last_success = Some(until - Duration::minutes(1));

        let value = serde_json::to_value(cred.summary()).unwrap();
        assert_eq!(value["cooldowns"]["gemini-2.5-pro"], "2023-11-14T22:13:20Z");
        assert_eq!(value["last_success"], "2023-11-14T22:12:20Z");
    }

    #[test]
    fn test_from_json_accepts_token_alias_and_keeps_extra() {
        let cred = Credential::from_json(
            "a.json",
            json!({"token": "ya29.x", "project_id": "proj-1", "email": "a@example.com"}),
        )
        .unwrap();

        assert_eq!(cred.access_token, "ya29.x");
        assert_eq!(cred.project_id.as_deref(), Some("proj-1"));
        assert_eq!(cred.extra.get("email"), Some(&json!("a@example.com")));
        assert!(cred.is_complete());
    }

    #[test]
    fn test_from_json_rejects_missing_token() {
        assert!(Credential::from_json("x.json", json!({"project_id": "p"})).is_err());
        assert!(Credential::from_json("x.json", json!(["not", "an", "object"])).is_err());
    }

    #[test]
    fn test_status_is_scoped() {
        let now = Utc::now();
        let mut cred = Credential::new("a", "t", "p");
        cred.cooldowns.insert("gemini-2.5-pro".to_string(), now + Duration::seconds(30));

        assert_eq!(cred.status("gemini-2.5-pro", now), CredentialStatus::CoolingDown);
        assert_eq!(cred.status("claude-sonnet-4-5", now), CredentialStatus::Active);
        assert_eq!(
            cred.status("gemini-2.5-pro", now + Duration::seconds(31)),
            CredentialStatus::Active
        );

        cred.disabled = true;
        assert_eq!(cred.status("claude-sonnet-4-5", now), CredentialStatus::Disabled);
    }

    #[test]
    fn test_error_history_is_bounded() {
        let mut cred = Credential::new("a", "t", "p");
        for code in 0..15u16 {
            cred.record_error(400 + code);
        }
        assert_eq!(cred.error_history.len(), ERROR_HISTORY_LEN);
        assert_eq!(cred.error_history.front(), Some(&405));
    }

    #[test]
    fn test_auto_disable_rule() {
        let rule = AutoDisableRule {
            codes: [403].into_iter().collect(),
            threshold: 2,
            count_silent_failures: false,
        };
        let mut history = VecDeque::from(vec![403, 429, 200]);
        assert!(!rule.matches(&history));
        history.push_back(403);
        assert!(rule.matches(&history));

        let silent = AutoDisableRule { count_silent_failures: true, ..AutoDisableRule::default() };
        assert!(silent.matches(&VecDeque::from(vec![200])));
        assert!(!AutoDisableRule::default().matches(&VecDeque::from(vec![200, 403])));
    }
}
