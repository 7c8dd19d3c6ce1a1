//!
//! Credential sources.
//!
//! Credentials are owned by an external store. The pool only asks a store for
//! its current set; adding or deleting credentials is done in the store itself.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use crate::credential::Credential;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/* --- constants ------------------------------------------------------------------------------- */

/// Environment variable carrying a base64-encoded JSON array of credentials
pub const CREDENTIALS_B64_ENV: &str = "POOLMUX_CREDENTIALS_B64";

/* --- types ----------------------------------------------------------------------------------- */

///
/// Source of credentials for a [`crate::credential::CredentialPool`].
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load every credential the store currently holds
    async fn load_all(&self) -> Result<Vec<Credential>>;

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// One JSON file per credential in a directory; the file name is the id
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

/// Fixed set of credentials held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Vec<Credential>,
}

/// Credentials decoded from a base64 JSON array, e.g. from [`CREDENTIALS_B64_ENV`]
#[derive(Debug, Clone)]
pub struct EncodedCredentialStore {
    encoded: String,
}

/// Union of several stores; on id clashes the earlier store wins
pub struct ChainedCredentialStore {
    stores: Vec<Arc<dyn CredentialStore>>,
}

/* --- start of code -------------------------------------------------------------------------- */

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load_all(&self) -> Result<Vec<Credential>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Credential directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(ProxyError::Config(format!(
                    "Failed to read credential directory '{}': {}",
                    self.dir.display(),
                    e
                )));
            }
        };

        let mut credentials = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ProxyError::Config(format!("Failed to list '{}': {}", self.dir.display(), e))
        })? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Some(id) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };

            // A single broken file must not take the pool down.
            let parsed = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| ProxyError::Config(format!("read failed: {}", e)))
                .and_then(|text| Ok(serde_json::from_str::<Value>(&text)?))
                .and_then(|doc| Credential::from_json(id.clone(), doc));

            match parsed {
                Ok(credential) => credentials.push(credential),
                Err(e) => tracing::warn!("Skipping credential file {}: {}", path.display(), e),
            }
        }

        credentials.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::debug!("Loaded {} credential(s) from {}", credentials.len(), self.dir.display());
        Ok(credentials)
    }

    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }
}

impl MemoryCredentialStore {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load_all(&self) -> Result<Vec<Credential>> {
        Ok(self.credentials.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory credential(s)", self.credentials.len())
    }
}

impl EncodedCredentialStore {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self { encoded: encoded.into() }
    }

    /// Store for [`CREDENTIALS_B64_ENV`], if it is set and non-empty
    pub fn from_env() -> Option<Self> {
        std::env::var(CREDENTIALS_B64_ENV).ok().filter(|v| !v.trim().is_empty()).map(Self::new)
    }
}

#[async_trait]
impl CredentialStore for EncodedCredentialStore {
    async fn load_all(&self) -> Result<Vec<Credential>> {
        let bytes = STANDARD.decode(self.encoded.trim()).map_err(|e| {
            ProxyError::Config(format!("{} is not valid base64: {}", CREDENTIALS_B64_ENV, e))
        })?;
        let docs: Vec<Value> = serde_json::from_slice(&bytes).map_err(|e| {
            ProxyError::Config(format!("{} must decode to a JSON array: {}", CREDENTIALS_B64_ENV, e))
        })?;

        let mut credentials = Vec::with_capacity(docs.len());
        for (index, mut doc) in docs.into_iter().enumerate() {
            let id = doc
                .as_object_mut()
                .and_then(|fields| fields.remove("id"))
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("env-{}", index));
            credentials.push(Credential::from_json(id, doc)?);
        }
        Ok(credentials)
    }

    fn describe(&self) -> String {
        format!("environment variable {}", CREDENTIALS_B64_ENV)
    }
}

impl ChainedCredentialStore {
    pub fn new(stores: Vec<Arc<dyn CredentialStore>>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl CredentialStore for ChainedCredentialStore {
    async fn load_all(&self) -> Result<Vec<Credential>> {
        let mut merged: Vec<Credential> = Vec::new();
        for store in &self.stores {
            for credential in store.load_all().await? {
                if merged.iter().any(|c| c.id == credential.id) {
                    tracing::warn!(
                        "Duplicate credential id {} from {}; keeping the first",
                        credential.id,
                        store.describe()
                    );
                    continue;
                }
                merged.push(credential);
            }
        }
        Ok(merged)
    }

    fn describe(&self) -> String {
        self.stores.iter().map(|s| s.describe()).collect::<Vec<_>>().join(" + ")
    }
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_store_loads_json_files_sorted() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("b.json"),
            r#"{"access_token":"tok-b","project_id":"proj-b"}"#,
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("a.json"), r#"{"token":"tok-a","project_id":"proj-a"}"#)
            .unwrap();
        std::fs::write(temp_dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(temp_dir.path().join("readme.txt"), "ignored").unwrap();

        let creds = FileCredentialStore::new(temp_dir.path()).load_all().await.unwrap();
        let ids: Vec<_> = creds.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a.json", "b.json"]);
        assert_eq!(creds[0].access_token, "tok-a");
    }

    #[tokio::test]
    async fn test_file_store_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCredentialStore::new(temp_dir.path().join("absent"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_encoded_store() {
        let json = r#"[{"id":"ci-1","access_token":"t1","project_id":"p1"},{"token":"t2"}]"#;
        let store = EncodedCredentialStore::new(STANDARD.encode(json));

        let creds = store.load_all().await.unwrap();
        assert_eq!(creds[0].id, "ci-1");
        assert_eq!(creds[1].id, "env-1");
        assert!(creds[1].project_id.is_none());
    }

    #[tokio::test]
    async fn test_encoded_store_rejects_garbage() {
        assert!(EncodedCredentialStore::new("%%%").load_all().await.is_err());
    }

    #[tokio::test]
    async fn test_chained_store_first_wins() {
        let first: Arc<dyn CredentialStore> =
            Arc::new(MemoryCredentialStore::new(vec![Credential::new("a", "first", "p")]));
        let second: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new(vec![
            Credential::new("a", "second", "p"),
            Credential::new("b", "only", "p"),
        ]));

        let creds = ChainedCredentialStore::new(vec![first, second]).load_all().await.unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].access_token, "first");
    }
}
