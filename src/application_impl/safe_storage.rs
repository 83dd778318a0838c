use crate::domain_model::{StorageInfo, StorageKind};
use crate::domain_port::PersistentStorage;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

const PROBE_KEY: &str = "__topcat_storage_probe__";
const PROVIDER_KEY_MARKER: &str = "sb-";
const AUTH_KEY_MARKER: &str = "auth";

/// Outcome of a storage operation: served by the persistent backend, or by
/// the in-memory fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored<T> {
    Persistent(T),
    Degraded(T),
}

impl<T> Stored<T> {
    pub fn into_inner(self) -> T {
        match self {
            Stored::Persistent(v) | Stored::Degraded(v) => v,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Stored::Degraded(_))
    }
}

/// Key-value store that keeps working when persistent storage does not.
///
/// Availability is probed once at construction. If the probe fails every
/// operation goes to memory for the lifetime of the adapter. If the backend
/// fails later, that single operation is served from memory instead.
///
/// `memory` shadows the backend: `Some` is a value that could not be
/// written, `None` a removal that could not be applied.
pub struct SafeStorage {
    backend: Option<Arc<dyn PersistentStorage>>,
    available: bool,
    memory: DashMap<String, Option<String>>,
}

impl SafeStorage {
    pub async fn probe(backend: Arc<dyn PersistentStorage>) -> Self {
        let available = match Self::probe_backend(backend.as_ref()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "persistent storage unavailable, falling back to memory");
                false
            }
        };

        SafeStorage {
            backend: available.then_some(backend),
            available,
            memory: DashMap::new(),
        }
    }

    pub fn memory_only() -> Self {
        SafeStorage {
            backend: None,
            available: false,
            memory: DashMap::new(),
        }
    }

    async fn probe_backend(
        backend: &dyn PersistentStorage,
    ) -> Result<(), crate::domain_port::StorageError> {
        backend.set_item(PROBE_KEY, PROBE_KEY).await?;
        backend.remove_item(PROBE_KEY).await?;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// `kind` is `Memory` while any entry is held back from the backend.
    pub fn info(&self) -> StorageInfo {
        let kind = if self.available && self.memory.is_empty() {
            StorageKind::Persistent
        } else {
            StorageKind::Memory
        };
        StorageInfo {
            kind,
            available: self.available,
        }
    }

    fn shadowed(&self, key: &str) -> Option<Option<String>> {
        self.memory.get(key).map(|v| v.value().clone())
    }

    pub async fn get_item(&self, key: &str) -> Stored<Option<String>> {
        let Some(backend) = &self.backend else {
            return Stored::Degraded(self.shadowed(key).flatten());
        };

        // Anything parked in memory after a failed write or remove is newer
        // than the backend's copy.
        if let Some(value) = self.shadowed(key) {
            return Stored::Degraded(value);
        }

        match backend.get_item(key).await {
            Ok(value) => Stored::Persistent(value),
            Err(e) => {
                warn!(key, error = %e, "storage read failed, using memory");
                Stored::Degraded(None)
            }
        }
    }

    pub async fn set_item(&self, key: &str, value: &str) -> Stored<()> {
        let Some(backend) = &self.backend else {
            self.memory.insert(key.to_string(), Some(value.to_string()));
            return Stored::Degraded(());
        };

        match backend.set_item(key, value).await {
            Ok(()) => {
                self.memory.remove(key);
                Stored::Persistent(())
            }
            Err(e) => {
                warn!(key, error = %e, "storage write failed, keeping value in memory");
                self.memory.insert(key.to_string(), Some(value.to_string()));
                Stored::Degraded(())
            }
        }
    }

    pub async fn remove_item(&self, key: &str) -> Stored<()> {
        let Some(backend) = &self.backend else {
            self.memory.remove(key);
            return Stored::Degraded(());
        };

        match backend.remove_item(key).await {
            Ok(()) => {
                self.memory.remove(key);
                Stored::Persistent(())
            }
            Err(e) => {
                warn!(key, error = %e, "storage remove failed, hiding the stale value");
                self.memory.insert(key.to_string(), None);
                Stored::Degraded(())
            }
        }
    }

    pub async fn keys(&self) -> Stored<Vec<String>> {
        let mut keys = BTreeSet::new();
        let mut removed = BTreeSet::new();
        for entry in self.memory.iter() {
            match entry.value() {
                Some(_) => keys.insert(entry.key().clone()),
                None => removed.insert(entry.key().clone()),
            };
        }
        let Some(backend) = &self.backend else {
            return Stored::Degraded(keys.into_iter().collect());
        };

        match backend.keys().await {
            Ok(persisted) => {
                keys.extend(persisted.into_iter().filter(|k| !removed.contains(k)));
                let keys = keys.into_iter().collect();
                if self.memory.is_empty() {
                    Stored::Persistent(keys)
                } else {
                    Stored::Degraded(keys)
                }
            }
            Err(e) => {
                warn!(error = %e, "storage key listing failed");
                Stored::Degraded(keys.into_iter().collect())
            }
        }
    }

    /// Removes auth entries that are syntactically unusable and returns their
    /// keys. Well-formed JSON is kept whatever it contains.
    pub async fn cleanup_corrupted(&self) -> Vec<String> {
        let mut removed = Vec::new();
        for key in self.keys().await.into_inner() {
            if !is_auth_key(&key) {
                continue;
            }
            let Some(value) = self.get_item(&key).await.into_inner() else {
                continue;
            };
            if is_corrupted(&value) {
                debug!(key, "removing corrupted auth entry");
                self.remove_item(&key).await;
                removed.push(key);
            }
        }
        removed
    }
}

fn is_auth_key(key: &str) -> bool {
    key.contains(PROVIDER_KEY_MARKER) && key.contains(AUTH_KEY_MARKER)
}

fn is_corrupted(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || value == "null"
        || value == "undefined"
        || serde_json::from_str::<serde_json::Value>(value).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra_fake::FakeStorage;
    use std::collections::HashMap;

    #[tokio::test]
    async fn probe_detects_available_storage() {
        let storage = SafeStorage::probe(Arc::new(FakeStorage::new())).await;
        assert!(storage.is_available());
        assert_eq!(storage.info().kind, StorageKind::Persistent);
    }

    #[tokio::test]
    async fn failing_storage_behaves_like_a_memory_map() {
        let backend = Arc::new(FakeStorage::failing());
        let storage = SafeStorage::probe(backend).await;
        assert!(!storage.is_available());
        assert_eq!(
            storage.info(),
            StorageInfo {
                kind: StorageKind::Memory,
                available: false
            }
        );

        let mut model: HashMap<&str, &str> = HashMap::new();
        let ops: &[(&str, &str, Option<&str>)] = &[
            ("set", "a", Some("1")),
            ("set", "b", Some("2")),
            ("get", "a", None),
            ("set", "a", Some("3")),
            ("remove", "b", None),
            ("get", "b", None),
            ("remove", "missing", None),
            ("get", "a", None),
            ("get", "missing", None),
        ];
        for (op, key, value) in ops {
            match (*op, value) {
                ("set", Some(v)) => {
                    assert!(storage.set_item(key, v).await.is_degraded());
                    model.insert(key, v);
                }
                ("remove", _) => {
                    storage.remove_item(key).await;
                    model.remove(key);
                }
                _ => {
                    let got = storage.get_item(key).await.into_inner();
                    assert_eq!(got.as_deref(), model.get(key).copied(), "get {key}");
                }
            }
        }
    }

    #[tokio::test]
    async fn late_failure_degrades_instead_of_failing() {
        let backend = Arc::new(FakeStorage::new());
        let storage = SafeStorage::probe(backend.clone()).await;
        assert!(storage.is_available());

        assert_eq!(storage.set_item("k", "v1").await, Stored::Persistent(()));
        backend.set_failing(true);

        assert_eq!(storage.set_item("k", "v2").await, Stored::Degraded(()));
        assert_eq!(storage.info().kind, StorageKind::Memory);
        assert!(storage.is_available());
        assert_eq!(
            storage.get_item("k").await,
            Stored::Degraded(Some("v2".to_string()))
        );
        assert_eq!(storage.get_item("nope").await, Stored::Degraded(None));

        backend.set_failing(false);
        assert_eq!(
            storage.get_item("k").await,
            Stored::Degraded(Some("v2".to_string()))
        );
        assert_eq!(storage.set_item("k", "v3").await, Stored::Persistent(()));
        assert_eq!(storage.info().kind, StorageKind::Persistent);
        assert_eq!(
            storage.get_item("k").await,
            Stored::Persistent(Some("v3".to_string()))
        );
        storage.remove_item("k").await;
        assert_eq!(storage.get_item("k").await, Stored::Persistent(None));
    }

    #[tokio::test]
    async fn failed_remove_on_read_only_backend_stays_removed() {
        let backend = Arc::new(FakeStorage::new());
        let storage = SafeStorage::probe(backend.clone()).await;
        storage.set_item("k", "v1").await;
        storage.set_item("other", "x").await;
        backend.set_read_only(true);

        assert_eq!(storage.set_item("k", "v2").await, Stored::Degraded(()));
        assert_eq!(storage.remove_item("k").await, Stored::Degraded(()));
        assert_eq!(storage.get_item("k").await, Stored::Degraded(None));
        assert_eq!(backend.peek("k").as_deref(), Some("v1"));
        assert_eq!(storage.keys().await, Stored::Degraded(vec!["other".to_string()]));
        assert_eq!(storage.info().kind, StorageKind::Memory);

        // Once writes work again the removal reaches the backend.
        backend.set_read_only(false);
        assert_eq!(storage.remove_item("k").await, Stored::Persistent(()));
        assert_eq!(backend.peek("k"), None);
        assert_eq!(storage.get_item("k").await, Stored::Persistent(None));
        assert_eq!(storage.info().kind, StorageKind::Persistent);
    }

    #[tokio::test]
    async fn cleanup_removes_only_syntactically_corrupt_auth_entries() {
        let backend = Arc::new(FakeStorage::with_items([
            ("sb-auth-a", ""),
            ("sb-auth-b", "not json"),
            ("sb-auth-c", "{\"x\":1}"),
        ]));
        let storage = SafeStorage::probe(backend.clone()).await;

        let mut removed = storage.cleanup_corrupted().await;
        removed.sort();
        assert_eq!(removed, vec!["sb-auth-a", "sb-auth-b"]);

        let mut keys = storage.keys().await.into_inner();
        keys.sort();
        assert_eq!(keys, vec!["sb-auth-c"]);
    }

    #[tokio::test]
    async fn cleanup_ignores_unrelated_keys_and_literal_nulls_are_corrupt() {
        let backend = Arc::new(FakeStorage::with_items([
            ("theme", "not json"),
            ("sb-proj-auth-token", "null"),
            ("sb-proj-auth-token-code-verifier", "undefined"),
            ("sb-proj-auth-token-old", "{\"access_token\":\"\"}"),
        ]));
        let storage = SafeStorage::probe(backend.clone()).await;

        let mut removed = storage.cleanup_corrupted().await;
        removed.sort();
        assert_eq!(
            removed,
            vec!["sb-proj-auth-token", "sb-proj-auth-token-code-verifier"]
        );
        assert_eq!(backend.peek("theme").as_deref(), Some("not json"));
        assert!(backend.peek("sb-proj-auth-token-old").is_some());
    }

    #[tokio::test]
    async fn memory_only_storage_works_without_backend() {
        let storage = SafeStorage::memory_only();
        storage.set_item("sb-auth-x", "").await;
        assert_eq!(storage.cleanup_corrupted().await, vec!["sb-auth-x"]);
        assert_eq!(storage.get_item("sb-auth-x").await.into_inner(), None);
    }
}
