use crate::domain_port::{PersistentStorage, StorageError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-process `PersistentStorage` that can be switched into a failing mode
/// to simulate disabled or revoked storage.
#[derive(Debug, Default)]
pub struct FakeStorage {
    items: DashMap<String, String>,
    failing: AtomicBool,
    read_only: AtomicBool,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation fails from the start, like storage blocked by policy.
    pub fn failing() -> Self {
        let storage = Self::default();
        storage.set_failing(true);
        storage
    }

    pub fn with_items<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let storage = Self::default();
        for (key, value) in items {
            storage.items.insert(key.to_string(), value.to_string());
        }
        storage
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Reads keep working, writes and removes fail.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    /// Reads the raw value, bypassing the failure switch.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.value().clone())
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable(
                "SecurityError: storage access denied".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> Result<(), StorageError> {
        self.check()?;
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::ReadOnlyFilesystem,
                "read-only file system",
            )));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PersistentStorage for FakeStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.peek(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check_write()?;
        self.items.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check()?;
        Ok(self.items.iter().map(|e| e.key().clone()).collect())
    }
}
