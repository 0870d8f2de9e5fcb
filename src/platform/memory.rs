//! In-memory implementations of the platform traits for testing.
//!
//! These implementations are NOT secure for production use. They exist so
//! the engine's workflows can be exercised without a host application.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::user::Action;
use crate::{IdentityError, IdentityResult};

use super::{CredentialBroker, CredentialKind, StorageAdapter};

/// In-memory storage adapter backed by a `HashMap`.
///
/// Thread-safe; each URI maps to one blob.
#[derive(Default)]
pub struct MemoryStorageAdapter {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorageAdapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all stored blobs.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock is poisoned.
    pub fn clear(&self) {
        self.blobs.write().unwrap().clear();
    }
}

impl StorageAdapter for MemoryStorageAdapter {
    fn load(&self, uri: &str) -> IdentityResult<Vec<u8>> {
        self.blobs
            .read()
            .map_err(|_| IdentityError::adapter("adapter lock poisoned"))?
            .get(uri)
            .cloned()
            .ok_or_else(|| IdentityError::NotFound {
                uri: uri.to_string(),
            })
    }

    fn save(&self, uri: &str, bytes: &[u8]) -> IdentityResult<()> {
        self.blobs
            .write()
            .map_err(|_| IdentityError::adapter("adapter lock poisoned"))?
            .insert(uri.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// In-memory credential broker with scripted responses.
///
/// A real host shows UI and calls [`Action::provide_credential`] later;
/// this double answers immediately from a table of preset credentials,
/// recording every request so tests can assert on the flow.
#[derive(Default)]
pub struct MemoryCredentialBroker {
    responses: Mutex<HashMap<CredentialKind, Vec<u8>>>,
    requests: Mutex<Vec<CredentialKind>>,
}

impl MemoryCredentialBroker {
    /// Creates a broker with no scripted credentials.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a credential to be supplied on request.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock is poisoned.
    #[must_use]
    pub fn with_credential(self, kind: CredentialKind, bytes: &[u8]) -> Self {
        self.responses.lock().unwrap().insert(kind, bytes.to_vec());
        self
    }

    /// Scripts a credential on an existing broker.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock is poisoned.
    pub fn set_credential(&self, kind: CredentialKind, bytes: &[u8]) {
        self.responses.lock().unwrap().insert(kind, bytes.to_vec());
    }

    /// Removes a scripted credential, so later requests go unanswered.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock is poisoned.
    pub fn forget_credential(&self, kind: CredentialKind) {
        self.responses.lock().unwrap().remove(&kind);
    }

    /// Returns every request observed so far.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock is poisoned.
    #[must_use]
    pub fn requests(&self) -> Vec<CredentialKind> {
        self.requests.lock().unwrap().clone()
    }
}

impl CredentialBroker for MemoryCredentialBroker {
    fn request_authentication(&self, action: &Action, kind: CredentialKind) {
        self.requests.lock().unwrap().push(kind);
        if let Some(bytes) = self.responses.lock().unwrap().get(&kind) {
            action.provide_credential(kind, bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_adapter_round_trip() {
        let adapter = MemoryStorageAdapter::new();
        assert!(adapter.is_empty());
        assert!(matches!(
            adapter.load("file://id.sqrl"),
            Err(IdentityError::NotFound { .. })
        ));

        adapter.save("file://id.sqrl", b"sqrldata").unwrap();
        assert_eq!(adapter.load("file://id.sqrl").unwrap(), b"sqrldata");
        assert_eq!(adapter.len(), 1);

        adapter.save("file://id.sqrl", b"SQRLDATA").unwrap();
        assert_eq!(adapter.load("file://id.sqrl").unwrap(), b"SQRLDATA");

        adapter.clear();
        assert!(adapter.is_empty());
    }
}
