//! Process-wide user registry with explicit reference counting.
//!
//! The registry owns the list of live users behind one mutex; each user
//! carries its own reference-count mutex. `find` scans and holds under the
//! registry lock, and `hold` re-validates membership before incrementing,
//! so a racing `release` can never free a user another thread just found.
//! The registry is an injected value, not a process global, which keeps
//! tests isolated.

use std::sync::{Arc, Mutex};

use crate::platform::StorageAdapter;
use crate::IdentityResult;

use super::User;

/// Registry of live users.
#[derive(Default)]
pub struct UserRegistry {
    users: Mutex<Vec<Arc<User>>>,
}

impl UserRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty user with default options and reference count 1,
    /// inserted at the head of the registry.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn create(&self) -> Arc<User> {
        let user = Arc::new(User::empty());
        self.users.lock().unwrap().insert(0, Arc::clone(&user));
        user
    }

    /// Creates a user from a serialized container.
    ///
    /// # Errors
    ///
    /// Propagates container parse failures; no user is registered then.
    pub fn create_from_bytes(&self, bytes: &[u8]) -> IdentityResult<Arc<User>> {
        let user = self.create();
        if let Err(err) = user.load(bytes) {
            self.release(&user);
            return Err(err);
        }
        Ok(user)
    }

    /// Creates a user from a container fetched through the adapter.
    ///
    /// # Errors
    ///
    /// Propagates adapter and parse failures; no user is registered then.
    pub fn create_from_uri(
        &self,
        adapter: &dyn StorageAdapter,
        uri: &str,
    ) -> IdentityResult<Arc<User>> {
        let bytes = adapter.load(uri)?;
        self.create_from_bytes(&bytes)
    }

    /// Returns the number of registered users.
    ///
    /// # Panics
    ///
    /// Panics if the registry lock is poisoned.
    #[must_use]
    pub fn count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    /// Finds a live user by unique id, taking a reference on a match.
    ///
    /// Release the reference with [`release`](Self::release) when done.
    ///
    /// # Panics
    ///
    /// Panics if a registry or reference-count lock is poisoned.
    #[must_use]
    pub fn find(&self, unique_id: &str) -> Option<Arc<User>> {
        let users = self.users.lock().unwrap();
        for user in users.iter() {
            if user.unique_id_matches(Some(unique_id)) {
                *user.ref_count.lock().unwrap() += 1;
                return Some(Arc::clone(user));
            }
        }
        None
    }

    /// Takes an additional reference on a user.
    ///
    /// Membership is re-validated under the registry lock; holding a user
    /// that has already been released returns `false` and does nothing.
    ///
    /// # Panics
    ///
    /// Panics if a registry or reference-count lock is poisoned.
    pub fn hold(&self, user: &Arc<User>) -> bool {
        let users = self.users.lock().unwrap();
        let registered = users.iter().any(|u| Arc::ptr_eq(u, user));
        if registered {
            *user.ref_count.lock().unwrap() += 1;
        }
        registered
    }

    /// Releases one reference on a user.
    ///
    /// At zero the user is unlinked from the registry and its key region
    /// destroyed; no further method on it is defined. Releasing a user that
    /// is not registered destroys it immediately. Returns `true` when the
    /// user was destroyed by this call.
    ///
    /// # Panics
    ///
    /// Panics if a registry or reference-count lock is poisoned.
    pub fn release(&self, user: &Arc<User>) -> bool {
        let mut users = self.users.lock().unwrap();
        let Some(position) = users.iter().position(|u| Arc::ptr_eq(u, user)) else {
            user.destroy();
            return true;
        };
        let mut count = user.ref_count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count > 0 {
            return false;
        }
        drop(count);
        users.remove(position);
        drop(users);
        user.destroy();
        true
    }
}

impl std::fmt::Debug for UserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRegistry")
            .field("count", &self.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_registers_at_head() {
        let registry = UserRegistry::new();
        assert_eq!(registry.count(), 0);
        let first = registry.create();
        let second = registry.create();
        assert_eq!(registry.count(), 2);
        assert!(Arc::ptr_eq(&registry.users.lock().unwrap()[0], &second));

        registry.release(&first);
        registry.release(&second);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_hold_then_double_release() {
        let registry = UserRegistry::new();
        let user = registry.create();
        assert!(registry.hold(&user));

        assert!(!registry.release(&user));
        assert_eq!(registry.count(), 1);
        assert!(registry.release(&user));
        assert_eq!(registry.count(), 0);

        // A further hold sees an unregistered user.
        assert!(!registry.hold(&user));
    }

    #[test]
    fn test_release_unregistered_destroys_immediately() {
        let registry = UserRegistry::new();
        let user = registry.create();
        assert!(registry.release(&user));
        // A second release on the same handle is the unregistered path.
        assert!(registry.release(&user));
    }

    #[test]
    fn test_find_requires_matching_unique_id() {
        let registry = UserRegistry::new();
        let user = registry.create();
        // An empty user carries no unique id, so no id can match it.
        assert!(registry
            .find("0000000000000000000000000000000000000000000")
            .is_none());
        registry.release(&user);
    }
}
