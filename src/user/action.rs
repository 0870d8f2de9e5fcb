//! An in-flight operation binding a user to the embedder's callbacks.

use std::sync::{Arc, Mutex};

use zeroize::Zeroizing;

use crate::crypt::ProgressScaler;
use crate::platform::{CredentialBroker, CredentialKind};

use super::User;

/// One credential mailbox slot per [`CredentialKind`].
type Mailbox = [Option<Zeroizing<Vec<u8>>>; CredentialKind::COUNT];

/// Context for a user operation.
///
/// An action pins the user it operates on, carries the broker the engine
/// calls back into, and holds a small mailbox of credentials the embedder
/// has provided. Operations handed an action for a different user are
/// silent no-ops.
pub struct Action {
    user: Arc<User>,
    broker: Arc<dyn CredentialBroker>,
    credentials: Mutex<Mailbox>,
}

impl Action {
    /// Creates an action for `user` reporting through `broker`.
    #[must_use]
    pub fn new(user: Arc<User>, broker: Arc<dyn CredentialBroker>) -> Self {
        Self {
            user,
            broker,
            credentials: Mutex::new(Mailbox::default()),
        }
    }

    /// Returns the user this action operates on.
    #[must_use]
    pub const fn user(&self) -> &Arc<User> {
        &self.user
    }

    /// Returns `true` if this action operates on `user`.
    #[must_use]
    pub fn is_for(&self, user: &User) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.user), user)
    }

    /// Deposits a credential supplied by the embedder.
    ///
    /// The next key-lookup cycle consumes it.
    pub fn provide_credential(&self, kind: CredentialKind, bytes: &[u8]) {
        if let Ok(mut mailbox) = self.credentials.lock() {
            mailbox[kind.index()] = Some(Zeroizing::new(bytes.to_vec()));
        }
    }

    /// Takes a deposited credential, leaving the slot empty.
    pub(crate) fn take_credential(&self, kind: CredentialKind) -> Option<Zeroizing<Vec<u8>>> {
        self.credentials.lock().ok()?[kind.index()].take()
    }

    /// Asks the broker for a credential on this action's behalf.
    pub(crate) fn request_credential(&self, kind: CredentialKind) {
        self.broker.request_authentication(self, kind);
    }

    /// Reports scaled derivation progress; `false` means abort.
    pub(crate) fn report_progress(&self, scaler: ProgressScaler, percent: i32) -> bool {
        self.broker.on_progress(self, scaler.scale(percent))
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("user", &self.user.unique_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryCredentialBroker;
    use crate::user::UserRegistry;

    #[test]
    fn test_mailbox_take_consumes() {
        let registry = UserRegistry::new();
        let user = registry.create();
        let action = Action::new(Arc::clone(&user), Arc::new(MemoryCredentialBroker::new()));

        assert!(action.take_credential(CredentialKind::Password).is_none());
        action.provide_credential(CredentialKind::Password, b"secret");
        assert_eq!(
            &**action.take_credential(CredentialKind::Password).unwrap(),
            b"secret"
        );
        assert!(action.take_credential(CredentialKind::Password).is_none());
        registry.release(&user);
    }

    #[test]
    fn test_is_for_distinguishes_users() {
        let registry = UserRegistry::new();
        let a = registry.create();
        let b = registry.create();
        let action = Action::new(Arc::clone(&a), Arc::new(MemoryCredentialBroker::new()));
        assert!(action.is_for(&a));
        assert!(!action.is_for(&b));
        registry.release(&a);
        registry.release(&b);
    }
}
