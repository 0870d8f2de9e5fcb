//! Credential broker trait.

use crate::user::Action;

/// The kinds of credential the engine can request from the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// The identity password.
    Password,
    /// The leading characters of the password used by the hint lock.
    Hint,
    /// The 24-digit rescue code.
    RescueCode,
    /// A replacement password during a password change.
    NewPassword,
}

impl CredentialKind {
    pub(crate) const COUNT: usize = 4;

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Password => 0,
            Self::Hint => 1,
            Self::RescueCode => 2,
            Self::NewPassword => 3,
        }
    }
}

/// Callback surface through which the engine talks to the host application.
///
/// When a key lookup needs a credential that is not in memory, the engine
/// calls [`request_authentication`](Self::request_authentication) and
/// returns. The host supplies the credential through
/// [`Action::provide_credential`] and re-drives the operation; the lookup
/// path tolerates three such cycles before failing hard.
pub trait CredentialBroker: Send + Sync {
    /// Asks the host for a credential on behalf of `action`.
    fn request_authentication(&self, action: &Action, kind: CredentialKind);

    /// Reports overall progress (`0..=100`) of a long-running derivation.
    ///
    /// Returning `false` aborts the derivation.
    fn on_progress(&self, action: &Action, percent: i32) -> bool {
        let _ = (action, percent);
        true
    }
}
