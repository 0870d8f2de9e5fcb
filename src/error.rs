//! Error types for the identity engine.
//!
//! All fallible entry points return [`IdentityError`] through the
//! [`IdentityResult`](crate::IdentityResult) alias; nothing panics across
//! the API boundary. Operations that the protocol defines as silent no-ops
//! (wrong user, released user) return `false`/`None` instead of an error.

use thiserror::Error;

use crate::platform::CredentialKind;

/// Errors that can occur during identity storage and key operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A cursor-driven read or write ran past the end of a block.
    #[error("buffer overrun: {context}")]
    BufferOverrun {
        /// Context describing the access.
        context: String,
    },

    /// The container did not start with a recognized signature.
    #[error("invalid container envelope: found {}", hex::encode(.found))]
    InvalidEnvelope {
        /// The first bytes actually found.
        found: Vec<u8>,
    },

    /// A block header or the container framing is inconsistent.
    #[error("malformed block: {context}")]
    MalformedBlock {
        /// Description of the inconsistency.
        context: String,
    },

    /// Base64 or other textual decoding failed.
    #[error("decode error: {context}")]
    DecodeError {
        /// Description of the failure.
        context: String,
    },

    /// AEAD verification failed (wrong credential, tampered data).
    #[error("decryption failed: {context}")]
    DecryptionFailed {
        /// Context describing what was being decrypted.
        context: String,
    },

    /// AEAD sealing failed.
    #[error("encryption failed: {context}")]
    EncryptionFailed {
        /// Context describing what was being encrypted.
        context: String,
    },

    /// Enscrypt or another derivation rejected its parameters.
    #[error("key derivation failed: {context}")]
    KeyDerivationFailed {
        /// Context describing what was being derived.
        context: String,
    },

    /// A required credential has not been provided yet.
    #[error("credential required: {kind:?}")]
    CredentialRequired {
        /// The kind of credential that was requested from the broker.
        kind: CredentialKind,
    },

    /// A secret-bearing allocation could not be created.
    #[error("allocation failed: {context}")]
    AllocationFailed {
        /// Context describing the allocation.
        context: String,
    },

    /// A protected region was accessed in a state that forbids it.
    #[error("memory protection violation: {context}")]
    MemoryProtection {
        /// Description of the violated access rule.
        context: String,
    },

    /// The storage adapter failed to load or save container bytes.
    #[error("storage adapter error: {context}")]
    AdapterError {
        /// Description from the adapter.
        context: String,
    },

    /// No container exists for the given URI.
    #[error("not found: {uri}")]
    NotFound {
        /// The URI that was requested.
        uri: String,
    },

    /// The embedder aborted a long-running derivation via the progress hook.
    #[error("operation aborted by progress callback")]
    Aborted,

    /// Invalid input parameter.
    #[error("invalid input '{parameter}': {reason}")]
    InvalidInput {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of the issue.
        reason: String,
    },
}

impl IdentityError {
    /// Creates a buffer overrun error.
    pub fn overrun<S: Into<String>>(context: S) -> Self {
        Self::BufferOverrun {
            context: context.into(),
        }
    }

    /// Creates a malformed block error.
    pub fn malformed<S: Into<String>>(context: S) -> Self {
        Self::MalformedBlock {
            context: context.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode<S: Into<String>>(context: S) -> Self {
        Self::DecodeError {
            context: context.into(),
        }
    }

    /// Creates a decryption failed error.
    pub fn decryption<S: Into<String>>(context: S) -> Self {
        Self::DecryptionFailed {
            context: context.into(),
        }
    }

    /// Creates an encryption failed error.
    pub fn encryption<S: Into<String>>(context: S) -> Self {
        Self::EncryptionFailed {
            context: context.into(),
        }
    }

    /// Creates a key derivation error.
    pub fn derivation<S: Into<String>>(context: S) -> Self {
        Self::KeyDerivationFailed {
            context: context.into(),
        }
    }

    /// Creates an allocation error.
    pub fn allocation<S: Into<String>>(context: S) -> Self {
        Self::AllocationFailed {
            context: context.into(),
        }
    }

    /// Creates a memory protection error.
    pub fn protection<S: Into<String>>(context: S) -> Self {
        Self::MemoryProtection {
            context: context.into(),
        }
    }

    /// Creates a storage adapter error.
    pub fn adapter<S: Into<String>>(context: S) -> Self {
        Self::AdapterError {
            context: context.into(),
        }
    }

    /// Creates an invalid input error.
    pub fn invalid_input<P: Into<String>, R: Into<String>>(parameter: P, reason: R) -> Self {
        Self::InvalidInput {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IdentityError::overrun("read 4 at cursor 6 of 8");
        assert!(format!("{err}").contains("buffer overrun"));
        let err = IdentityError::InvalidEnvelope {
            found: vec![0, 1, 2],
        };
        assert!(format!("{err}").contains("invalid container envelope"));
        assert!(format!("{err}").contains("000102"));
        let err = IdentityError::CredentialRequired {
            kind: CredentialKind::Password,
        };
        assert!(format!("{err}").contains("credential required"));
    }
}
