//! Storage adapter trait for container bytes.

use crate::IdentityResult;

/// Byte-level access to wherever containers live.
///
/// The engine never opens files or sockets itself; it hands a URI and a
/// buffer to the adapter and lets the embedder decide what the URI means.
/// No scheme semantics leak into the engine.
pub trait StorageAdapter: Send + Sync {
    /// Fetches the serialized container stored at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotFound`](crate::IdentityError::NotFound)
    /// when nothing is stored at `uri`, or an adapter error for transport
    /// failures.
    fn load(&self, uri: &str) -> IdentityResult<Vec<u8>>;

    /// Stores serialized container bytes at `uri`.
    ///
    /// # Errors
    ///
    /// Returns an adapter error if the bytes cannot be stored.
    fn save(&self, uri: &str, bytes: &[u8]) -> IdentityResult<()>;
}
