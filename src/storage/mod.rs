//! The identity container: typed, length-prefixed blocks and their
//! serialized envelope.
//!
//! A container is a set of [`Block`]s, at most one per 16-bit type,
//! serialized as a raw concatenation behind the `sqrldata` signature or as
//! base64url behind `SQRLDATA`. Block types 1–3 carry the encrypted
//! identity material; the block of type 0 defines the container's unique
//! identifier.

mod block;
mod container;
pub mod format;
mod records;

pub use block::Block;
pub use container::Storage;
pub use format::{StorageEncoding, StorageExport};
pub use records::{PasswordBlock, PreviousBlock, RescueBlock};
