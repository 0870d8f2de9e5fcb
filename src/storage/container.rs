//! The block container: parse, serialize, unique id.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::buffer::SqrlBuffer;
use crate::platform::StorageAdapter;
use crate::{IdentityError, IdentityResult};

use super::block::Block;
use super::format::{
    StorageEncoding, StorageExport, BLOCK_HEADER_SIZE, BLOCK_TYPE_IDENTITY, BLOCK_TYPE_RESCUE,
    SIGNATURE_BASE64, SIGNATURE_BINARY, SIGNATURE_SIZE,
};

/// A set of blocks keyed by type.
///
/// At most one block of each type is present; `put` replaces. Iteration
/// order is unobservable except through the unique id, which depends only
/// on the block of type 0.
#[derive(Debug, Default)]
pub struct Storage {
    blocks: Vec<Block>,
}

impl Storage {
    /// Creates an empty container.
    #[must_use]
    pub const fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Parses a container from its serialized bytes.
    ///
    /// # Errors
    ///
    /// Returns an error for an unrecognized signature, undecodable base64,
    /// or inconsistent block framing.
    pub fn from_bytes(bytes: &[u8]) -> IdentityResult<Self> {
        let mut storage = Self::new();
        storage.load(bytes)?;
        Ok(storage)
    }

    /// Fetches and parses a container through the storage adapter.
    ///
    /// # Errors
    ///
    /// Propagates adapter failures and parse errors.
    pub fn from_uri(adapter: &dyn StorageAdapter, uri: &str) -> IdentityResult<Self> {
        let bytes = adapter.load(uri)?;
        Self::from_bytes(&bytes)
    }

    /// Returns `true` if a block of `block_type` is present.
    #[must_use]
    pub fn has(&self, block_type: u16) -> bool {
        self.get(block_type).is_some()
    }

    /// Returns the block of `block_type`, if present.
    #[must_use]
    pub fn get(&self, block_type: u16) -> Option<&Block> {
        self.blocks.iter().find(|b| b.block_type() == block_type)
    }

    /// Returns the block of `block_type` mutably, if present.
    pub fn get_mut(&mut self, block_type: u16) -> Option<&mut Block> {
        self.blocks
            .iter_mut()
            .find(|b| b.block_type() == block_type)
    }

    /// Inserts a block, replacing any existing block of the same type.
    pub fn put(&mut self, block: Block) {
        if let Some(existing) = self
            .blocks
            .iter_mut()
            .find(|b| b.block_type() == block.block_type())
        {
            *existing = block;
        } else {
            self.blocks.push(block);
        }
    }

    /// Removes the block of `block_type`, returning whether one existed.
    pub fn remove(&mut self, block_type: u16) -> bool {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.block_type() != block_type);
        self.blocks.len() != before
    }

    /// Returns the types currently present.
    #[must_use]
    pub fn block_types(&self) -> Vec<u16> {
        self.blocks.iter().map(Block::block_type).collect()
    }

    /// Replaces the container's contents with a parsed serialization.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidEnvelope`] for an unrecognized
    /// signature, [`IdentityError::DecodeError`] for bad base64, and
    /// [`IdentityError::MalformedBlock`] when the block concatenation does
    /// not exactly consume the payload.
    pub fn load(&mut self, bytes: &[u8]) -> IdentityResult<()> {
        if bytes.len() < SIGNATURE_SIZE {
            return Err(IdentityError::InvalidEnvelope {
                found: bytes.to_vec(),
            });
        }
        let (signature, rest) = bytes.split_at(SIGNATURE_SIZE);
        let payload = if signature == SIGNATURE_BINARY {
            rest.to_vec()
        } else if signature == SIGNATURE_BASE64 {
            URL_SAFE_NO_PAD
                .decode(rest)
                .map_err(|e| IdentityError::decode(format!("container base64: {e}")))?
        } else {
            return Err(IdentityError::InvalidEnvelope {
                found: signature.to_vec(),
            });
        };

        self.blocks.clear();
        let mut pos = 0;
        while payload.len() - pos >= 2 {
            let length = u16::from_le_bytes([payload[pos], payload[pos + 1]]);
            if length == 0 || pos + usize::from(length) > payload.len() {
                break;
            }
            if usize::from(length) < BLOCK_HEADER_SIZE {
                return Err(IdentityError::malformed(format!(
                    "block length {length} below header size"
                )));
            }
            let block_type = u16::from_le_bytes([payload[pos + 2], payload[pos + 3]]);
            let mut block = Block::create(block_type, length)?;
            block
                .data_mut(false)?
                .copy_from_slice(&payload[pos..pos + usize::from(length)]);
            self.put(block);
            pos += usize::from(length);
        }
        if pos != payload.len() {
            return Err(IdentityError::malformed(format!(
                "{} trailing bytes after last block",
                payload.len() - pos
            )));
        }
        Ok(())
    }

    /// Serializes the container.
    ///
    /// `export` selects the emitted blocks, `encoding` the envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if a block is too short to carry its header.
    pub fn save(
        &self,
        export: StorageExport,
        encoding: StorageEncoding,
    ) -> IdentityResult<SqrlBuffer> {
        let mut payload = Vec::new();
        for block in &self.blocks {
            let emit = match export {
                StorageExport::All => true,
                StorageExport::Rescue => block.block_type() == BLOCK_TYPE_RESCUE,
            };
            if emit {
                payload.extend_from_slice(&block.serialized()?);
            }
        }

        let mut out = SqrlBuffer::with_capacity(SIGNATURE_SIZE + payload.len());
        match encoding {
            StorageEncoding::Binary => {
                out.append_bytes(SIGNATURE_BINARY);
                out.append_bytes(&payload);
            }
            StorageEncoding::Base64 => {
                out.append_bytes(SIGNATURE_BASE64);
                out.append_bytes(URL_SAFE_NO_PAD.encode(&payload).as_bytes());
            }
        }
        Ok(out)
    }

    /// Serializes the container and hands it to the storage adapter.
    ///
    /// # Errors
    ///
    /// Propagates serialization and adapter failures.
    pub fn save_uri(
        &self,
        adapter: &dyn StorageAdapter,
        uri: &str,
        export: StorageExport,
        encoding: StorageEncoding,
    ) -> IdentityResult<()> {
        let buffer = self.save(export, encoding)?;
        adapter.save(uri, buffer.as_bytes())
    }

    /// Computes the container's unique identifier.
    ///
    /// The id is the base64url (no padding) SHA-256 of the type-0 block's
    /// serialized bytes: exactly 43 characters, or the empty string when no
    /// type-0 block exists.
    ///
    /// # Errors
    ///
    /// Propagates region access failures from the type-0 block.
    pub fn unique_id(&self) -> IdentityResult<String> {
        match self.get(BLOCK_TYPE_IDENTITY) {
            Some(block) => {
                let digest = Sha256::digest(block.serialized()?);
                Ok(URL_SAFE_NO_PAD.encode(digest))
            }
            None => Ok(String::new()),
        }
    }
}
