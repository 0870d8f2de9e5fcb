//! Typed codecs for the identity block types.
//!
//! Each codec maps between a [`Block`] and a struct view of its fields,
//! driving the block's cursor API for the actual byte work. The plaintext
//! header of every type doubles as the AEAD associated data, so each codec
//! also rebuilds that prefix for the crypto layer.

use crate::crypt::aead::{IV_SIZE, TAG_SIZE};
use crate::crypt::enscrypt::SALT_SIZE;
use crate::secure::KEY_SIZE;
use crate::{IdentityError, IdentityResult};

use super::block::Block;
use super::format::{BLOCK_TYPE_PASSWORD, BLOCK_TYPE_PREVIOUS, BLOCK_TYPE_RESCUE};

const T1_CIPHERTEXT_LEN: usize = 2 * KEY_SIZE;
const T3_MAX_EDITION: u16 = 4;

/// Password-protected identity keys (block type 1).
///
/// # Binary Layout (125 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       2     length (u16 LE, 125)
/// 2       2     type (u16 LE, 1)
/// 4       2     plaintext length (u16 LE, 45)
/// 6       12    AES-GCM IV
/// 18      16    scrypt salt
/// 34      1     scrypt log-N factor
/// 35      4     scrypt iteration count (u32 LE)
/// 39      2     option flags (u16 LE)
/// 41      1     hint length
/// 42      1     enscrypt seconds
/// 43      2     timeout minutes (u16 LE)
/// 45      64    ciphertext (MK ‖ ILK)
/// 109     16    AEAD tag
/// ```
///
/// The first 45 bytes are the AEAD associated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordBlock {
    /// AES-GCM initialization vector.
    pub iv: [u8; IV_SIZE],
    /// Enscrypt salt.
    pub salt: [u8; SALT_SIZE],
    /// Enscrypt scrypt log-N factor.
    pub log_n_factor: u8,
    /// Enscrypt iteration count recorded at sealing time.
    pub iteration_count: u32,
    /// The user's option flags at sealing time.
    pub option_flags: u16,
    /// The user's hint length at sealing time.
    pub hint_length: u8,
    /// The user's enscrypt seconds at sealing time.
    pub enscrypt_seconds: u8,
    /// The user's timeout minutes at sealing time.
    pub timeout_minutes: u16,
    /// Sealed MK ‖ ILK.
    pub ciphertext: [u8; T1_CIPHERTEXT_LEN],
    /// Detached AEAD tag.
    pub tag: [u8; TAG_SIZE],
}

impl PasswordBlock {
    /// Total block length in bytes.
    pub const BLOCK_LEN: u16 = 125;

    /// Length of the plaintext header doubling as associated data.
    pub const AAD_LEN: u16 = 45;

    /// Length of the sealed key material.
    pub const CIPHERTEXT_LEN: usize = T1_CIPHERTEXT_LEN;

    /// Encodes into a freshly allocated block.
    ///
    /// # Errors
    ///
    /// Propagates allocation and cursor failures.
    pub fn to_block(&self) -> IdentityResult<Block> {
        let mut block = Block::create(BLOCK_TYPE_PASSWORD, Self::BLOCK_LEN)?;
        block.write_u16(Self::BLOCK_LEN)?;
        block.write_u16(BLOCK_TYPE_PASSWORD)?;
        block.write_u16(Self::AAD_LEN)?;
        block.write(&self.iv)?;
        block.write(&self.salt)?;
        block.write_u8(self.log_n_factor)?;
        block.write_u32(self.iteration_count)?;
        block.write_u16(self.option_flags)?;
        block.write_u8(self.hint_length)?;
        block.write_u8(self.enscrypt_seconds)?;
        block.write_u16(self.timeout_minutes)?;
        block.write(&self.ciphertext)?;
        block.write(&self.tag)?;
        Ok(block)
    }

    /// Decodes from a block, validating its framing.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedBlock`] when the length, type or
    /// plaintext-length fields disagree with the layout.
    pub fn from_block(block: &mut Block) -> IdentityResult<Self> {
        if block.length() != Self::BLOCK_LEN {
            return Err(IdentityError::malformed(format!(
                "password block length {}",
                block.length()
            )));
        }
        block.seek(0, false);
        let length = block.read_u16()?;
        let block_type = block.read_u16()?;
        let aad_len = block.read_u16()?;
        if length != Self::BLOCK_LEN || block_type != BLOCK_TYPE_PASSWORD
            || aad_len != Self::AAD_LEN
        {
            return Err(IdentityError::malformed(
                "password block header fields disagree with layout",
            ));
        }

        let mut iv = [0u8; IV_SIZE];
        block.read(&mut iv)?;
        let mut salt = [0u8; SALT_SIZE];
        block.read(&mut salt)?;
        let log_n_factor = block.read_u8()?;
        let iteration_count = block.read_u32()?;
        let option_flags = block.read_u16()?;
        let hint_length = block.read_u8()?;
        let enscrypt_seconds = block.read_u8()?;
        let timeout_minutes = block.read_u16()?;
        let mut ciphertext = [0u8; T1_CIPHERTEXT_LEN];
        block.read(&mut ciphertext)?;
        let mut tag = [0u8; TAG_SIZE];
        block.read(&mut tag)?;

        Ok(Self {
            iv,
            salt,
            log_n_factor,
            iteration_count,
            option_flags,
            hint_length,
            enscrypt_seconds,
            timeout_minutes,
            ciphertext,
            tag,
        })
    }

    /// Rebuilds the 45-byte plaintext header used as associated data.
    #[must_use]
    pub fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(usize::from(Self::AAD_LEN));
        aad.extend_from_slice(&Self::BLOCK_LEN.to_le_bytes());
        aad.extend_from_slice(&BLOCK_TYPE_PASSWORD.to_le_bytes());
        aad.extend_from_slice(&Self::AAD_LEN.to_le_bytes());
        aad.extend_from_slice(&self.iv);
        aad.extend_from_slice(&self.salt);
        aad.push(self.log_n_factor);
        aad.extend_from_slice(&self.iteration_count.to_le_bytes());
        aad.extend_from_slice(&self.option_flags.to_le_bytes());
        aad.push(self.hint_length);
        aad.push(self.enscrypt_seconds);
        aad.extend_from_slice(&self.timeout_minutes.to_le_bytes());
        aad
    }
}

/// Rescue-code-protected identity unlock key (block type 2).
///
/// # Binary Layout (73 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       2     length (u16 LE, 73)
/// 2       2     type (u16 LE, 2)
/// 4       16    scrypt salt
/// 20      1     scrypt log-N factor
/// 21      4     scrypt iteration count (u32 LE)
/// 25      32    ciphertext (IUK)
/// 57      16    AEAD tag
/// ```
///
/// The first 25 bytes are the AEAD associated data; the IV is implicitly
/// zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescueBlock {
    /// Enscrypt salt.
    pub salt: [u8; SALT_SIZE],
    /// Enscrypt scrypt log-N factor.
    pub log_n_factor: u8,
    /// Enscrypt iteration count recorded at sealing time.
    pub iteration_count: u32,
    /// Sealed IUK.
    pub ciphertext: [u8; KEY_SIZE],
    /// Detached AEAD tag.
    pub tag: [u8; TAG_SIZE],
}

impl RescueBlock {
    /// Total block length in bytes.
    pub const BLOCK_LEN: u16 = 73;

    /// Length of the plaintext header doubling as associated data.
    pub const AAD_LEN: u16 = 25;

    /// Encodes into a freshly allocated block.
    ///
    /// # Errors
    ///
    /// Propagates allocation and cursor failures.
    pub fn to_block(&self) -> IdentityResult<Block> {
        let mut block = Block::create(BLOCK_TYPE_RESCUE, Self::BLOCK_LEN)?;
        block.write_u16(Self::BLOCK_LEN)?;
        block.write_u16(BLOCK_TYPE_RESCUE)?;
        block.write(&self.salt)?;
        block.write_u8(self.log_n_factor)?;
        block.write_u32(self.iteration_count)?;
        block.write(&self.ciphertext)?;
        block.write(&self.tag)?;
        Ok(block)
    }

    /// Decodes from a block, validating its framing.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedBlock`] when the length or type
    /// fields disagree with the layout.
    pub fn from_block(block: &mut Block) -> IdentityResult<Self> {
        if block.length() != Self::BLOCK_LEN {
            return Err(IdentityError::malformed(format!(
                "rescue block length {}",
                block.length()
            )));
        }
        block.seek(0, false);
        let length = block.read_u16()?;
        let block_type = block.read_u16()?;
        if length != Self::BLOCK_LEN || block_type != BLOCK_TYPE_RESCUE {
            return Err(IdentityError::malformed(
                "rescue block header fields disagree with layout",
            ));
        }

        let mut salt = [0u8; SALT_SIZE];
        block.read(&mut salt)?;
        let log_n_factor = block.read_u8()?;
        let iteration_count = block.read_u32()?;
        let mut ciphertext = [0u8; KEY_SIZE];
        block.read(&mut ciphertext)?;
        let mut tag = [0u8; TAG_SIZE];
        block.read(&mut tag)?;

        Ok(Self {
            salt,
            log_n_factor,
            iteration_count,
            ciphertext,
            tag,
        })
    }

    /// Rebuilds the 25-byte plaintext header used as associated data.
    #[must_use]
    pub fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(usize::from(Self::AAD_LEN));
        aad.extend_from_slice(&Self::BLOCK_LEN.to_le_bytes());
        aad.extend_from_slice(&BLOCK_TYPE_RESCUE.to_le_bytes());
        aad.extend_from_slice(&self.salt);
        aad.push(self.log_n_factor);
        aad.extend_from_slice(&self.iteration_count.to_le_bytes());
        aad
    }
}

/// Previous identity unlock keys (block type 3).
///
/// # Binary Layout (22 + 32·n bytes, 1 ≤ n ≤ 4)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       2     length (u16 LE)
/// 2       2     type (u16 LE, 3)
/// 4       2     edition: count of previous IUKs (u16 LE)
/// 6       32·n  ciphertext (PIUK0..PIUKn-1)
/// 6+32·n  16    AEAD tag
/// ```
///
/// Sealed under MK with a zero IV; the first 6 bytes are the AEAD
/// associated data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousBlock {
    /// Sealed previous IUKs, most recent first; 32 bytes each.
    pub ciphertext: Vec<u8>,
    /// Detached AEAD tag.
    pub tag: [u8; TAG_SIZE],
}

impl PreviousBlock {
    /// Length of the plaintext header doubling as associated data.
    pub const AAD_LEN: u16 = 6;

    /// Returns the number of previous IUKs carried.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn edition(&self) -> u16 {
        (self.ciphertext.len() / KEY_SIZE) as u16
    }

    /// Returns the total block length for this edition.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn block_len(&self) -> u16 {
        Self::AAD_LEN + self.ciphertext.len() as u16 + TAG_SIZE as u16
    }

    fn validate(&self) -> IdentityResult<()> {
        let edition = self.edition();
        if edition == 0 || edition > T3_MAX_EDITION
            || self.ciphertext.len() % KEY_SIZE != 0
        {
            return Err(IdentityError::malformed(format!(
                "previous-IUK block carries {} ciphertext bytes",
                self.ciphertext.len()
            )));
        }
        Ok(())
    }

    /// Encodes into a freshly allocated block.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedBlock`] for an edition outside
    /// `1..=4`.
    pub fn to_block(&self) -> IdentityResult<Block> {
        self.validate()?;
        let mut block = Block::create(BLOCK_TYPE_PREVIOUS, self.block_len())?;
        block.write_u16(self.block_len())?;
        block.write_u16(BLOCK_TYPE_PREVIOUS)?;
        block.write_u16(self.edition())?;
        block.write(&self.ciphertext)?;
        block.write(&self.tag)?;
        Ok(block)
    }

    /// Decodes from a block, validating its framing.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MalformedBlock`] when the length, type or
    /// edition fields disagree with the layout.
    pub fn from_block(block: &mut Block) -> IdentityResult<Self> {
        block.seek(0, false);
        let length = block.read_u16()?;
        let block_type = block.read_u16()?;
        let edition = block.read_u16()?;
        if block_type != BLOCK_TYPE_PREVIOUS
            || edition == 0
            || edition > T3_MAX_EDITION
            || length != block.length()
            || usize::from(length)
                != usize::from(Self::AAD_LEN) + usize::from(edition) * KEY_SIZE + TAG_SIZE
        {
            return Err(IdentityError::malformed(
                "previous-IUK block header fields disagree with layout",
            ));
        }

        let mut ciphertext = vec![0u8; usize::from(edition) * KEY_SIZE];
        block.read(&mut ciphertext)?;
        let mut tag = [0u8; TAG_SIZE];
        block.read(&mut tag)?;

        Ok(Self { ciphertext, tag })
    }

    /// Rebuilds the 6-byte plaintext header used as associated data.
    #[must_use]
    pub fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(usize::from(Self::AAD_LEN));
        aad.extend_from_slice(&self.block_len().to_le_bytes());
        aad.extend_from_slice(&BLOCK_TYPE_PREVIOUS.to_le_bytes());
        aad.extend_from_slice(&self.edition().to_le_bytes());
        aad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_password_block() -> PasswordBlock {
        PasswordBlock {
            iv: [1; IV_SIZE],
            salt: [2; SALT_SIZE],
            log_n_factor: 9,
            iteration_count: 157,
            option_flags: 0x00F1,
            hint_length: 4,
            enscrypt_seconds: 1,
            timeout_minutes: 15,
            ciphertext: [3; T1_CIPHERTEXT_LEN],
            tag: [4; TAG_SIZE],
        }
    }

    #[test]
    fn test_password_block_round_trip() {
        let record = sample_password_block();
        let mut block = record.to_block().unwrap();
        assert_eq!(block.length(), PasswordBlock::BLOCK_LEN);
        assert_eq!(block.block_type(), 1);

        let decoded = PasswordBlock::from_block(&mut block).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_password_block_aad_matches_serialized_prefix() {
        let record = sample_password_block();
        let block = record.to_block().unwrap();
        let serialized = block.serialized().unwrap();
        assert_eq!(record.associated_data(), serialized[..45]);
    }

    #[test]
    fn test_password_block_rejects_wrong_framing() {
        let record = sample_password_block();
        let mut block = record.to_block().unwrap();
        block.seek(4, false);
        block.write_u16(44).unwrap();
        assert!(PasswordBlock::from_block(&mut block).is_err());
    }

    #[test]
    fn test_rescue_block_round_trip() {
        let record = RescueBlock {
            salt: [7; SALT_SIZE],
            log_n_factor: 9,
            iteration_count: 42,
            ciphertext: [8; KEY_SIZE],
            tag: [9; TAG_SIZE],
        };
        let mut block = record.to_block().unwrap();
        assert_eq!(block.length(), RescueBlock::BLOCK_LEN);

        let decoded = RescueBlock::from_block(&mut block).unwrap();
        assert_eq!(decoded, record);

        let serialized = block.serialized().unwrap();
        assert_eq!(record.associated_data(), serialized[..25]);
    }

    #[test]
    fn test_previous_block_editions() {
        for edition in 1..=4usize {
            let record = PreviousBlock {
                ciphertext: vec![0xAB; edition * KEY_SIZE],
                tag: [5; TAG_SIZE],
            };
            let mut block = record.to_block().unwrap();
            assert_eq!(usize::from(block.length()), 22 + 32 * edition);

            let decoded = PreviousBlock::from_block(&mut block).unwrap();
            assert_eq!(decoded, record);
        }
    }

    #[test]
    fn test_previous_block_rejects_bad_edition() {
        let record = PreviousBlock {
            ciphertext: vec![0; 5 * KEY_SIZE],
            tag: [0; TAG_SIZE],
        };
        assert!(record.to_block().is_err());

        let empty = PreviousBlock {
            ciphertext: Vec::new(),
            tag: [0; TAG_SIZE],
        };
        assert!(empty.to_block().is_err());
    }
}
