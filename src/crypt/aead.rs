//! AES-256-GCM sealing for identity blocks and the hint lock.
//!
//! Identity blocks authenticate their plaintext header as associated data
//! and carry a detached 16-byte tag, so the helpers here work in place over
//! a caller-provided buffer instead of allocating.

use aes_gcm::aead::AeadInPlace;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce, Tag};

use crate::{IdentityError, IdentityResult};

/// Size of the AES-GCM initialization vector in bytes.
pub const IV_SIZE: usize = 12;

/// Size of the detached authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encrypts `buf` in place, returning the detached tag.
///
/// # Errors
///
/// Returns [`IdentityError::EncryptionFailed`] if the cipher rejects the
/// input (only possible for plaintexts beyond the AES-GCM length bound).
pub fn seal_in_place(
    key: &[u8; 32],
    iv: &[u8; IV_SIZE],
    associated_data: &[u8],
    buf: &mut [u8],
) -> IdentityResult<[u8; TAG_SIZE]> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    let tag = cipher
        .encrypt_in_place_detached(nonce, associated_data, buf)
        .map_err(|_| IdentityError::encryption("AES-GCM seal failed"))?;
    let mut out = [0u8; TAG_SIZE];
    out.copy_from_slice(&tag);
    Ok(out)
}

/// Decrypts `buf` in place, verifying the detached tag.
///
/// On failure the buffer contents are unspecified ciphertext; callers wipe
/// their plaintext destination themselves.
///
/// # Errors
///
/// Returns [`IdentityError::DecryptionFailed`] when authentication fails
/// (wrong key, tampered data, or wrong associated data).
pub fn open_in_place(
    key: &[u8; 32],
    iv: &[u8; IV_SIZE],
    associated_data: &[u8],
    buf: &mut [u8],
    tag: &[u8; TAG_SIZE],
) -> IdentityResult<()> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt_in_place_detached(nonce, associated_data, buf, Tag::from_slice(tag))
        .map_err(|_| IdentityError::decryption("AES-GCM authentication failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let key = [0x42u8; 32];
        let iv = [7u8; IV_SIZE];
        let mut buf = *b"identity key material here......";
        let original = buf;

        let tag = seal_in_place(&key, &iv, b"header", &mut buf).unwrap();
        assert_ne!(buf, original);

        open_in_place(&key, &iv, b"header", &mut buf, &tag).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let mut buf = [0u8; 32];
        let tag = seal_in_place(&[1u8; 32], &[0u8; IV_SIZE], &[], &mut buf).unwrap();
        let result = open_in_place(&[2u8; 32], &[0u8; IV_SIZE], &[], &mut buf, &tag);
        assert!(matches!(result, Err(IdentityError::DecryptionFailed { .. })));
    }

    #[test]
    fn test_open_rejects_wrong_associated_data() {
        let mut buf = [0u8; 16];
        let tag = seal_in_place(&[1u8; 32], &[0u8; IV_SIZE], b"aad", &mut buf).unwrap();
        let result = open_in_place(&[1u8; 32], &[0u8; IV_SIZE], b"bad", &mut buf, &tag);
        assert!(matches!(result, Err(IdentityError::DecryptionFailed { .. })));
    }

    #[test]
    fn test_open_rejects_tampered_ciphertext() {
        let mut buf = [0u8; 16];
        let tag = seal_in_place(&[1u8; 32], &[0u8; IV_SIZE], &[], &mut buf).unwrap();
        buf[0] ^= 0xFF;
        let result = open_in_place(&[1u8; 32], &[0u8; IV_SIZE], &[], &mut buf, &tag);
        assert!(matches!(result, Err(IdentityError::DecryptionFailed { .. })));
    }
}
