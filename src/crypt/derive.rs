//! Identity key derivation chain and rescue-code conversion.
//!
//! The chain hangs off the Identity Unlock Key: `MK = EnHash(IUK)`,
//! `ILK = X25519(IUK, basepoint)`, `LOCAL = EnHash(MK)`. EnHash is sixteen
//! chained SHA-256 rounds XORed together.

use sha2::{Digest, Sha256};
use x25519_dalek::{x25519, X25519_BASEPOINT_BYTES};

use crate::secure::KEY_SIZE;

const ENHASH_ROUNDS: usize = 16;

/// Length of a rescue code in decimal digits.
pub const RESCUE_CODE_LENGTH: usize = 24;

/// Entropy consumed when generating a rescue code, in bytes.
pub const RESCUE_ENTROPY_BYTES: usize = 64;

/// EnHash: sixteen chained SHA-256 rounds, XOR-accumulated.
#[must_use]
pub fn en_hash(input: &[u8]) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    let mut output = [0u8; KEY_SIZE];
    for _ in 0..ENHASH_ROUNDS {
        let round: [u8; KEY_SIZE] = hasher.finalize().into();
        hasher = Sha256::new();
        hasher.update(round);
        for (acc, byte) in output.iter_mut().zip(round.iter()) {
            *acc ^= byte;
        }
    }
    output
}

/// Derives the Master Key from the Identity Unlock Key.
#[must_use]
pub fn generate_master_key(iuk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    en_hash(iuk)
}

/// Derives the Identity Lock Key: the Curve25519 public point of the IUK.
#[must_use]
pub fn generate_identity_lock_key(iuk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    x25519(*iuk, X25519_BASEPOINT_BYTES)
}

/// Derives the local encryption key from the Master Key.
#[must_use]
pub fn generate_local_key(mk: &[u8; KEY_SIZE]) -> [u8; KEY_SIZE] {
    en_hash(mk)
}

/// Converts 64 bytes of entropy into 24 rescue-code digits.
///
/// The entropy is read as eight little-endian 64-bit words; three rounds
/// over the words each peel one decimal digit off every word, which keeps
/// the digits uniformly distributed given uniform entropy.
#[must_use]
pub fn bin2rc(entropy: &[u8; RESCUE_ENTROPY_BYTES]) -> [u8; RESCUE_CODE_LENGTH] {
    let mut words = [0u64; 8];
    for (word, chunk) in words.iter_mut().zip(entropy.chunks_exact(8)) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        *word = u64::from_le_bytes(bytes);
    }

    let mut digits = [0u8; RESCUE_CODE_LENGTH];
    let mut j = 0;
    for _ in 0..3 {
        for word in &mut words {
            #[allow(clippy::cast_possible_truncation)]
            {
                digits[j] = b'0' + (*word % 10) as u8;
            }
            *word /= 10;
            j += 1;
        }
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_en_hash_is_deterministic() {
        let a = en_hash(b"input");
        let b = en_hash(b"input");
        assert_eq!(a, b);
        assert_ne!(a, en_hash(b"other"));
        assert_ne!(a, [0u8; KEY_SIZE]);
    }

    #[test]
    fn test_derivation_chain_distinct() {
        let iuk = [0x42u8; KEY_SIZE];
        let mk = generate_master_key(&iuk);
        let ilk = generate_identity_lock_key(&iuk);
        let local = generate_local_key(&mk);
        assert_ne!(mk, ilk);
        assert_ne!(mk, local);
        assert_ne!(ilk, local);
    }

    #[test]
    fn test_identity_lock_key_matches_x25519() {
        let iuk = [9u8; KEY_SIZE];
        assert_eq!(
            generate_identity_lock_key(&iuk),
            x25519(iuk, X25519_BASEPOINT_BYTES)
        );
    }

    #[test]
    fn test_bin2rc_shape() {
        let mut entropy = [0u8; RESCUE_ENTROPY_BYTES];
        for (i, byte) in entropy.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            {
                *byte = (i * 37) as u8;
            }
        }
        let code = bin2rc(&entropy);
        assert_eq!(code.len(), RESCUE_CODE_LENGTH);
        assert!(code.iter().all(u8::is_ascii_digit));
    }

    #[test]
    fn test_bin2rc_digit_order() {
        // Word k contributes its least significant decimal digit first,
        // at positions k, k+8 and k+16.
        let mut entropy = [0u8; RESCUE_ENTROPY_BYTES];
        entropy[0..8].copy_from_slice(&123u64.to_le_bytes());
        let code = bin2rc(&entropy);
        assert_eq!(code[0], b'3');
        assert_eq!(code[8], b'2');
        assert_eq!(code[16], b'1');
    }
}
