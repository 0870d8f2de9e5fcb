//! Fixed-slot table of identity keys inside one locked region.
//!
//! The table owns a single [`SecretRegion`] laid out as `USER_MAX_KEYS`
//! 32-byte key slots, a password buffer, and a scratch area used by the
//! hint lock. A parallel lookup array maps slot index to key identifier;
//! an unlabeled slot is free.

use zeroize::Zeroize;
use zeroize::Zeroizing;

use crate::crypt::aead;
use crate::crypt::enscrypt::{self, EnscryptMode, SALT_SIZE};
use crate::{IdentityError, IdentityResult};

use super::region::{Protection, SecretRegion};

/// Number of key slots in a user's table.
pub const USER_MAX_KEYS: usize = 16;

/// Size of every key slot in bytes.
pub const KEY_SIZE: usize = 32;

/// Maximum password length in bytes; longer passwords are truncated.
pub const PASSWORD_MAX_LEN: usize = 512;

/// Size of the scratch area used by the hint lock.
pub const SCRATCH_SIZE: usize = 2048;

const SLOTS_LEN: usize = USER_MAX_KEYS * KEY_SIZE;
const PASSWORD_OFFSET: usize = SLOTS_LEN;

/// Length of the region prefix the hint lock encrypts (slots + password).
const SECRET_LEN: usize = SLOTS_LEN + PASSWORD_MAX_LEN;

const SCRATCH_OFFSET: usize = SECRET_LEN;
const REGION_LEN: usize = SECRET_LEN + SCRATCH_SIZE;

// Scratch sublayout: salt(16) | tag(16) | derived key(32) | ciphertext.
const SCRATCH_SALT: usize = 0;
const SCRATCH_TAG: usize = SALT_SIZE;
const SCRATCH_KEY: usize = SCRATCH_TAG + aead::TAG_SIZE;
const SCRATCH_CIPHERTEXT: usize = SCRATCH_KEY + KEY_SIZE;

/// Identifier of a key slot.
///
/// Each variant names one element of the SQRL derivation chain; the key
/// workflows dispatch on this enum when generating or loading material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Identity Unlock Key, the root secret.
    Iuk,
    /// Master Key, derived from the IUK.
    Mk,
    /// Identity Lock Key, derived from the IUK.
    Ilk,
    /// Local key, derived from the MK.
    Local,
    /// Rescue code: 24 ASCII digits occupying a 32-byte slot.
    RescueCode,
    /// Most recent previous IUK.
    Piuk0,
    /// Second previous IUK.
    Piuk1,
    /// Third previous IUK.
    Piuk2,
    /// Oldest retained previous IUK.
    Piuk3,
}

impl KeyKind {
    /// The previous-IUK identifiers, most recent first.
    pub const PREVIOUS: [Self; 4] = [Self::Piuk0, Self::Piuk1, Self::Piuk2, Self::Piuk3];
}

/// A 32-byte copy of key material taken out of the table.
///
/// Zeroized on drop; never printed.
#[derive(Clone, Zeroize, zeroize::ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_SIZE]);

impl KeyMaterial {
    /// Wraps raw key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns a reference to the raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Fixed-slot key table in locked memory.
pub struct KeyTable {
    region: SecretRegion,
    lookup: [Option<KeyKind>; USER_MAX_KEYS],
    password_len: usize,
}

impl KeyTable {
    /// Allocates a zeroed table.
    ///
    /// # Errors
    ///
    /// Returns an error if the locked allocation cannot be created.
    pub fn new() -> IdentityResult<Self> {
        Ok(Self {
            region: SecretRegion::new(REGION_LEN)?,
            lookup: [None; USER_MAX_KEYS],
            password_len: 0,
        })
    }

    const fn slot_range(slot: usize) -> std::ops::Range<usize> {
        slot * KEY_SIZE..(slot + 1) * KEY_SIZE
    }

    /// Returns the slot currently labeled `kind`, if any.
    #[must_use]
    pub fn slot_of(&self, kind: KeyKind) -> Option<usize> {
        self.lookup.iter().position(|&label| label == Some(kind))
    }

    /// Returns `true` if a slot is labeled `kind`.
    #[must_use]
    pub fn has_key(&self, kind: KeyKind) -> bool {
        self.slot_of(kind).is_some()
    }

    /// Claims a zeroed slot for `kind`.
    ///
    /// Reuses the slot already labeled `kind` when present, otherwise takes
    /// the first free slot. Slot 0 is a valid result. Returns `None` when
    /// every slot carries a different label.
    pub fn new_key(&mut self, kind: KeyKind) -> Option<usize> {
        let slot = match self.slot_of(kind) {
            Some(slot) => slot,
            None => {
                let free = self.lookup.iter().position(Option::is_none)?;
                self.lookup[free] = Some(kind);
                free
            }
        };
        let mut guard = self.region.open_mut();
        guard[Self::slot_range(slot)].fill(0);
        Some(slot)
    }

    /// Copies the key labeled `kind` out of the table.
    pub fn read_key(&mut self, kind: KeyKind) -> Option<KeyMaterial> {
        let slot = self.slot_of(kind)?;
        let guard = self.region.open_mut();
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&guard[Self::slot_range(slot)]);
        Some(KeyMaterial(bytes))
    }

    /// Writes `bytes` into the slot for `kind`, claiming one if needed.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::AllocationFailed`] when the table is full.
    pub fn write_key(&mut self, kind: KeyKind, bytes: &[u8; KEY_SIZE]) -> IdentityResult<usize> {
        let slot = self
            .new_key(kind)
            .ok_or_else(|| IdentityError::allocation("key table full"))?;
        let mut guard = self.region.open_mut();
        guard[Self::slot_range(slot)].copy_from_slice(bytes);
        Ok(slot)
    }

    /// Zeroes the slot labeled `kind` and frees its label.
    pub fn remove_key(&mut self, kind: KeyKind) {
        if let Some(slot) = self.slot_of(kind) {
            let mut guard = self.region.open_mut();
            guard[Self::slot_range(slot)].fill(0);
            drop(guard);
            self.lookup[slot] = None;
        }
    }

    /// Stores a password, truncating to [`PASSWORD_MAX_LEN`].
    ///
    /// Returns `true` if a prior password existed.
    ///
    /// # Errors
    ///
    /// Propagates region access failures.
    pub fn set_password(&mut self, password: &[u8]) -> IdentityResult<bool> {
        let had_password = self.password_len > 0;
        let len = password.len().min(PASSWORD_MAX_LEN);
        let mut guard = self.region.open_mut();
        guard[PASSWORD_OFFSET..PASSWORD_OFFSET + PASSWORD_MAX_LEN].fill(0);
        guard[PASSWORD_OFFSET..PASSWORD_OFFSET + len].copy_from_slice(&password[..len]);
        drop(guard);
        self.password_len = len;
        Ok(had_password)
    }

    /// Returns the current password length in bytes.
    #[must_use]
    pub const fn password_len(&self) -> usize {
        self.password_len
    }

    /// Copies the stored password out of the table.
    pub fn read_password(&mut self) -> Zeroizing<Vec<u8>> {
        let guard = self.region.open_mut();
        Zeroizing::new(guard[PASSWORD_OFFSET..PASSWORD_OFFSET + self.password_len].to_vec())
    }

    /// Copies the leading `hint_len` bytes of the password.
    ///
    /// When `hint_len` is zero or exceeds the stored password, the whole
    /// password is returned.
    pub fn read_password_hint(&mut self, hint_len: u8) -> Zeroizing<Vec<u8>> {
        let mut len = usize::from(hint_len);
        if len == 0 || self.password_len < len {
            len = self.password_len;
        }
        let guard = self.region.open_mut();
        Zeroizing::new(guard[PASSWORD_OFFSET..PASSWORD_OFFSET + len].to_vec())
    }

    /// Transitions the region to no-access.
    pub fn protect(&mut self) {
        self.region.set_protection(Protection::NoAccess);
    }

    /// Transitions the region back to read-write.
    pub fn unprotect(&mut self) {
        self.region.set_protection(Protection::ReadWrite);
    }

    /// Returns the region's current protection state.
    #[must_use]
    pub const fn protection(&self) -> Protection {
        self.region.protection()
    }

    /// Encrypts the slots-plus-password prefix in place under a hint.
    ///
    /// The derived key comes from a duration-bounded Enscrypt over `hint`
    /// with a fresh salt. Salt, tag, derived key and ciphertext land in the
    /// scratch area; the plaintext prefix and the derived key are zeroed
    /// before returning. Returns the Enscrypt iteration count needed to
    /// reverse the derivation.
    ///
    /// # Errors
    ///
    /// Returns an error if the derivation or the seal fails; scratch is
    /// wiped and the plaintext left intact in that case.
    ///
    /// # Panics
    ///
    /// Panics if the system's random number generator fails.
    pub fn hint_seal(
        &mut self,
        hint: &[u8],
        log_n_factor: u8,
        millis: u32,
        progress: &mut dyn FnMut(i32) -> bool,
    ) -> IdentityResult<u32> {
        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt).expect("getrandom failed");

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let iterations = enscrypt::enscrypt(
            &mut key,
            hint,
            &salt,
            log_n_factor,
            EnscryptMode::Millis(millis),
            progress,
        )?;

        let mut guard = self.region.open_mut();
        guard[SCRATCH_OFFSET + SCRATCH_SALT..SCRATCH_OFFSET + SCRATCH_SALT + SALT_SIZE]
            .copy_from_slice(&salt);
        guard[SCRATCH_OFFSET + SCRATCH_KEY..SCRATCH_OFFSET + SCRATCH_KEY + KEY_SIZE]
            .copy_from_slice(key.as_slice());

        let (secret, scratch) = guard.split_at_mut(SCRATCH_OFFSET);
        let ciphertext = &mut scratch[SCRATCH_CIPHERTEXT..SCRATCH_CIPHERTEXT + SECRET_LEN];
        ciphertext.copy_from_slice(secret);

        let iv = [0u8; aead::IV_SIZE];
        match aead::seal_in_place(&key, &iv, &[], ciphertext) {
            Ok(tag) => {
                scratch[SCRATCH_TAG..SCRATCH_TAG + aead::TAG_SIZE].copy_from_slice(&tag);
                secret.fill(0);
                scratch[SCRATCH_KEY..SCRATCH_KEY + KEY_SIZE].fill(0);
                Ok(iterations)
            }
            Err(err) => {
                scratch.fill(0);
                Err(err)
            }
        }
    }

    /// Reverses [`hint_seal`](Self::hint_seal), decrypting scratch back into
    /// the slots-plus-password prefix.
    ///
    /// Returns `Ok(true)` on authentication success. On failure the prefix
    /// is zeroed instead. In both cases the derived key and the entire
    /// scratch area are wiped before returning.
    ///
    /// # Errors
    ///
    /// Returns an error only if the key derivation itself fails.
    pub fn hint_open(
        &mut self,
        hint: &[u8],
        log_n_factor: u8,
        iterations: u32,
        progress: &mut dyn FnMut(i32) -> bool,
    ) -> IdentityResult<bool> {
        let (salt, tag) = {
            let guard = self.region.open_mut();
            let mut salt = [0u8; SALT_SIZE];
            let mut tag = [0u8; aead::TAG_SIZE];
            salt.copy_from_slice(
                &guard[SCRATCH_OFFSET + SCRATCH_SALT..SCRATCH_OFFSET + SCRATCH_SALT + SALT_SIZE],
            );
            tag.copy_from_slice(
                &guard[SCRATCH_OFFSET + SCRATCH_TAG..SCRATCH_OFFSET + SCRATCH_TAG + aead::TAG_SIZE],
            );
            (salt, tag)
        };

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let derivation = enscrypt::enscrypt(
            &mut key,
            hint,
            &salt,
            log_n_factor,
            EnscryptMode::Iterations(iterations),
            progress,
        );

        let mut guard = self.region.open_mut();
        let (secret, scratch) = guard.split_at_mut(SCRATCH_OFFSET);

        let opened = derivation.map(|_| {
            let iv = [0u8; aead::IV_SIZE];
            let ciphertext = &mut scratch[SCRATCH_CIPHERTEXT..SCRATCH_CIPHERTEXT + SECRET_LEN];
            match aead::open_in_place(&key, &iv, &[], ciphertext, &tag) {
                Ok(()) => {
                    secret.copy_from_slice(ciphertext);
                    true
                }
                Err(_) => {
                    secret.fill(0);
                    false
                }
            }
        });

        scratch.fill(0);
        opened
    }

    /// Zeroes every byte of the table and frees all labels.
    pub fn wipe(&mut self) {
        self.region.wipe();
        self.lookup = [None; USER_MAX_KEYS];
        self.password_len = 0;
    }
}

impl std::fmt::Debug for KeyTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyTable")
            .field("labels", &self.lookup)
            .field("password_len", &self.password_len)
            .field("slots", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_progress() -> impl FnMut(i32) -> bool {
        |_| true
    }

    #[test]
    fn test_slot_zero_is_a_valid_slot() {
        let mut table = KeyTable::new().unwrap();
        let slot = table.new_key(KeyKind::Mk).unwrap();
        assert_eq!(slot, 0);
        assert!(table.has_key(KeyKind::Mk));
        assert!(table.read_key(KeyKind::Mk).is_some());
    }

    #[test]
    fn test_new_key_reuses_existing_slot_and_zeroes_it() {
        let mut table = KeyTable::new().unwrap();
        table.write_key(KeyKind::Ilk, &[0xAA; KEY_SIZE]).unwrap();
        let slot = table.new_key(KeyKind::Ilk).unwrap();
        assert_eq!(slot, table.slot_of(KeyKind::Ilk).unwrap());
        assert_eq!(table.read_key(KeyKind::Ilk).unwrap().as_bytes(), &[0u8; KEY_SIZE]);
    }

    #[test]
    fn test_table_full() {
        let mut table = KeyTable::new().unwrap();
        let kinds = [
            KeyKind::Iuk,
            KeyKind::Mk,
            KeyKind::Ilk,
            KeyKind::Local,
            KeyKind::RescueCode,
            KeyKind::Piuk0,
            KeyKind::Piuk1,
            KeyKind::Piuk2,
            KeyKind::Piuk3,
        ];
        // Fill every slot: nine distinct kinds, then re-claim until full.
        for kind in kinds {
            table.new_key(kind).unwrap();
        }
        for _ in kinds.len()..USER_MAX_KEYS {
            // Claiming an already-labeled kind must not consume new slots.
            table.new_key(KeyKind::Mk).unwrap();
        }
        assert!(table.lookup.iter().filter(|l| l.is_some()).count() == kinds.len());
    }

    #[test]
    fn test_remove_key_zeroes_slot() {
        let mut table = KeyTable::new().unwrap();
        table.write_key(KeyKind::Iuk, &[0x42; KEY_SIZE]).unwrap();
        let slot = table.slot_of(KeyKind::Iuk).unwrap();
        table.remove_key(KeyKind::Iuk);
        assert!(!table.has_key(KeyKind::Iuk));

        // The freed slot hands out zeroed bytes to its next owner.
        let reused = table.new_key(KeyKind::Mk).unwrap();
        assert_eq!(reused, slot);
        assert_eq!(table.read_key(KeyKind::Mk).unwrap().as_bytes(), &[0u8; KEY_SIZE]);
    }

    #[test]
    fn test_password_truncation_and_change_flag() {
        let mut table = KeyTable::new().unwrap();
        assert!(!table.set_password(b"first").unwrap());
        assert_eq!(table.password_len(), 5);
        assert!(table.set_password(&[b'x'; PASSWORD_MAX_LEN + 10]).unwrap());
        assert_eq!(table.password_len(), PASSWORD_MAX_LEN);
    }

    #[test]
    fn test_password_hint_prefix() {
        let mut table = KeyTable::new().unwrap();
        table.set_password(b"hunter2!").unwrap();
        assert_eq!(&*table.read_password_hint(4), b"hunt");
        assert_eq!(&*table.read_password_hint(0), b"hunter2!");
        assert_eq!(&*table.read_password_hint(200), b"hunter2!");
    }

    #[test]
    fn test_hint_seal_open_round_trip() {
        let mut table = KeyTable::new().unwrap();
        table.write_key(KeyKind::Mk, &[0x11; KEY_SIZE]).unwrap();
        table.set_password(b"password").unwrap();

        let iterations = table
            .hint_seal(b"pass", enscrypt::DEFAULT_LOG_N_FACTOR, 20, &mut no_progress())
            .unwrap();
        assert!(iterations >= 1);
        // Sealed: the slot bytes are zeroed.
        assert_eq!(table.read_key(KeyKind::Mk).unwrap().as_bytes(), &[0u8; KEY_SIZE]);

        let opened = table
            .hint_open(b"pass", enscrypt::DEFAULT_LOG_N_FACTOR, iterations, &mut no_progress())
            .unwrap();
        assert!(opened);
        assert_eq!(table.read_key(KeyKind::Mk).unwrap().as_bytes(), &[0x11; KEY_SIZE]);
        assert_eq!(&*table.read_password(), b"password");
    }

    #[test]
    fn test_hint_open_wrong_hint_zeroes_prefix() {
        let mut table = KeyTable::new().unwrap();
        table.write_key(KeyKind::Mk, &[0x22; KEY_SIZE]).unwrap();
        table.set_password(b"password").unwrap();

        let iterations = table
            .hint_seal(b"pass", enscrypt::DEFAULT_LOG_N_FACTOR, 20, &mut no_progress())
            .unwrap();
        let opened = table
            .hint_open(b"nope", enscrypt::DEFAULT_LOG_N_FACTOR, iterations, &mut no_progress())
            .unwrap();
        assert!(!opened);
        assert_eq!(table.read_key(KeyKind::Mk).unwrap().as_bytes(), &[0u8; KEY_SIZE]);
    }
}
