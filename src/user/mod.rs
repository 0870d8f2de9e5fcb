//! Identity users: key ownership, credential workflows, lifetime.
//!
//! A [`User`] owns a protected key table and the parsed container it came
//! from. Keys are populated lazily: a lookup that misses drives the
//! password or rescue-code workflow, asking the embedder for credentials
//! through the action's broker. Users live in a [`UserRegistry`] and are
//! reference-counted through `hold`/`release`.

mod action;
mod options;
mod persist;
mod registry;

pub use action::Action;
pub use options::{
    UserOptions, DEFAULT_ENSCRYPT_SECONDS, DEFAULT_FLAGS, DEFAULT_HINT_LENGTH,
    DEFAULT_TIMEOUT_MINUTES, OPTION_ASK_FOR_IDENTITY, OPTION_CHECK_FOR_UPDATES,
    OPTION_CLEAR_HINT_IDLE, OPTION_CLEAR_HINT_SUSPEND, OPTION_CLEAR_HINT_USER_SWITCH,
    OPTION_REQUEST_NO_SFN, OPTION_REQUEST_SQRL_ONLY, OPTION_WARN_MITM,
};
pub use registry::UserRegistry;

pub use crate::secure::{KeyKind, KeyMaterial};

use std::sync::{Mutex, MutexGuard, PoisonError};

use zeroize::Zeroizing;

use crate::buffer::SqrlBuffer;
use crate::crypt::derive::{self, RESCUE_CODE_LENGTH, RESCUE_ENTROPY_BYTES};
use crate::crypt::enscrypt::{DEFAULT_LOG_N_FACTOR, MILLIS_PER_SECOND};
use crate::crypt::ProgressScaler;
use crate::platform::{CredentialKind, StorageAdapter};
use crate::secure::{KeyTable, SecretRegion, KEY_SIZE};
use crate::storage::{Storage, StorageEncoding, StorageExport};
use crate::{IdentityError, IdentityResult};

/// The key table region is in the no-access state.
pub const USER_FLAG_MEMLOCKED: u8 = 0x01;

/// The password-protected block must be rewritten on save.
pub const USER_FLAG_T1_CHANGED: u8 = 0x02;

/// The rescue block must be rewritten on save.
pub const USER_FLAG_T2_CHANGED: u8 = 0x04;

/// How many load cycles a key lookup tolerates before failing hard.
const KEY_LOAD_CYCLES: usize = 3;

/// Locked scratch size used while generating a rescue code.
const RESCUE_SCRATCH_LEN: usize = 512;

pub(crate) struct UserState {
    pub(crate) keys: Option<KeyTable>,
    pub(crate) hint_iterations: u32,
    pub(crate) options: UserOptions,
    pub(crate) flags: u8,
    pub(crate) unique_id: String,
    pub(crate) storage: Option<Storage>,
    pub(crate) released: bool,
}

/// A reference-counted identity.
///
/// All methods serialize on an interior state mutex; the reference count
/// has its own mutex, taken by the registry's `hold`/`release` discipline.
/// Methods called with an [`Action`] bound to a different user, or on a
/// released user, are silent no-ops.
pub struct User {
    state: Mutex<UserState>,
    pub(crate) ref_count: Mutex<u32>,
}

impl User {
    pub(crate) fn empty() -> Self {
        Self {
            state: Mutex::new(UserState {
                keys: None,
                hint_iterations: 0,
                options: UserOptions::default(),
                flags: 0,
                unique_id: String::new(),
                storage: None,
                released: false,
            }),
            ref_count: Mutex::new(1),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, UserState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_keys(state: &mut UserState) -> IdentityResult<&mut KeyTable> {
        if state.keys.is_none() {
            state.keys = Some(KeyTable::new()?);
            state.flags &= !USER_FLAG_MEMLOCKED;
        }
        state
            .keys
            .as_mut()
            .ok_or_else(|| IdentityError::allocation("key table missing"))
    }

    pub(crate) fn destroy(&self) {
        let mut state = self.lock_state();
        if let Some(mut keys) = state.keys.take() {
            keys.wipe();
        }
        state.storage = None;
        state.unique_id.clear();
        state.hint_iterations = 0;
        state.released = true;
    }

    // ------------------------------------------------------------------
    // Container binding
    // ------------------------------------------------------------------

    /// Parses a serialized container into this user.
    ///
    /// # Errors
    ///
    /// Propagates parse failures; the user keeps its prior storage then.
    pub fn load(&self, bytes: &[u8]) -> IdentityResult<()> {
        let storage = Storage::from_bytes(bytes)?;
        let unique_id = storage.unique_id()?;
        let mut state = self.lock_state();
        if state.released {
            return Err(IdentityError::invalid_input("user", "already released"));
        }
        state.storage = Some(storage);
        state.unique_id = unique_id;
        Ok(())
    }

    /// Fetches and parses a container through the storage adapter.
    ///
    /// # Errors
    ///
    /// Propagates adapter and parse failures.
    pub fn load_uri(&self, adapter: &dyn StorageAdapter, uri: &str) -> IdentityResult<()> {
        let bytes = adapter.load(uri)?;
        self.load(&bytes)
    }

    /// Projects the current keys into storage blocks and serializes.
    ///
    /// # Errors
    ///
    /// Propagates derivation, sealing and serialization failures.
    pub fn save(
        &self,
        action: &Action,
        export: StorageExport,
        encoding: StorageEncoding,
    ) -> IdentityResult<SqrlBuffer> {
        self.update_storage(action)?;
        let state = self.lock_state();
        let storage = state
            .storage
            .as_ref()
            .ok_or_else(|| IdentityError::invalid_input("storage", "no container to save"))?;
        storage.save(export, encoding)
    }

    /// Saves the container through the storage adapter.
    ///
    /// # Errors
    ///
    /// Propagates save and adapter failures.
    pub fn save_uri(
        &self,
        action: &Action,
        adapter: &dyn StorageAdapter,
        uri: &str,
        export: StorageExport,
        encoding: StorageEncoding,
    ) -> IdentityResult<()> {
        let buffer = self.save(action, export, encoding)?;
        adapter.save(uri, buffer.as_bytes())
    }

    /// Returns the user's 43-character unique id, or the empty string.
    #[must_use]
    pub fn unique_id(&self) -> String {
        self.lock_state().unique_id.clone()
    }

    /// Compares the unique id; `None` matches a user without one.
    #[must_use]
    pub fn unique_id_matches(&self, unique_id: Option<&str>) -> bool {
        let state = self.lock_state();
        match unique_id {
            None => state.unique_id.is_empty(),
            Some(id) => state.unique_id == id,
        }
    }

    // ------------------------------------------------------------------
    // Memory protection
    // ------------------------------------------------------------------

    /// Returns `true` while the key region is in the no-access state.
    #[must_use]
    pub fn is_mem_locked(&self) -> bool {
        self.lock_state().flags & USER_FLAG_MEMLOCKED != 0
    }

    /// Transitions the key region to no-access.
    pub fn mem_lock(&self) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        if let Some(keys) = state.keys.as_mut() {
            keys.protect();
        }
        state.flags |= USER_FLAG_MEMLOCKED;
    }

    /// Transitions the key region back to read-write.
    pub fn mem_unlock(&self) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        if let Some(keys) = state.keys.as_mut() {
            keys.unprotect();
        }
        state.flags &= !USER_FLAG_MEMLOCKED;
    }

    // ------------------------------------------------------------------
    // Hint lock
    // ------------------------------------------------------------------

    /// Returns `true` while the primary keys are sealed under a hint.
    #[must_use]
    pub fn is_hint_locked(&self) -> bool {
        self.lock_state().hint_iterations > 0
    }

    /// Seals the key table under the leading characters of the password.
    ///
    /// A no-op returning `false` when already hint-locked, when no password
    /// is set, or when the action is bound to another user.
    pub fn hint_lock(&self, action: &Action) -> bool {
        if !action.is_for(self) {
            return false;
        }
        let mut state = self.lock_state();
        if state.released || state.hint_iterations > 0 {
            return false;
        }
        let hint_length = state.options.hint_length;
        let millis = u32::from(state.options.enscrypt_seconds) * MILLIS_PER_SECOND;
        let Some(keys) = state.keys.as_mut() else {
            return false;
        };
        if keys.password_len() == 0 {
            return false;
        }
        let hint = keys.read_password_hint(hint_length);
        let scaler = ProgressScaler::identity();
        let sealed = keys.hint_seal(&hint, DEFAULT_LOG_N_FACTOR, millis, &mut |percent| {
            action.report_progress(scaler, percent)
        });
        match sealed {
            Ok(iterations) => {
                state.hint_iterations = iterations;
                true
            }
            Err(_) => {
                state.hint_iterations = 0;
                false
            }
        }
    }

    /// Unseals the key table with a hint.
    ///
    /// With no hint available, a HINT credential request is emitted and the
    /// table stays sealed. Otherwise the hint iteration count is always
    /// cleared and scratch wiped, success or failure; a wrong hint leaves
    /// the key slots zeroed.
    pub fn hint_unlock(&self, action: &Action, hint: Option<&[u8]>) -> bool {
        let provided = action.take_credential(CredentialKind::Hint);
        let hint = match hint {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => match provided.as_ref().map(|bytes| bytes.as_slice()) {
                Some(bytes) if !bytes.is_empty() => bytes,
                _ => {
                    action.request_credential(CredentialKind::Hint);
                    return false;
                }
            },
        };
        if !action.is_for(self) {
            return false;
        }
        let mut state = self.lock_state();
        if state.released || state.hint_iterations == 0 {
            return false;
        }
        let iterations = state.hint_iterations;
        state.hint_iterations = 0;
        let Some(keys) = state.keys.as_mut() else {
            return false;
        };
        let scaler = ProgressScaler::identity();
        let opened = keys.hint_open(hint, DEFAULT_LOG_N_FACTOR, iterations, &mut |percent| {
            action.report_progress(scaler, percent)
        });
        opened.unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Password
    // ------------------------------------------------------------------

    /// Stores the password, truncating to the maximum length.
    ///
    /// Refused while hint-locked. Replacing an existing password marks the
    /// password block for rewrite.
    pub fn set_password(&self, password: &[u8]) -> bool {
        let mut state = self.lock_state();
        if state.released || state.hint_iterations > 0 {
            return false;
        }
        let Ok(keys) = Self::ensure_keys(&mut state) else {
            return false;
        };
        match keys.set_password(password) {
            Ok(had_password) => {
                if had_password {
                    state.flags |= USER_FLAG_T1_CHANGED;
                }
                true
            }
            Err(_) => false,
        }
    }

    /// Returns the password length, or 0 while hint-locked.
    #[must_use]
    pub fn password_len(&self) -> usize {
        let state = self.lock_state();
        if state.hint_iterations > 0 {
            return 0;
        }
        state.keys.as_ref().map_or(0, KeyTable::password_len)
    }

    // ------------------------------------------------------------------
    // Options
    // ------------------------------------------------------------------

    /// Returns the hint length option.
    #[must_use]
    pub fn hint_length(&self) -> u8 {
        self.lock_state().options.hint_length
    }

    /// Returns the enscrypt seconds option.
    #[must_use]
    pub fn enscrypt_seconds(&self) -> u8 {
        self.lock_state().options.enscrypt_seconds
    }

    /// Returns the idle timeout option in minutes.
    #[must_use]
    pub fn timeout_minutes(&self) -> u16 {
        self.lock_state().options.timeout_minutes
    }

    /// Sets the hint length and marks the password block for rewrite.
    pub fn set_hint_length(&self, length: u8) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        state.options.hint_length = length;
        state.flags |= USER_FLAG_T1_CHANGED;
    }

    /// Sets the enscrypt seconds and marks the password block for rewrite.
    pub fn set_enscrypt_seconds(&self, seconds: u8) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        state.options.enscrypt_seconds = seconds;
        state.flags |= USER_FLAG_T1_CHANGED;
    }

    /// Sets the idle timeout and marks the password block for rewrite.
    pub fn set_timeout_minutes(&self, minutes: u16) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        state.options.timeout_minutes = minutes;
        state.flags |= USER_FLAG_T1_CHANGED;
    }

    /// Returns the option flags masked by `flags`.
    #[must_use]
    pub fn check_flags(&self, flags: u16) -> u16 {
        self.lock_state().options.flags & flags
    }

    /// Sets option flags, marking the password block for rewrite when the
    /// set actually changes them.
    pub fn set_flags(&self, flags: u16) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        if state.options.flags & flags != flags {
            state.options.flags |= flags;
            state.flags |= USER_FLAG_T1_CHANGED;
        }
    }

    /// Clears option flags, marking the password block for rewrite when the
    /// clear actually changes them.
    pub fn clear_flags(&self, flags: u16) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        if state.options.flags & flags != 0 {
            state.options.flags &= !flags;
            state.flags |= USER_FLAG_T1_CHANGED;
        }
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    /// Returns `true` if a slot is populated for `kind`.
    #[must_use]
    pub fn has_key(&self, kind: KeyKind) -> bool {
        let state = self.lock_state();
        state.keys.as_ref().is_some_and(|keys| keys.has_key(kind))
    }

    /// Zeroes and frees the slot for `kind`.
    pub fn remove_key(&self, kind: KeyKind) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        if let Some(keys) = state.keys.as_mut() {
            keys.remove_key(kind);
        }
    }

    fn read_slot(&self, kind: KeyKind) -> Option<KeyMaterial> {
        let mut state = self.lock_state();
        if state.released {
            return None;
        }
        state.keys.as_mut()?.read_key(kind)
    }

    /// Fetches the key for `kind`, loading it from storage if absent.
    ///
    /// A miss drives the rescue-code workflow for the IUK and the password
    /// workflow for derived keys, emitting credential requests through the
    /// action's broker. Up to three load cycles are attempted; a rescue
    /// code can never be recovered.
    #[must_use]
    pub fn key(&self, action: &Action, kind: KeyKind) -> Option<KeyMaterial> {
        if !action.is_for(self) {
            return None;
        }
        if let Some(material) = self.read_slot(kind) {
            return Some(material);
        }
        for _ in 0..KEY_LOAD_CYCLES {
            match kind {
                KeyKind::RescueCode => return None,
                KeyKind::Iuk => {
                    self.try_load_rescue(action);
                }
                _ => {
                    self.try_load_password(action);
                }
            }
            if let Some(material) = self.read_slot(kind) {
                return Some(material);
            }
        }
        None
    }

    /// Ensures the Master Key is loaded, driving the password workflow.
    pub fn force_decrypt(&self, action: &Action) -> bool {
        self.key(action, KeyKind::Mk).is_some()
    }

    /// Ensures the IUK is loaded, driving the rescue-code workflow.
    pub fn force_rescue(&self, action: &Action) -> bool {
        self.key(action, KeyKind::Iuk).is_some()
    }

    // ------------------------------------------------------------------
    // Rescue code
    // ------------------------------------------------------------------

    /// Returns the rescue code, available only after re-keying or
    /// [`set_rescue_code`](Self::set_rescue_code).
    #[must_use]
    pub fn rescue_code(&self, action: &Action) -> Option<String> {
        if !action.is_for(self) {
            return None;
        }
        let material = self.read_slot(KeyKind::RescueCode)?;
        let digits = &material.as_bytes()[..RESCUE_CODE_LENGTH];
        if !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        String::from_utf8(digits.to_vec()).ok()
    }

    /// Stores a rescue code for identity recovery.
    ///
    /// Accepts exactly 24 decimal digits.
    pub fn set_rescue_code(&self, rescue_code: &str) -> bool {
        let mut state = self.lock_state();
        if state.released {
            return false;
        }
        Self::store_rescue_code(&mut state, rescue_code.as_bytes())
    }

    pub(crate) fn store_rescue_code(state: &mut UserState, digits: &[u8]) -> bool {
        if digits.len() != RESCUE_CODE_LENGTH || !digits.iter().all(u8::is_ascii_digit) {
            return false;
        }
        let Ok(keys) = Self::ensure_keys(state) else {
            return false;
        };
        let mut slot = Zeroizing::new([0u8; KEY_SIZE]);
        slot[..RESCUE_CODE_LENGTH].copy_from_slice(digits);
        keys.write_key(KeyKind::RescueCode, &slot).is_ok()
    }

    // ------------------------------------------------------------------
    // Key generation
    // ------------------------------------------------------------------

    /// Generates the key for `kind`, dispatching on the derivation chain.
    ///
    /// Generating a fresh IUK rotates the previous IUKs down one slot
    /// first, dropping the oldest.
    pub fn key_gen(&self, action: &Action, kind: KeyKind) -> bool {
        if !action.is_for(self) {
            return false;
        }
        match kind {
            KeyKind::Iuk => self.generate_iuk(),
            KeyKind::Mk => self.generate_derived(action, KeyKind::Iuk, kind, |source| {
                derive::generate_master_key(source)
            }),
            KeyKind::Ilk => self.generate_derived(action, KeyKind::Iuk, kind, |source| {
                derive::generate_identity_lock_key(source)
            }),
            KeyKind::Local => self.generate_derived(action, KeyKind::Mk, kind, |source| {
                derive::generate_local_key(source)
            }),
            KeyKind::RescueCode => self.generate_rescue_code(),
            KeyKind::Piuk0 | KeyKind::Piuk1 | KeyKind::Piuk2 | KeyKind::Piuk3 => false,
        }
    }

    fn generate_iuk(&self) -> bool {
        let mut state = self.lock_state();
        if state.released {
            return false;
        }
        let Ok(keys) = Self::ensure_keys(&mut state) else {
            return false;
        };

        let zeros = Zeroizing::new([0u8; KEY_SIZE]);
        let shifted: Vec<Zeroizing<[u8; KEY_SIZE]>> = [
            keys.read_key(KeyKind::Piuk2),
            keys.read_key(KeyKind::Piuk1),
            keys.read_key(KeyKind::Piuk0),
            keys.read_key(KeyKind::Iuk),
        ]
        .into_iter()
        .map(|material| {
            material.map_or_else(|| zeros.clone(), |m| Zeroizing::new(*m.as_bytes()))
        })
        .collect();

        let targets = [KeyKind::Piuk3, KeyKind::Piuk2, KeyKind::Piuk1, KeyKind::Piuk0];
        for (target, value) in targets.iter().zip(shifted.iter()) {
            if keys.write_key(*target, value).is_err() {
                return false;
            }
        }

        let mut fresh = Zeroizing::new([0u8; KEY_SIZE]);
        getrandom::getrandom(fresh.as_mut_slice()).expect("getrandom failed");
        keys.write_key(KeyKind::Iuk, &fresh).is_ok()
    }

    fn generate_derived(
        &self,
        action: &Action,
        source: KeyKind,
        target: KeyKind,
        derivation: impl Fn(&[u8; KEY_SIZE]) -> [u8; KEY_SIZE],
    ) -> bool {
        let Some(material) = self.key(action, source) else {
            return false;
        };
        let derived = Zeroizing::new(derivation(material.as_bytes()));
        let mut state = self.lock_state();
        if state.released {
            return false;
        }
        let Ok(keys) = Self::ensure_keys(&mut state) else {
            return false;
        };
        keys.write_key(target, &derived).is_ok()
    }

    fn generate_rescue_code(&self) -> bool {
        let mut state = self.lock_state();
        if state.released {
            return false;
        }
        let Ok(mut scratch) = SecretRegion::new(RESCUE_SCRATCH_LEN) else {
            return false;
        };
        let Ok(buf) = scratch.write() else {
            return false;
        };
        getrandom::getrandom(&mut buf[..RESCUE_ENTROPY_BYTES]).expect("getrandom failed");
        let Ok(entropy) = <&[u8; RESCUE_ENTROPY_BYTES]>::try_from(&buf[..RESCUE_ENTROPY_BYTES])
        else {
            return false;
        };
        let digits = Zeroizing::new(derive::bin2rc(entropy));
        Self::store_rescue_code(&mut state, digits.as_slice())
    }

    /// Regenerates MK, ILK and LOCAL from the current IUK.
    pub fn regen_keys(&self, action: &Action) -> bool {
        if !action.is_for(self) {
            return false;
        }
        [KeyKind::Mk, KeyKind::Ilk, KeyKind::Local]
            .into_iter()
            .all(|kind| self.key_gen(action, kind))
    }

    /// Performs the full identity rotation.
    ///
    /// Generates a fresh IUK (rotating prior IUKs down), a fresh rescue
    /// code, and regenerates the derived keys; both identity blocks are
    /// marked for rewrite. Any sub-step failure aborts the remainder.
    pub fn rekey(&self, action: &Action) -> bool {
        if !action.is_for(self) {
            return false;
        }
        {
            let mut state = self.lock_state();
            if state.released || Self::ensure_keys(&mut state).is_err() {
                return false;
            }
        }
        if !self.key_gen(action, KeyKind::Iuk) {
            return false;
        }
        if !self.key_gen(action, KeyKind::RescueCode) {
            return false;
        }
        if !self.regen_keys(action) {
            return false;
        }
        let mut state = self.lock_state();
        state.flags |= USER_FLAG_T1_CHANGED | USER_FLAG_T2_CHANGED;
        true
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("User")
            .field("unique_id", &state.unique_id)
            .field("hint_locked", &(state.hint_iterations > 0))
            .field("released", &state.released)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::platform::MemoryCredentialBroker;

    fn user_with_action() -> (UserRegistry, Arc<User>, Action) {
        let registry = UserRegistry::new();
        let user = registry.create();
        let action = Action::new(Arc::clone(&user), Arc::new(MemoryCredentialBroker::new()));
        (registry, user, action)
    }

    #[test]
    fn test_rekey_populates_full_chain() {
        let (registry, user, action) = user_with_action();
        assert!(user.rekey(&action));
        for kind in [
            KeyKind::Iuk,
            KeyKind::Mk,
            KeyKind::Ilk,
            KeyKind::Local,
            KeyKind::RescueCode,
            KeyKind::Piuk0,
        ] {
            assert!(user.has_key(kind), "missing {kind:?}");
        }
        registry.release(&user);
    }

    #[test]
    fn test_rekey_rotates_previous_iuks() {
        let (registry, user, action) = user_with_action();
        assert!(user.rekey(&action));
        let first_iuk = user.key(&action, KeyKind::Iuk).unwrap();

        assert!(user.rekey(&action));
        let piuk0 = user.key(&action, KeyKind::Piuk0).unwrap();
        assert_eq!(piuk0.as_bytes(), first_iuk.as_bytes());

        let second_iuk = user.key(&action, KeyKind::Iuk).unwrap();
        assert_ne!(second_iuk.as_bytes(), first_iuk.as_bytes());

        assert!(user.rekey(&action));
        let piuk1 = user.key(&action, KeyKind::Piuk1).unwrap();
        assert_eq!(piuk1.as_bytes(), first_iuk.as_bytes());
        let piuk0 = user.key(&action, KeyKind::Piuk0).unwrap();
        assert_eq!(piuk0.as_bytes(), second_iuk.as_bytes());
        registry.release(&user);
    }

    #[test]
    fn test_derivation_chain_consistency() {
        let (registry, user, action) = user_with_action();
        assert!(user.rekey(&action));
        let iuk = user.key(&action, KeyKind::Iuk).unwrap();
        let mk = user.key(&action, KeyKind::Mk).unwrap();
        assert_eq!(mk.as_bytes(), &derive::generate_master_key(iuk.as_bytes()));
        let ilk = user.key(&action, KeyKind::Ilk).unwrap();
        assert_eq!(
            ilk.as_bytes(),
            &derive::generate_identity_lock_key(iuk.as_bytes())
        );
        registry.release(&user);
    }

    #[test]
    fn test_rescue_code_shape() {
        let (registry, user, action) = user_with_action();
        assert!(user.rekey(&action));
        let code = user.rescue_code(&action).unwrap();
        assert_eq!(code.len(), RESCUE_CODE_LENGTH);
        assert!(code.bytes().all(|b| b.is_ascii_digit()));
        registry.release(&user);
    }

    #[test]
    fn test_set_rescue_code_validation() {
        let (registry, user, action) = user_with_action();
        assert!(user.set_rescue_code("123456789012345678901234"));
        assert_eq!(
            user.rescue_code(&action).unwrap(),
            "123456789012345678901234"
        );

        assert!(!user.set_rescue_code("12345678901234567890123"));
        assert!(!user.set_rescue_code("1234567890123456789012345"));
        assert!(!user.set_rescue_code("12345678901234567890123x"));
        registry.release(&user);
    }

    #[test]
    fn test_rescue_code_is_unrecoverable() {
        let (registry, user, action) = user_with_action();
        assert!(user.key(&action, KeyKind::RescueCode).is_none());
        registry.release(&user);
    }

    #[test]
    fn test_password_and_flags() {
        let (registry, user, _action) = user_with_action();
        assert!(user.set_password(b"first password"));
        assert_eq!(user.password_len(), 14);
        assert_eq!(user.lock_state().flags & USER_FLAG_T1_CHANGED, 0);

        assert!(user.set_password(b"second password"));
        assert_ne!(user.lock_state().flags & USER_FLAG_T1_CHANGED, 0);
        registry.release(&user);
    }

    #[test]
    fn test_option_flag_plumbing() {
        let (registry, user, _action) = user_with_action();
        assert_eq!(user.check_flags(0xFFFF), DEFAULT_FLAGS);

        // Setting flags that are already set does not mark a rewrite.
        user.set_flags(OPTION_WARN_MITM);
        assert_eq!(user.lock_state().flags & USER_FLAG_T1_CHANGED, 0);

        user.set_flags(OPTION_REQUEST_SQRL_ONLY);
        assert_eq!(
            user.check_flags(OPTION_REQUEST_SQRL_ONLY),
            OPTION_REQUEST_SQRL_ONLY
        );
        assert_ne!(user.lock_state().flags & USER_FLAG_T1_CHANGED, 0);

        user.lock_state().flags = 0;
        user.clear_flags(OPTION_REQUEST_SQRL_ONLY);
        assert_eq!(user.check_flags(OPTION_REQUEST_SQRL_ONLY), 0);
        assert_ne!(user.lock_state().flags & USER_FLAG_T1_CHANGED, 0);

        // Clearing a flag that is not set is not a change.
        user.lock_state().flags = 0;
        user.clear_flags(OPTION_REQUEST_SQRL_ONLY);
        assert_eq!(user.lock_state().flags & USER_FLAG_T1_CHANGED, 0);
        registry.release(&user);
    }

    #[test]
    fn test_wrong_action_is_noop() {
        let registry = UserRegistry::new();
        let user = registry.create();
        let other = registry.create();
        let foreign = Action::new(Arc::clone(&other), Arc::new(MemoryCredentialBroker::new()));

        assert!(!user.rekey(&foreign));
        assert!(user.key(&foreign, KeyKind::Mk).is_none());
        assert!(user.rescue_code(&foreign).is_none());
        registry.release(&user);
        registry.release(&other);
    }

    #[test]
    fn test_released_user_is_noop() {
        let (registry, user, action) = user_with_action();
        registry.release(&user);
        assert!(!user.rekey(&action));
        assert!(!user.set_password(b"pw"));
        assert!(user.key(&action, KeyKind::Iuk).is_none());
    }

    #[test]
    fn test_mem_lock_round_trip() {
        let (registry, user, action) = user_with_action();
        assert!(user.rekey(&action));
        assert!(!user.is_mem_locked());

        user.mem_lock();
        assert!(user.is_mem_locked());

        // Key access opens the region under a scoped guard and restores it.
        assert!(user.key(&action, KeyKind::Mk).is_some());
        assert!(user.is_mem_locked());

        user.mem_unlock();
        assert!(!user.is_mem_locked());
        registry.release(&user);
    }
}
