//! Projection between the key table and the identity container.
//!
//! Loading decrypts blocks 1–3 into key slots, asking the broker for the
//! password or rescue code when they are not in memory. Saving is the
//! inverse: changed material is re-sealed under freshly derived keys and
//! put back into the container.

use zeroize::Zeroizing;

use crate::crypt::aead;
use crate::crypt::derive::RESCUE_CODE_LENGTH;
use crate::crypt::enscrypt::{
    self, EnscryptMode, DEFAULT_LOG_N_FACTOR, MILLIS_PER_SECOND, SALT_SIZE,
};
use crate::crypt::ProgressScaler;
use crate::platform::CredentialKind;
use crate::secure::{KeyKind, KEY_SIZE};
use crate::storage::format::{BLOCK_TYPE_PASSWORD, BLOCK_TYPE_PREVIOUS, BLOCK_TYPE_RESCUE};
use crate::storage::{PasswordBlock, PreviousBlock, RescueBlock, Storage};
use crate::{IdentityError, IdentityResult};

use super::{
    Action, User, UserOptions, UserState, USER_FLAG_T1_CHANGED, USER_FLAG_T2_CHANGED,
};

impl User {
    /// Drives the password workflow: decrypt block 1 into `MK` and `ILK`,
    /// then block 3 into the previous-IUK slots.
    ///
    /// With no password in memory, one is taken from the action's mailbox
    /// or requested from the broker. A failed authentication wipes the
    /// stored password so the next cycle re-requests it.
    pub(crate) fn try_load_password(&self, action: &Action) -> bool {
        if !action.is_for(self) {
            return false;
        }
        let mut state = self.lock_state();
        if state.released {
            return false;
        }

        let Some(record) = state
            .storage
            .as_mut()
            .and_then(|storage| storage.get_mut(BLOCK_TYPE_PASSWORD))
            .and_then(|block| PasswordBlock::from_block(block).ok())
        else {
            return false;
        };

        if Self::ensure_keys(&mut state).is_err() {
            return false;
        }
        let password_missing = state
            .keys
            .as_ref()
            .is_none_or(|keys| keys.password_len() == 0);
        if password_missing {
            if let Some(password) = action.take_credential(CredentialKind::Password) {
                let Some(keys) = state.keys.as_mut() else {
                    return false;
                };
                if keys.set_password(&password).is_err() {
                    return false;
                }
            } else {
                drop(state);
                action.request_credential(CredentialKind::Password);
                return false;
            }
        }
        let Some(keys) = state.keys.as_mut() else {
            return false;
        };
        let password = keys.read_password();

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let scaler = ProgressScaler::identity();
        let derived = enscrypt::enscrypt(
            &mut key,
            &password,
            &record.salt,
            record.log_n_factor,
            EnscryptMode::Iterations(record.iteration_count),
            &mut |percent| action.report_progress(scaler, percent),
        );
        if derived.is_err() {
            return false;
        }

        let mut plaintext = Zeroizing::new(record.ciphertext);
        let opened = aead::open_in_place(
            &key,
            &record.iv,
            &record.associated_data(),
            plaintext.as_mut_slice(),
            &record.tag,
        );
        if opened.is_err() {
            let _ = keys.set_password(&[]);
            return false;
        }

        let Ok(mk) = <[u8; KEY_SIZE]>::try_from(&plaintext[..KEY_SIZE]) else {
            return false;
        };
        let mk = Zeroizing::new(mk);
        let Ok(ilk) = <[u8; KEY_SIZE]>::try_from(&plaintext[KEY_SIZE..]) else {
            return false;
        };
        let ilk = Zeroizing::new(ilk);
        if keys.write_key(KeyKind::Mk, &mk).is_err()
            || keys.write_key(KeyKind::Ilk, &ilk).is_err()
        {
            return false;
        }

        state.options = UserOptions {
            flags: record.option_flags,
            hint_length: record.hint_length,
            enscrypt_seconds: record.enscrypt_seconds,
            timeout_minutes: record.timeout_minutes,
        };

        Self::load_previous(&mut state, &mk);
        true
    }

    fn load_previous(state: &mut UserState, mk: &[u8; KEY_SIZE]) {
        let Some(record) = state
            .storage
            .as_mut()
            .and_then(|storage| storage.get_mut(BLOCK_TYPE_PREVIOUS))
            .and_then(|block| PreviousBlock::from_block(block).ok())
        else {
            return;
        };
        let mut plaintext = Zeroizing::new(record.ciphertext.clone());
        let iv = [0u8; aead::IV_SIZE];
        if aead::open_in_place(mk, &iv, &record.associated_data(), &mut plaintext, &record.tag)
            .is_err()
        {
            return;
        }
        let Some(keys) = state.keys.as_mut() else {
            return;
        };
        for (kind, chunk) in KeyKind::PREVIOUS
            .iter()
            .zip(plaintext.chunks_exact(KEY_SIZE))
        {
            if let Ok(piuk) = <[u8; KEY_SIZE]>::try_from(chunk) {
                let piuk = Zeroizing::new(piuk);
                let _ = keys.write_key(*kind, &piuk);
            }
        }
    }

    /// Drives the rescue workflow: decrypt block 2 into the `IUK`.
    ///
    /// With no rescue code in memory, one is taken from the action's
    /// mailbox or requested from the broker.
    pub(crate) fn try_load_rescue(&self, action: &Action) -> bool {
        if !action.is_for(self) {
            return false;
        }
        let mut state = self.lock_state();
        if state.released {
            return false;
        }

        let Some(record) = state
            .storage
            .as_mut()
            .and_then(|storage| storage.get_mut(BLOCK_TYPE_RESCUE))
            .and_then(|block| RescueBlock::from_block(block).ok())
        else {
            return false;
        };

        if Self::ensure_keys(&mut state).is_err() {
            return false;
        }
        let rescue_missing = state
            .keys
            .as_ref()
            .is_none_or(|keys| !keys.has_key(KeyKind::RescueCode));
        if rescue_missing {
            if let Some(code) = action.take_credential(CredentialKind::RescueCode) {
                if !Self::store_rescue_code(&mut state, &code) {
                    return false;
                }
            } else {
                drop(state);
                action.request_credential(CredentialKind::RescueCode);
                return false;
            }
        }
        let Some(keys) = state.keys.as_mut() else {
            return false;
        };
        let Some(material) = keys.read_key(KeyKind::RescueCode) else {
            return false;
        };
        let rescue = Zeroizing::new(material.as_bytes()[..RESCUE_CODE_LENGTH].to_vec());

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        let scaler = ProgressScaler::identity();
        let derived = enscrypt::enscrypt(
            &mut key,
            &rescue,
            &record.salt,
            record.log_n_factor,
            EnscryptMode::Iterations(record.iteration_count),
            &mut |percent| action.report_progress(scaler, percent),
        );
        if derived.is_err() {
            return false;
        }

        let mut plaintext = Zeroizing::new(record.ciphertext);
        let iv = [0u8; aead::IV_SIZE];
        let opened = aead::open_in_place(
            &key,
            &iv,
            &record.associated_data(),
            plaintext.as_mut_slice(),
            &record.tag,
        );
        if opened.is_err() {
            return false;
        }
        keys.write_key(KeyKind::Iuk, &plaintext).is_ok()
    }

    /// Re-seals changed key material into the container.
    ///
    /// Block 1 (and block 3 under `MK`) is rewritten when marked changed or
    /// absent, provided `MK`, `ILK` and a password are in memory; block 2
    /// likewise when `IUK` and the rescue code are present. The unique id
    /// is refreshed from the resulting container.
    ///
    /// # Errors
    ///
    /// Propagates derivation aborts and sealing failures; partially built
    /// plaintext is zeroed on those paths.
    pub(crate) fn update_storage(&self, action: &Action) -> IdentityResult<()> {
        if !action.is_for(self) {
            return Err(IdentityError::invalid_input(
                "action",
                "bound to a different user",
            ));
        }
        let mut state = self.lock_state();
        if state.released {
            return Err(IdentityError::invalid_input("user", "already released"));
        }
        if state.storage.is_none() {
            state.storage = Some(Storage::new());
        }

        let UserState {
            keys,
            storage,
            flags,
            options,
            unique_id,
            ..
        } = &mut *state;
        let Some(storage) = storage.as_mut() else {
            return Err(IdentityError::allocation("container missing"));
        };
        let options = *options;
        let millis = u32::from(options.enscrypt_seconds) * MILLIS_PER_SECOND;

        if let Some(keys) = keys.as_mut() {
            let t1_needed =
                *flags & USER_FLAG_T1_CHANGED != 0 || !storage.has(BLOCK_TYPE_PASSWORD);
            let t2_needed =
                *flags & USER_FLAG_T2_CHANGED != 0 || !storage.has(BLOCK_TYPE_RESCUE);

            // Plan the derivation steps so progress spans them evenly.
            let t1_planned = t1_needed
                && keys.password_len() > 0
                && keys.has_key(KeyKind::Mk)
                && keys.has_key(KeyKind::Ilk);
            let t2_planned = t2_needed
                && keys.has_key(KeyKind::Iuk)
                && keys.has_key(KeyKind::RescueCode);
            let steps = i32::from(t1_planned) + i32::from(t2_planned);
            let share = if steps > 0 { 100 / steps } else { 100 };
            let t1_scaler = ProgressScaler::new(0, f64::from(share) / 100.0);
            let t2_scaler = ProgressScaler::new(
                if t1_planned { share } else { 0 },
                f64::from(share) / 100.0,
            );

            if t1_planned {
                if let (Some(mk), Some(ilk)) =
                    (keys.read_key(KeyKind::Mk), keys.read_key(KeyKind::Ilk))
                {
                    let password = keys.read_password();
                    let mut salt = [0u8; SALT_SIZE];
                    getrandom::getrandom(&mut salt).expect("getrandom failed");
                    let mut iv = [0u8; aead::IV_SIZE];
                    getrandom::getrandom(&mut iv).expect("getrandom failed");

                    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
                    let iterations = enscrypt::enscrypt(
                        &mut key,
                        &password,
                        &salt,
                        DEFAULT_LOG_N_FACTOR,
                        EnscryptMode::Millis(millis),
                        &mut |percent| action.report_progress(t1_scaler, percent),
                    )?;

                    let mut record = PasswordBlock {
                        iv,
                        salt,
                        log_n_factor: DEFAULT_LOG_N_FACTOR,
                        iteration_count: iterations,
                        option_flags: options.flags,
                        hint_length: options.hint_length,
                        enscrypt_seconds: options.enscrypt_seconds,
                        timeout_minutes: options.timeout_minutes,
                        ciphertext: [0u8; PasswordBlock::CIPHERTEXT_LEN],
                        tag: [0u8; aead::TAG_SIZE],
                    };
                    record.ciphertext[..KEY_SIZE].copy_from_slice(mk.as_bytes());
                    record.ciphertext[KEY_SIZE..].copy_from_slice(ilk.as_bytes());
                    let aad = record.associated_data();
                    match aead::seal_in_place(&key, &record.iv, &aad, &mut record.ciphertext) {
                        Ok(tag) => record.tag = tag,
                        Err(err) => {
                            record.ciphertext.fill(0);
                            return Err(err);
                        }
                    }
                    storage.put(record.to_block()?);
                    *flags &= !USER_FLAG_T1_CHANGED;

                    Self::write_previous(keys, storage, &mk)?;
                }
            }

            if t2_planned {
                if let (Some(iuk), Some(rescue)) = (
                    keys.read_key(KeyKind::Iuk),
                    keys.read_key(KeyKind::RescueCode),
                ) {
                    let digits =
                        Zeroizing::new(rescue.as_bytes()[..RESCUE_CODE_LENGTH].to_vec());
                    let mut salt = [0u8; SALT_SIZE];
                    getrandom::getrandom(&mut salt).expect("getrandom failed");

                    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
                    let iterations = enscrypt::enscrypt(
                        &mut key,
                        &digits,
                        &salt,
                        DEFAULT_LOG_N_FACTOR,
                        EnscryptMode::Millis(millis),
                        &mut |percent| action.report_progress(t2_scaler, percent),
                    )?;

                    let mut record = RescueBlock {
                        salt,
                        log_n_factor: DEFAULT_LOG_N_FACTOR,
                        iteration_count: iterations,
                        ciphertext: *iuk.as_bytes(),
                        tag: [0u8; aead::TAG_SIZE],
                    };
                    let aad = record.associated_data();
                    let iv = [0u8; aead::IV_SIZE];
                    match aead::seal_in_place(&key, &iv, &aad, &mut record.ciphertext) {
                        Ok(tag) => record.tag = tag,
                        Err(err) => {
                            record.ciphertext.fill(0);
                            return Err(err);
                        }
                    }
                    storage.put(record.to_block()?);
                    *flags &= !USER_FLAG_T2_CHANGED;
                }
            }
        }

        *unique_id = storage.unique_id()?;
        Ok(())
    }

    fn write_previous(
        keys: &mut crate::secure::KeyTable,
        storage: &mut Storage,
        mk: &crate::secure::KeyMaterial,
    ) -> IdentityResult<()> {
        let mut plaintext = Zeroizing::new(Vec::new());
        for kind in KeyKind::PREVIOUS {
            match keys.read_key(kind) {
                Some(material) => plaintext.extend_from_slice(material.as_bytes()),
                None => break,
            }
        }
        if plaintext.is_empty() {
            return Ok(());
        }

        let mut record = PreviousBlock {
            ciphertext: plaintext.to_vec(),
            tag: [0u8; aead::TAG_SIZE],
        };
        let aad = record.associated_data();
        let iv = [0u8; aead::IV_SIZE];
        match aead::seal_in_place(mk.as_bytes(), &iv, &aad, &mut record.ciphertext) {
            Ok(tag) => record.tag = tag,
            Err(err) => {
                record.ciphertext.fill(0);
                return Err(err);
            }
        }
        storage.put(record.to_block()?);
        Ok(())
    }
}
