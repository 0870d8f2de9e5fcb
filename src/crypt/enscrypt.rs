//! Enscrypt: iterated, XOR-chained scrypt.
//!
//! Each round runs scrypt (log-N 9, r 256, p 1) over the password, using the
//! previous round's raw output as the next round's salt, and XORs every
//! round's output into the result. The derivation runs either for a wall
//! clock target (encryption: "make this cost N seconds") or for a recorded
//! iteration count (decryption: "repeat exactly what encryption did").

use std::time::Instant;

use scrypt::Params;
use zeroize::Zeroizing;

use crate::{IdentityError, IdentityResult};

/// Default scrypt log-N factor used across identity blocks.
pub const DEFAULT_LOG_N_FACTOR: u8 = 9;

/// Size of the Enscrypt salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Milliseconds per second of configured Enscrypt time.
pub const MILLIS_PER_SECOND: u32 = 1000;

const SCRYPT_R: u32 = 256;
const SCRYPT_P: u32 = 1;
const OUT_LEN: usize = 32;

/// Bounds an Enscrypt run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnscryptMode {
    /// Iterate until at least this many milliseconds have elapsed.
    Millis(u32),
    /// Iterate exactly this many times.
    Iterations(u32),
}

/// Derives a 32-byte key from `password`, writing it to `out`.
///
/// `progress` is invoked with values in `0..=100` as the derivation
/// advances; returning `false` aborts it. Returns the number of iterations
/// performed, which a later [`EnscryptMode::Iterations`] run feeds back to
/// reproduce the key.
///
/// # Errors
///
/// Returns [`IdentityError::KeyDerivationFailed`] if scrypt rejects its
/// parameters and [`IdentityError::Aborted`] when the progress callback
/// cancels; `out` is zeroed on every error path.
pub fn enscrypt(
    out: &mut [u8; OUT_LEN],
    password: &[u8],
    salt: &[u8],
    log_n_factor: u8,
    mode: EnscryptMode,
    progress: &mut dyn FnMut(i32) -> bool,
) -> IdentityResult<u32> {
    let params = Params::new(log_n_factor, SCRYPT_R, SCRYPT_P, OUT_LEN)
        .map_err(|_| IdentityError::derivation("invalid scrypt parameters"))?;

    out.fill(0);
    let mut chain = Zeroizing::new([0u8; OUT_LEN]);
    let started = Instant::now();

    if !progress(0) {
        return Err(IdentityError::Aborted);
    }

    let mut iterations = 0u32;
    loop {
        let round_salt = if iterations == 0 { salt } else { chain.as_slice() };
        let round = scrypt_round(password, round_salt, &params);
        match round {
            Ok(output) => {
                *chain = *output;
                for (acc, byte) in out.iter_mut().zip(chain.iter()) {
                    *acc ^= byte;
                }
            }
            Err(err) => {
                out.fill(0);
                return Err(err);
            }
        }
        iterations += 1;

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_millis = started.elapsed().as_millis().min(u128::from(u32::MAX)) as u32;
        let (done, percent) = match mode {
            EnscryptMode::Iterations(count) => {
                let count = count.max(1);
                (iterations >= count, percent_of(iterations, count))
            }
            EnscryptMode::Millis(target) => {
                let done = elapsed_millis >= target;
                (done, percent_of(elapsed_millis, target.max(1)).min(99))
            }
        };
        let percent = if done { 100 } else { percent };
        if !progress(percent) {
            out.fill(0);
            return Err(IdentityError::Aborted);
        }
        if done {
            return Ok(iterations);
        }
    }
}

fn scrypt_round(
    password: &[u8],
    salt: &[u8],
    params: &Params,
) -> IdentityResult<Zeroizing<[u8; OUT_LEN]>> {
    let mut output = Zeroizing::new([0u8; OUT_LEN]);
    scrypt::scrypt(password, salt, params, output.as_mut_slice())
        .map_err(|_| IdentityError::derivation("scrypt output length invalid"))?;
    Ok(output)
}

#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn percent_of(numerator: u32, denominator: u32) -> i32 {
    let ratio = u64::from(numerator) * 100 / u64::from(denominator);
    ratio.min(100) as i32
}

/// Maps a primitive's per-step 0–100 progress into overall progress.
///
/// Multi-step flows hand each step a scaler with an offset and a share of
/// the total; the result is clamped to `0..=100`, and a step that reports
/// 100 while the overall value is already at 99 pins the result to exactly
/// 100 so the bar always completes.
#[derive(Debug, Clone, Copy)]
pub struct ProgressScaler {
    adder: i32,
    multiplier: f64,
}

impl ProgressScaler {
    /// Creates a scaler with the given offset and share.
    #[must_use]
    pub const fn new(adder: i32, multiplier: f64) -> Self {
        Self { adder, multiplier }
    }

    /// The identity scaler for single-step flows.
    #[must_use]
    pub const fn identity() -> Self {
        Self::new(0, 1.0)
    }

    /// Scales a per-step percentage into an overall percentage.
    #[must_use]
    pub fn scale(&self, percent: i32) -> i32 {
        #[allow(clippy::cast_possible_truncation)]
        let mut overall = self.adder + (f64::from(percent) * self.multiplier) as i32;
        overall = overall.clamp(0, 100);
        if percent == 100 && overall >= 99 {
            overall = 100;
        }
        overall
    }
}
