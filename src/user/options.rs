//! User option flags and tunables.

/// Ask the server whether a software update is available.
pub const OPTION_CHECK_FOR_UPDATES: u16 = 0x0001;

/// Ask which identity to use instead of assuming the current one.
pub const OPTION_ASK_FOR_IDENTITY: u16 = 0x0002;

/// Request that the server disable non-SQRL authentication.
pub const OPTION_REQUEST_SQRL_ONLY: u16 = 0x0004;

/// Request that the server hide its friendly name.
pub const OPTION_REQUEST_NO_SFN: u16 = 0x0008;

/// Warn when the authentication channel looks intercepted.
pub const OPTION_WARN_MITM: u16 = 0x0010;

/// Discard hint data when the system suspends.
pub const OPTION_CLEAR_HINT_SUSPEND: u16 = 0x0020;

/// Discard hint data when the active user changes.
pub const OPTION_CLEAR_HINT_USER_SWITCH: u16 = 0x0040;

/// Discard hint data after the idle timeout.
pub const OPTION_CLEAR_HINT_IDLE: u16 = 0x0080;

/// Default option flags for a new identity.
pub const DEFAULT_FLAGS: u16 = OPTION_CHECK_FOR_UPDATES
    | OPTION_WARN_MITM
    | OPTION_CLEAR_HINT_SUSPEND
    | OPTION_CLEAR_HINT_USER_SWITCH
    | OPTION_CLEAR_HINT_IDLE;

/// Default number of password characters used as the hint.
pub const DEFAULT_HINT_LENGTH: u8 = 4;

/// Default seconds of Enscrypt work when sealing identity blocks.
pub const DEFAULT_ENSCRYPT_SECONDS: u8 = 1;

/// Default minutes of idle time before hint data is discarded.
pub const DEFAULT_TIMEOUT_MINUTES: u16 = 15;

/// Per-identity tunables persisted inside block type 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserOptions {
    /// Option flags (`OPTION_*`).
    pub flags: u16,
    /// Number of password characters used as the hint.
    pub hint_length: u8,
    /// Seconds of Enscrypt work when sealing identity blocks.
    pub enscrypt_seconds: u8,
    /// Minutes of idle time before hint data is discarded.
    pub timeout_minutes: u16,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            flags: DEFAULT_FLAGS,
            hint_length: DEFAULT_HINT_LENGTH,
            enscrypt_seconds: DEFAULT_ENSCRYPT_SECONDS,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        }
    }
}
