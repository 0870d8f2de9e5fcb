//! Locked memory region with tracked access protection.
//!
//! A [`SecretRegion`] owns a zeroed allocation that is locked against paging
//! (best-effort `mlock` on Unix) for its whole lifetime and wiped before the
//! pages are returned to the allocator. Access goes through accessors that
//! enforce the region's protection state, so "no access outside a scope" is
//! a property of the type rather than a calling convention.

use std::ops::{Deref, DerefMut};

use zeroize::Zeroize;

use crate::{IdentityError, IdentityResult};

/// Access protection state of a [`SecretRegion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    /// Neither reads nor writes are permitted.
    NoAccess,
    /// Reads are permitted, writes are not.
    ReadOnly,
    /// Reads and writes are permitted.
    ReadWrite,
}

/// An owned, locked allocation for secret material.
///
/// The region starts zeroed in the `ReadWrite` state. Dropping it wipes the
/// contents and unlocks the pages.
pub struct SecretRegion {
    buf: Box<[u8]>,
    protection: Protection,
    locked: bool,
}

impl SecretRegion {
    /// Allocates a zeroed region of `len` bytes and locks it against paging.
    ///
    /// Page locking is best-effort: on platforms (or under resource limits)
    /// where `mlock` fails, the region still functions with protection-state
    /// tracking only.
    ///
    /// # Errors
    ///
    /// This constructor is fallible for contract parity with the allocation
    /// path it models; with the global allocator it does not fail for any
    /// `len` the container format can express.
    pub fn new(len: usize) -> IdentityResult<Self> {
        let buf = vec![0u8; len].into_boxed_slice();
        let locked = lock_pages(&buf);
        Ok(Self {
            buf,
            protection: Protection::ReadWrite,
            locked,
        })
    }

    /// Creates an empty, unlocked region.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            buf: Box::default(),
            protection: Protection::ReadWrite,
            locked: false,
        }
    }

    /// Returns the region length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if the region has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the current protection state.
    #[must_use]
    pub const fn protection(&self) -> Protection {
        self.protection
    }

    /// Transitions the region to a new protection state.
    ///
    /// Transitions are re-entrant: setting the current state again is a
    /// no-op.
    pub fn set_protection(&mut self, protection: Protection) {
        self.protection = protection;
    }

    /// Returns a shared view of the contents.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MemoryProtection`] while the region is in
    /// the `NoAccess` state.
    pub fn read(&self) -> IdentityResult<&[u8]> {
        if self.protection == Protection::NoAccess {
            return Err(IdentityError::protection("read from no-access region"));
        }
        Ok(&self.buf)
    }

    /// Returns a mutable view of the contents.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MemoryProtection`] unless the region is in
    /// the `ReadWrite` state.
    pub fn write(&mut self) -> IdentityResult<&mut [u8]> {
        if self.protection != Protection::ReadWrite {
            return Err(IdentityError::protection("write to protected region"));
        }
        Ok(&mut self.buf)
    }

    /// Forces the region readable and writable for the guard's scope,
    /// restoring the prior protection state when the guard drops.
    ///
    /// This is the accessor the key workflows use: a locked table is opened
    /// for exactly the duration of a derivation and re-protected afterwards.
    pub fn open_mut(&mut self) -> RegionGuard<'_> {
        let prior = self.protection;
        self.protection = Protection::ReadWrite;
        RegionGuard {
            region: self,
            prior,
        }
    }

    /// Zeroes the entire region without changing its protection state.
    pub fn wipe(&mut self) {
        self.buf.zeroize();
    }
}

impl Drop for SecretRegion {
    fn drop(&mut self) {
        self.buf.zeroize();
        if self.locked {
            unlock_pages(&self.buf);
        }
    }
}

impl std::fmt::Debug for SecretRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRegion")
            .field("len", &self.buf.len())
            .field("protection", &self.protection)
            .field("contents", &"[REDACTED]")
            .finish()
    }
}

/// Scoped read-write access to a [`SecretRegion`].
///
/// Dereferences to the region's bytes; restores the region's prior
/// protection state on drop.
pub struct RegionGuard<'a> {
    region: &'a mut SecretRegion,
    prior: Protection,
}

impl Deref for RegionGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.region.buf
    }
}

impl DerefMut for RegionGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.region.buf
    }
}

impl Drop for RegionGuard<'_> {
    fn drop(&mut self) {
        self.region.protection = self.prior;
    }
}

#[cfg(unix)]
fn lock_pages(buf: &[u8]) -> bool {
    if buf.is_empty() {
        return false;
    }
    // SAFETY: the pointer and length describe an allocation owned by the
    // caller for at least the duration of the call.
    unsafe { libc::mlock(buf.as_ptr().cast::<libc::c_void>(), buf.len()) == 0 }
}

#[cfg(unix)]
fn unlock_pages(buf: &[u8]) {
    if buf.is_empty() {
        return;
    }
    // SAFETY: only called on a buffer previously locked by `lock_pages`.
    unsafe {
        libc::munlock(buf.as_ptr().cast::<libc::c_void>(), buf.len());
    }
}

#[cfg(not(unix))]
fn lock_pages(_buf: &[u8]) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_pages(_buf: &[u8]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_starts_zeroed_and_writable() {
        let mut region = SecretRegion::new(64).unwrap();
        assert_eq!(region.len(), 64);
        assert_eq!(region.protection(), Protection::ReadWrite);
        assert!(region.read().unwrap().iter().all(|&b| b == 0));

        region.write().unwrap()[0] = 0xAB;
        assert_eq!(region.read().unwrap()[0], 0xAB);
    }

    #[test]
    fn test_no_access_blocks_reads_and_writes() {
        let mut region = SecretRegion::new(16).unwrap();
        region.set_protection(Protection::NoAccess);
        assert!(region.read().is_err());
        assert!(region.write().is_err());

        region.set_protection(Protection::ReadOnly);
        assert!(region.read().is_ok());
        assert!(region.write().is_err());
    }

    #[test]
    fn test_guard_restores_protection() {
        let mut region = SecretRegion::new(16).unwrap();
        region.set_protection(Protection::NoAccess);
        {
            let mut guard = region.open_mut();
            guard[3] = 7;
        }
        assert_eq!(region.protection(), Protection::NoAccess);

        region.set_protection(Protection::ReadWrite);
        assert_eq!(region.read().unwrap()[3], 7);
    }

    #[test]
    fn test_wipe_zeroes_contents() {
        let mut region = SecretRegion::new(8).unwrap();
        region.write().unwrap().fill(0x55);
        region.wipe();
        assert!(region.read().unwrap().iter().all(|&b| b == 0));
    }
}
