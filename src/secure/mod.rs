//! Locked, access-controlled memory for secret material.
//!
//! [`SecretRegion`] owns a page-locked allocation with a tracked protection
//! state; [`KeyTable`] lays the user's key slots, password and scratch area
//! out inside one region.

mod keytable;
mod region;

pub use keytable::{
    KeyKind, KeyMaterial, KeyTable, KEY_SIZE, PASSWORD_MAX_LEN, SCRATCH_SIZE, USER_MAX_KEYS,
};
pub use region::{Protection, RegionGuard, SecretRegion};
