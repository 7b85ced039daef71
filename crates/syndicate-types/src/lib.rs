//! Syndicate Types - Core type definitions shared by every Syndicate crate.
//!
//! This crate provides:
//! - Addresses (20-byte, Bech32m encoded with the `synd` prefix)
//! - Hashes (32-byte, blake3 digests) used for content commitments
//! - Time and amount aliases used across the ledgers

pub mod address;
pub mod hash;
pub mod error;

#[cfg(any(feature = "serde", feature = "borsh"))]
mod serialization;

pub use address::Address;
pub use hash::Hash;
pub use error::TypesError;

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// Token amounts and voting power.
pub type Amount = u128;

/// Basis-point denominator (100% = 10_000 bps).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Address, Amount, Hash, Timestamp, TypesError, BPS_DENOMINATOR};
}
