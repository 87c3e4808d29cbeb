//! Cryptographic envelope for face-to-face device authentication.
//!
//! Identity keys never leave an [`identity::IdentityStore`]; the protocol only
//! asks it to generate, sign and verify. Everything that gets signed is built
//! with [`payload::SigningPayload`] so signer and verifier agree byte for byte.

#![forbid(unsafe_code)]

pub mod hash;
pub mod keys;
pub mod identity;
pub mod keystore;
pub mod payload;
pub mod freshness;

#[cfg(test)]
mod proptests;

pub use freshness::{FreshnessError, FreshnessWindow};
pub use identity::{verify_with_public_key, CryptoError, IdentityStore, MemoryIdentityStore};
pub use keys::{PublicKey, Signature};
pub use keystore::FileIdentityStore;
pub use payload::SigningPayload;
