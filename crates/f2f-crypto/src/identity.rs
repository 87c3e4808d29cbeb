//! Identity Store capability: per-identity Ed25519 keypairs.
//!
//! Callers name an identity (the device name) and ask the store to generate a
//! keypair for it, sign with it, or verify against it. Private key material
//! stays inside the store.

use std::collections::HashMap;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use rand_core::OsRng;

use crate::keys::{PublicKey, Signature};

/// Error type for identity and key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("no key stored for identity '{0}'")]
    UnknownIdentity(String),
    #[error("invalid encoding: {0}")]
    InvalidEncoding(String),
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("key store error: {0}")]
    KeyStore(String),
}

/// Owner of private key material.
///
/// `generate` replaces any existing key for the identity: re-provisioning
/// under the same name yields a logically new identity.
pub trait IdentityStore: Send + Sync {
    fn generate(&self, identity: &str) -> Result<PublicKey, CryptoError>;

    fn sign(&self, identity: &str, data: &[u8]) -> Result<Signature, CryptoError>;

    fn public_key(&self, identity: &str) -> Option<PublicKey>;

    fn delete(&self, identity: &str) -> Result<(), CryptoError>;

    /// Verify `signature` over `data` against the key held for `identity`.
    /// Unknown identities never verify.
    fn verify(&self, identity: &str, data: &[u8], signature: &Signature) -> bool {
        match self.public_key(identity) {
            Some(pk) => verify_with_public_key(&pk, data, signature),
            None => false,
        }
    }
}

/// Verify a signature against a known public key (e.g. one fetched from the
/// backend for a peer device).
pub fn verify_with_public_key(public_key: &PublicKey, data: &[u8], signature: &Signature) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(public_key.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
    vk.verify_strict(data, &sig).is_ok()
}

pub(crate) fn sign_with(key: &SigningKey, data: &[u8]) -> Signature {
    Signature::from_bytes(key.sign(data).to_bytes())
}

pub(crate) fn public_of(key: &SigningKey) -> PublicKey {
    PublicKey::from_bytes(key.verifying_key().to_bytes())
}

/// Process-local identity store. Keys are lost on drop.
#[derive(Default)]
pub struct MemoryIdentityStore {
    keys: RwLock<HashMap<String, SigningKey>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn generate(&self, identity: &str) -> Result<PublicKey, CryptoError> {
        let key = SigningKey::generate(&mut OsRng);
        let public = public_of(&key);
        self.keys.write().insert(identity.to_string(), key);
        tracing::debug!(identity, fingerprint = %public.fingerprint(), "generated identity key");
        Ok(public)
    }

    fn sign(&self, identity: &str, data: &[u8]) -> Result<Signature, CryptoError> {
        let keys = self.keys.read();
        let key = keys
            .get(identity)
            .ok_or_else(|| CryptoError::UnknownIdentity(identity.to_string()))?;
        Ok(sign_with(key, data))
    }

    fn public_key(&self, identity: &str) -> Option<PublicKey> {
        self.keys.read().get(identity).map(public_of)
    }

    fn delete(&self, identity: &str) -> Result<(), CryptoError> {
        self.keys.write().remove(identity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_round_trip() {
        let store = MemoryIdentityStore::new();
        store.generate("alice").unwrap();

        let data = b"auth1|alice|1700000000";
        let sig = store.sign("alice", data).unwrap();
        assert!(store.verify("alice", data, &sig));
    }

    #[test]
    fn test_tampered_data_fails() {
        let store = MemoryIdentityStore::new();
        store.generate("alice").unwrap();

        let sig = store.sign("alice", b"auth1|alice|1700000000").unwrap();
        assert!(!store.verify("alice", b"auth1|alice|1700000001", &sig));
    }

    #[test]
    fn test_other_identity_key_fails() {
        let store = MemoryIdentityStore::new();
        store.generate("alice").unwrap();
        store.generate("bob").unwrap();

        let data = b"hello";
        let sig = store.sign("alice", data).unwrap();
        assert!(!store.verify("bob", data, &sig));
    }

    #[test]
    fn test_unknown_identity() {
        let store = MemoryIdentityStore::new();
        assert!(matches!(
            store.sign("ghost", b"x"),
            Err(CryptoError::UnknownIdentity(name)) if name == "ghost"
        ));
        let sig = Signature::from_bytes([0u8; 64]);
        assert!(!store.verify("ghost", b"x", &sig));
    }

    #[test]
    fn test_regenerate_replaces_key() {
        let store = MemoryIdentityStore::new();
        let first = store.generate("alice").unwrap();
        let sig = store.sign("alice", b"data").unwrap();

        let second = store.generate("alice").unwrap();
        assert_ne!(first, second);
        assert!(!store.verify("alice", b"data", &sig));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_verify_with_fetched_public_key() {
        let store = MemoryIdentityStore::new();
        let pk = store.generate("bob").unwrap();
        let sig = store.sign("bob", b"payload").unwrap();

        let fetched = PublicKey::from_base64(&pk.to_base64()).unwrap();
        assert!(verify_with_public_key(&fetched, b"payload", &sig));
        assert!(!verify_with_public_key(&fetched, b"payload2", &sig));
    }

    #[test]
    fn test_delete_forgets_key() {
        let store = MemoryIdentityStore::new();
        store.generate("alice").unwrap();
        store.delete("alice").unwrap();
        assert!(store.public_key("alice").is_none());
        assert!(store.is_empty());
    }
}
