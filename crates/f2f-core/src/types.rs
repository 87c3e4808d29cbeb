//! Persisted record types shared by the state machine and the stores.

use f2f_crypto::PublicKey;
use serde::{Deserialize, Serialize};

/// A device identity within a realm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub realm: String,
    /// Base64 public key; absent until provisioning completes.
    pub public_key: Option<String>,
    pub public_key_fingerprint: Option<String>,
    /// True once this device is the realm's trusted default.
    pub initialized: bool,
}

impl Device {
    /// A server-issued draft with no key yet.
    pub fn draft(name: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            realm: realm.into(),
            public_key: None,
            public_key_fingerprint: None,
            initialized: false,
        }
    }

    pub fn with_public_key(mut self, key: &PublicKey) -> Self {
        self.public_key = Some(key.to_base64());
        self.public_key_fingerprint = Some(key.fingerprint());
        self
    }
}

/// Per-realm backend binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub realm: String,
    pub server_url: String,
    pub device_name: Option<String>,
}

impl Profile {
    pub fn new(realm: impl Into<String>, server_url: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            server_url: server_url.into(),
            device_name: None,
        }
    }
}
