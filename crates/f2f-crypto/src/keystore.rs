//! File-backed identity store.
//!
//! One JSON file per identity under a key directory. The file name is the hex
//! encoding of the identity name so arbitrary device names map to safe paths.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::identity::{public_of, sign_with, CryptoError, IdentityStore};
use crate::keys::{PublicKey, Signature};

#[derive(Serialize, Deserialize)]
struct StoredKey {
    version: u32,
    identity: String,
    /// Ed25519 seed, hex encoded.
    seed: String,
    /// Informational only; recomputed from the seed on load.
    public_key: String,
}

impl StoredKey {
    const CURRENT_VERSION: u32 = 1;
}

/// Identity store that persists keys across restarts.
pub struct FileIdentityStore {
    dir: PathBuf,
    // Serializes generate/delete so concurrent writers can't interleave
    // temp-file renames for the same identity.
    write_lock: Mutex<()>,
}

impl FileIdentityStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.json", hex::encode(identity.as_bytes())))
    }

    fn load(&self, identity: &str) -> Result<Option<SigningKey>, CryptoError> {
        let path = self.path_for(identity);
        if !path.exists() {
            return Ok(None);
        }
        let contents = Zeroizing::new(fs::read_to_string(&path).map_err(io_err)?);
        let stored: StoredKey = serde_json::from_str(&contents)
            .map_err(|e| CryptoError::KeyStore(format!("corrupt key file: {e}")))?;
        if stored.version != StoredKey::CURRENT_VERSION {
            return Err(CryptoError::KeyStore(format!(
                "unsupported key file version {}",
                stored.version
            )));
        }
        let seed = Zeroizing::new(
            hex::decode(&stored.seed).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?,
        );
        let seed: [u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                got: seed.len(),
            })?;
        let seed = Zeroizing::new(seed);
        Ok(Some(SigningKey::from_bytes(&seed)))
    }

    fn store(&self, identity: &str, key: &SigningKey) -> Result<(), CryptoError> {
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        let stored = StoredKey {
            version: StoredKey::CURRENT_VERSION,
            identity: identity.to_string(),
            seed: hex::encode(key.to_bytes()),
            public_key: public_of(key).to_base64(),
        };
        let json = Zeroizing::new(
            serde_json::to_string_pretty(&stored)
                .map_err(|e| CryptoError::KeyStore(e.to_string()))?,
        );
        drop(Zeroizing::new(stored.seed));

        let path = self.path_for(identity);
        let temp_path = path.with_extension("tmp");
        // A leftover from an interrupted write would block create_new.
        match fs::remove_file(&temp_path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(io_err(e)),
            _ => {}
        }
        let mut file = open_private(&temp_path).map_err(io_err)?;
        file.write_all(json.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(io_err)?;
        Ok(())
    }
}

/// Create `path` readable by the owner only from the first byte written.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

fn io_err(e: std::io::Error) -> CryptoError {
    CryptoError::KeyStore(e.to_string())
}

impl IdentityStore for FileIdentityStore {
    fn generate(&self, identity: &str) -> Result<PublicKey, CryptoError> {
        let _guard = self.write_lock.lock();
        let key = SigningKey::generate(&mut OsRng);
        self.store(identity, &key)?;
        let public = public_of(&key);
        tracing::info!(identity, fingerprint = %public.fingerprint(), "stored new identity key");
        Ok(public)
    }

    fn sign(&self, identity: &str, data: &[u8]) -> Result<Signature, CryptoError> {
        let key = self
            .load(identity)?
            .ok_or_else(|| CryptoError::UnknownIdentity(identity.to_string()))?;
        Ok(sign_with(&key, data))
    }

    fn public_key(&self, identity: &str) -> Option<PublicKey> {
        match self.load(identity) {
            Ok(key) => key.as_ref().map(public_of),
            Err(e) => {
                tracing::warn!(identity, error = %e, "failed to load identity key");
                None
            }
        }
    }

    fn delete(&self, identity: &str) -> Result<(), CryptoError> {
        let _guard = self.write_lock.lock();
        let path = self.path_for(identity);
        if path.exists() {
            fs::remove_file(&path).map_err(io_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let pk = {
            let store = FileIdentityStore::new(dir.path());
            store.generate("kitchen-tablet").unwrap()
        };

        let store = FileIdentityStore::new(dir.path());
        assert_eq!(store.public_key("kitchen-tablet"), Some(pk));
        let sig = store.sign("kitchen-tablet", b"data").unwrap();
        assert!(store.verify("kitchen-tablet", b"data", &sig));
    }

    #[test]
    fn test_unsafe_names_stay_in_dir() {
        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path());
        store.generate("../escape").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(store.public_key("../escape").is_some());
    }

    #[test]
    fn test_delete_and_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path());
        store.generate("alice").unwrap();
        store.delete("alice").unwrap();
        store.delete("alice").unwrap();

        assert!(store.public_key("alice").is_none());
        assert!(matches!(
            store.sign("alice", b"x"),
            Err(CryptoError::UnknownIdentity(_))
        ));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path());
        fs::write(store.path_for("alice"), "not json").unwrap();

        assert!(matches!(store.sign("alice", b"x"), Err(CryptoError::KeyStore(_))));
        assert!(store.public_key("alice").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path());
        store.generate("alice").unwrap();

        let mode = fs::metadata(store.path_for("alice")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_leftover_temp_file_does_not_widen_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileIdentityStore::new(dir.path());
        let temp_path = store.path_for("alice").with_extension("tmp");
        fs::write(&temp_path, b"stale").unwrap();
        fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o644)).unwrap();

        store.generate("alice").unwrap();

        assert!(!temp_path.exists());
        let mode = fs::metadata(store.path_for("alice")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(store.public_key("alice").is_some());
    }
}
