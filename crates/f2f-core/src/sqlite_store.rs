//! SQLite-backed record store.
//!
//! All access goes through a single connection behind an async mutex, which
//! serializes writers the way the device's disk worker would.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;

use crate::store::{check_device, RecordStore, StoreError};
use crate::types::{Device, Profile};

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 1;

const DEVICE_COLUMNS: &str = "name, realm, public_key, public_key_fingerprint, initialized";
const PROFILE_COLUMNS: &str = "realm, server_url, device_name";

fn op_failed(context: &str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
    move |e| StoreError::OperationFailed(format!("{context}: {e}"))
}

/// SQLite-based persistent store implementation.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(op_failed("failed to open database"))?;

        // WAL keeps readers (e.g. `f2f devices`) from blocking the engine.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(op_failed("failed to set pragmas"))?;

        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(op_failed("failed to open in-memory database"))?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )
        .map_err(op_failed("failed to create schema_version"))?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(op_failed("failed to read schema version"))?;

        if current_version > SCHEMA_VERSION {
            return Err(StoreError::DataCorruption(format!(
                "database schema version {current_version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
        if current_version < 1 {
            Self::migrate_v1(conn)?;
        }
        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                name TEXT PRIMARY KEY,
                realm TEXT NOT NULL,
                public_key TEXT,
                public_key_fingerprint TEXT,
                initialized INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_devices_realm ON devices(realm);

            CREATE TABLE IF NOT EXISTS profiles (
                realm TEXT PRIMARY KEY,
                server_url TEXT NOT NULL,
                device_name TEXT
            );

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(op_failed("migration v1 failed"))
    }

    fn row_to_device(row: &Row<'_>) -> rusqlite::Result<Device> {
        Ok(Device {
            name: row.get(0)?,
            realm: row.get(1)?,
            public_key: row.get(2)?,
            public_key_fingerprint: row.get(3)?,
            initialized: row.get::<_, i32>(4)? != 0,
        })
    }

    fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<Profile> {
        Ok(Profile {
            realm: row.get(0)?,
            server_url: row.get(1)?,
            device_name: row.get(2)?,
        })
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert_device(&self, device: Device) -> Result<(), StoreError> {
        check_device(&device)?;
        let mut conn = self.conn.lock().await;
        let tx = conn
            .transaction()
            .map_err(op_failed("failed to begin transaction"))?;
        if device.initialized {
            tx.execute(
                "UPDATE devices SET initialized = 0 WHERE realm = ?1 AND name != ?2",
                params![device.realm, device.name],
            )
            .map_err(op_failed("failed to demote realm devices"))?;
        }
        tx.execute(
            "INSERT OR REPLACE INTO devices (name, realm, public_key, public_key_fingerprint, initialized)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device.name,
                device.realm,
                device.public_key,
                device.public_key_fingerprint,
                device.initialized as i32,
            ],
        )
        .map_err(op_failed("failed to save device"))?;
        tx.commit().map_err(op_failed("failed to commit device"))
    }

    async fn find_device(&self, name: &str) -> Result<Option<Device>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE name = ?1"),
            params![name],
            Self::row_to_device,
        )
        .optional()
        .map_err(op_failed("failed to load device"))
    }

    async fn default_device(&self) -> Result<Option<Device>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE initialized = 1 ORDER BY name LIMIT 1"),
            [],
            Self::row_to_device,
        )
        .optional()
        .map_err(op_failed("failed to load default device"))
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY name"))
            .map_err(op_failed("failed to prepare device query"))?;
        let rows = stmt
            .query_map([], Self::row_to_device)
            .map_err(op_failed("failed to list devices"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(op_failed("failed to read device row"))
    }

    async fn clear_devices(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM devices", [])
            .map_err(op_failed("failed to clear devices"))
    }

    async fn upsert_profile(&self, profile: Profile) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO profiles (realm, server_url, device_name) VALUES (?1, ?2, ?3)",
            params![profile.realm, profile.server_url, profile.device_name],
        )
        .map_err(op_failed("failed to save profile"))?;
        Ok(())
    }

    async fn find_profile(&self, realm: &str) -> Result<Option<Profile>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE realm = ?1"),
            params![realm],
            Self::row_to_profile,
        )
        .optional()
        .map_err(op_failed("failed to load profile"))
    }

    async fn default_profile(&self) -> Result<Option<Profile>, StoreError> {
        let conn = self.conn.lock().await;
        conn.query_row(
            &format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY realm LIMIT 1"),
            [],
            Self::row_to_profile,
        )
        .optional()
        .map_err(op_failed("failed to load default profile"))
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY realm"))
            .map_err(op_failed("failed to prepare profile query"))?;
        let rows = stmt
            .query_map([], Self::row_to_profile)
            .map_err(op_failed("failed to list profiles"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(op_failed("failed to read profile row"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use f2f_crypto::PublicKey;
    use tempfile::TempDir;

    fn keyed(name: &str, realm: &str, initialized: bool) -> Device {
        let mut d = Device::draft(name, realm).with_public_key(&PublicKey::from_bytes([5u8; 32]));
        d.initialized = initialized;
        d
    }

    #[tokio::test]
    async fn test_device_round_trip() {
        let store = SqliteStore::new_in_memory().unwrap();
        let device = keyed("kitchen", "home", false);
        store.upsert_device(device.clone()).await.unwrap();

        assert_eq!(store.find_device("kitchen").await.unwrap(), Some(device));
        assert_eq!(store.find_device("garage").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_one_default_per_realm() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.upsert_device(keyed("a", "r1", true)).await.unwrap();
        store.upsert_device(keyed("b", "r2", true)).await.unwrap();
        store.upsert_device(keyed("c", "r1", true)).await.unwrap();

        let devices = store.list_devices().await.unwrap();
        let flags: Vec<_> = devices.iter().map(|d| (d.name.as_str(), d.initialized)).collect();
        assert_eq!(flags, vec![("a", false), ("b", true), ("c", true)]);
    }

    #[tokio::test]
    async fn test_initialized_requires_key() {
        let store = SqliteStore::new_in_memory().unwrap();
        let mut d = Device::draft("a", "r1");
        d.initialized = true;
        assert!(matches!(
            store.upsert_device(d).await,
            Err(StoreError::Invariant(_))
        ));
    }

    #[tokio::test]
    async fn test_clear_devices_keeps_profiles() {
        let store = SqliteStore::new_in_memory().unwrap();
        store.upsert_device(keyed("a", "r1", true)).await.unwrap();
        store
            .upsert_profile(Profile::new("r1", "https://auth.example/"))
            .await
            .unwrap();

        assert_eq!(store.clear_devices().await.unwrap(), 1);
        assert!(store.default_device().await.unwrap().is_none());
        assert!(store.default_profile().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f2f.db");
        {
            let store = SqliteStore::new(&path).unwrap();
            store.upsert_device(keyed("a", "r1", true)).await.unwrap();
            let mut profile = Profile::new("r1", "https://auth.example/");
            profile.device_name = Some("a".into());
            store.upsert_profile(profile).await.unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.default_device().await.unwrap().unwrap().name, "a");
        assert_eq!(
            store.find_profile("r1").await.unwrap().unwrap().device_name.as_deref(),
            Some("a")
        );
    }
}
