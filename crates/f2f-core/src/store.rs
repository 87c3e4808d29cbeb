//! Storage abstraction for local device and profile records.
//!
//! This module defines the `RecordStore` trait and provides an in-memory
//! implementation for tests and ephemeral sessions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{Device, Profile};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("storage operation failed: {0}")]
    OperationFailed(String),

    #[error("data corruption detected: {0}")]
    DataCorruption(String),
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistence for `Device` and `Profile` records.
///
/// Writes are insert-or-replace by key: devices by `name`, profiles by
/// `realm`. At most one device per realm is `initialized`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Device Operations
    // -------------------------------------------------------------------------

    /// Insert or replace a device record.
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err(StoreError::Invariant)` if the device is `initialized` without
    ///   a public key
    ///
    /// Upserting an initialized device clears `initialized` on every other
    /// device of the same realm.
    async fn upsert_device(&self, device: Device) -> Result<(), StoreError>;

    /// Look up a device by name.
    async fn find_device(&self, name: &str) -> Result<Option<Device>, StoreError>;

    /// The first initialized device, if any.
    async fn default_device(&self) -> Result<Option<Device>, StoreError>;

    /// All devices, ordered by name.
    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Delete every device record.
    ///
    /// # Returns
    /// * `Ok(count)` - Number of records removed
    async fn clear_devices(&self) -> Result<usize, StoreError>;

    // -------------------------------------------------------------------------
    // Profile Operations
    // -------------------------------------------------------------------------

    async fn upsert_profile(&self, profile: Profile) -> Result<(), StoreError>;

    async fn find_profile(&self, realm: &str) -> Result<Option<Profile>, StoreError>;

    /// The first profile ordered by realm, if any.
    async fn default_profile(&self) -> Result<Option<Profile>, StoreError>;

    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError>;
}

/// Reject records that would break `initialized => public_key`.
pub fn check_device(device: &Device) -> Result<(), StoreError> {
    if device.initialized && device.public_key.is_none() {
        return Err(StoreError::Invariant(format!(
            "device '{}' cannot be initialized without a public key",
            device.name
        )));
    }
    Ok(())
}

// ============================================================================
// In-Memory Store Implementation
// ============================================================================

/// In-memory store for tests and sessions that don't persist.
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<BTreeMap<String, Device>>,
    profiles: RwLock<BTreeMap<String, Profile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn upsert_device(&self, device: Device) -> Result<(), StoreError> {
        check_device(&device)?;
        let mut devices = self.devices.write().await;
        if device.initialized {
            for other in devices.values_mut() {
                if other.realm == device.realm && other.name != device.name {
                    other.initialized = false;
                }
            }
        }
        devices.insert(device.name.clone(), device);
        Ok(())
    }

    async fn find_device(&self, name: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().await.get(name).cloned())
    }

    async fn default_device(&self) -> Result<Option<Device>, StoreError> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .find(|d| d.initialized)
            .cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices.read().await.values().cloned().collect())
    }

    async fn clear_devices(&self) -> Result<usize, StoreError> {
        let mut devices = self.devices.write().await;
        let count = devices.len();
        devices.clear();
        Ok(count)
    }

    async fn upsert_profile(&self, profile: Profile) -> Result<(), StoreError> {
        self.profiles
            .write()
            .await
            .insert(profile.realm.clone(), profile);
        Ok(())
    }

    async fn find_profile(&self, realm: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.read().await.get(realm).cloned())
    }

    async fn default_profile(&self) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.read().await.values().next().cloned())
    }

    async fn list_profiles(&self) -> Result<Vec<Profile>, StoreError> {
        Ok(self.profiles.read().await.values().cloned().collect())
    }
}
