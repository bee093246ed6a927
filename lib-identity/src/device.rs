//! Persistent device identity
//!
//! Each node carries a stable 128-bit random id generated on first run, a
//! human-editable display name, and the onboarding flag. The id is the
//! routing identifier; the name is cosmetic and doubles as the link-layer
//! display name. Identity persists across restarts and is reset only by
//! wiping the data directory.

use anyhow::Result;
use lib_storage::KvStore;
use rand::RngCore;
use tracing::{info, warn};

const KEY_DEVICE_ID: &str = "identity.deviceId";
const KEY_DEVICE_NAME: &str = "identity.deviceName";
const KEY_ONBOARDING: &str = "identity.onboarding";

/// Device identity backed by the KV store.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    kv: KvStore,
    device_id: String,
    device_name: String,
    onboarded: bool,
}

impl DeviceIdentity {
    /// Load the stored identity, generating and persisting a fresh one on
    /// first run.
    pub fn load_or_generate(kv: KvStore) -> Result<Self> {
        let device_id = match kv.get::<String>(KEY_DEVICE_ID)? {
            Some(id) => id,
            None => {
                let id = generate_device_id();
                kv.put(KEY_DEVICE_ID, &id)?;
                info!(device_id = %id, "generated new device identity");
                id
            }
        };

        let device_name = match kv.get::<String>(KEY_DEVICE_NAME)? {
            Some(name) => name,
            None => {
                let name = default_name(&device_id);
                kv.put(KEY_DEVICE_NAME, &name)?;
                name
            }
        };

        let onboarded = kv.get::<bool>(KEY_ONBOARDING)?.unwrap_or(false);

        Ok(Self {
            kv,
            device_id,
            device_name,
            onboarded,
        })
    }

    /// Stable opaque routing identifier.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Human-readable display name.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Rename the device, persisting the new name.
    pub fn set_device_name(&mut self, name: impl Into<String>) {
        self.device_name = name.into();
        if let Err(e) = self.kv.put(KEY_DEVICE_NAME, &self.device_name) {
            warn!("failed to persist device name: {e:#}");
        }
    }

    pub fn has_completed_onboarding(&self) -> bool {
        self.onboarded
    }

    pub fn set_completed(&mut self, completed: bool) {
        self.onboarded = completed;
        if let Err(e) = self.kv.put(KEY_ONBOARDING, &completed) {
            warn!("failed to persist onboarding state: {e:#}");
        }
    }
}

fn generate_device_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn default_name(device_id: &str) -> String {
    let prefix: String = device_id.chars().take(4).collect();
    format!("Pigeon-{prefix}")
}
