// ── Credential persistence ──
//
// The four values huectl needs to reconnect without user involvement.
// Implementations live elsewhere (a file-backed store in huectl-config);
// the core only sees this key-value seam.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use huectl_api::{BridgeIdentity, Credentials, FingerprintStore};
use secrecy::ExposeSecret;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::{debug, warn};

use crate::error::CoreError;

/// Persisted values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum StorageKey {
    BridgeId,
    BridgeIpAddress,
    ApplicationKey,
    CertFingerprint,
}

/// Key-value persistence for pairing state.
pub trait BridgeStorage: Send + Sync + fmt::Debug {
    fn get(&self, key: StorageKey) -> Result<Option<String>, CoreError>;
    fn set(&self, key: StorageKey, value: &str) -> Result<(), CoreError>;
    fn remove(&self, key: StorageKey) -> Result<(), CoreError>;
}

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<StorageKey, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BridgeStorage for MemoryStorage {
    fn get(&self, key: StorageKey) -> Result<Option<String>, CoreError> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), CoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, value.to_owned());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), CoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        Ok(())
    }
}

// ── Stored pairing ───────────────────────────────────────────────────

/// What the store knows at start-up.
#[derive(Debug, Clone)]
pub enum StoredPairing {
    Nothing,
    /// An address but no key: the bridge was found but never linked.
    BridgeOnly(BridgeIdentity),
    Complete(BridgeIdentity, Credentials),
}

/// Read the stored bridge and key. A malformed address counts as absent.
pub fn load_pairing(storage: &dyn BridgeStorage) -> Result<StoredPairing, CoreError> {
    let Some(id) = storage.get(StorageKey::BridgeId)? else {
        return Ok(StoredPairing::Nothing);
    };
    let Some(address) = storage.get(StorageKey::BridgeIpAddress)? else {
        return Ok(StoredPairing::Nothing);
    };
    let ip: IpAddr = match address.parse() {
        Ok(ip) => ip,
        Err(e) => {
            warn!(address, error = %e, "ignoring stored bridge with invalid address");
            return Ok(StoredPairing::Nothing);
        }
    };

    let bridge = BridgeIdentity::new(&id, ip);
    let pinned = read_pin(storage, &bridge.id);
    let bridge = bridge.with_fingerprint(pinned);

    Ok(match storage.get(StorageKey::ApplicationKey)? {
        Some(key) if !key.is_empty() => StoredPairing::Complete(bridge, Credentials::new(key)),
        _ => StoredPairing::BridgeOnly(bridge),
    })
}

/// Persist address and key of a connected bridge.
pub fn save_pairing(
    storage: &dyn BridgeStorage,
    bridge: &BridgeIdentity,
    credentials: &Credentials,
) -> Result<(), CoreError> {
    storage.set(StorageKey::BridgeId, &bridge.id)?;
    storage.set(StorageKey::BridgeIpAddress, &bridge.ip_address.to_string())?;
    storage.set(StorageKey::ApplicationKey, credentials.application_key().expose_secret())?;
    debug!(bridge = %bridge, "pairing saved");
    Ok(())
}

/// Forget everything, pinned fingerprint included.
pub fn erase_pairing(storage: &dyn BridgeStorage) -> Result<(), CoreError> {
    for key in StorageKey::iter() {
        storage.remove(key)?;
    }
    debug!("pairing erased");
    Ok(())
}

// ── Fingerprint pin adapter ──────────────────────────────────────────

/// [`FingerprintStore`] over [`BridgeStorage`], scoped to one bridge.
///
/// The pin is stored as `{bridge_id}:{fingerprint}` so a pin taken for one
/// bridge is never applied to another.
#[derive(Debug)]
pub struct StoredFingerprint {
    storage: Arc<dyn BridgeStorage>,
    bridge_id: String,
}

impl StoredFingerprint {
    pub fn new(storage: Arc<dyn BridgeStorage>, bridge_id: &str) -> Self {
        Self {
            storage,
            bridge_id: bridge_id.trim().to_ascii_lowercase(),
        }
    }
}

impl FingerprintStore for StoredFingerprint {
    fn pinned(&self) -> Option<String> {
        read_pin(self.storage.as_ref(), &self.bridge_id)
    }

    fn pin(&self, fingerprint: &str) {
        let value = format!("{}:{fingerprint}", self.bridge_id);
        if let Err(e) = self.storage.set(StorageKey::CertFingerprint, &value) {
            warn!(error = %e, "cannot persist pinned fingerprint");
        }
    }
}

fn read_pin(storage: &dyn BridgeStorage, bridge_id: &str) -> Option<String> {
    let stored = match storage.get(StorageKey::CertFingerprint) {
        Ok(stored) => stored?,
        Err(e) => {
            warn!(error = %e, "cannot read pinned fingerprint");
            return None;
        }
    };
    let (owner, fingerprint) = stored.split_once(':')?;
    (owner == bridge_id).then(|| fingerprint.to_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn key_names() {
        assert_eq!(StorageKey::BridgeIpAddress.to_string(), "bridgeIpAddress");
        assert_eq!(StorageKey::CertFingerprint.to_string(), "certFingerprint");
    }

    #[test]
    fn save_then_load_round_trip() {
        let storage = MemoryStorage::new();
        let bridge = BridgeIdentity::new("001788FFFE6A1B2C", "192.168.1.20".parse().unwrap());
        save_pairing(&storage, &bridge, &Credentials::new("app-key")).unwrap();

        let StoredPairing::Complete(loaded, creds) = load_pairing(&storage).unwrap() else {
            panic!("expected a complete pairing");
        };
        assert_eq!(loaded, bridge);
        assert_eq!(creds.application_key().expose_secret(), "app-key");
    }

    #[test]
    fn address_without_key_is_bridge_only() {
        let storage = MemoryStorage::new();
        storage.set(StorageKey::BridgeId, "001788fffe6a1b2c").unwrap();
        storage.set(StorageKey::BridgeIpAddress, "10.0.0.2").unwrap();
        assert!(matches!(
            load_pairing(&storage).unwrap(),
            StoredPairing::BridgeOnly(_)
        ));
    }

    #[test]
    fn invalid_address_counts_as_nothing() {
        let storage = MemoryStorage::new();
        storage.set(StorageKey::BridgeId, "001788fffe6a1b2c").unwrap();
        storage.set(StorageKey::BridgeIpAddress, "not-an-ip").unwrap();
        assert!(matches!(load_pairing(&storage).unwrap(), StoredPairing::Nothing));
    }

    #[test]
    fn erase_removes_every_key() {
        let storage = Arc::new(MemoryStorage::new());
        let bridge = BridgeIdentity::new("001788fffe6a1b2c", "10.0.0.2".parse().unwrap());
        save_pairing(storage.as_ref(), &bridge, &Credentials::new("k")).unwrap();
        StoredFingerprint::new(storage.clone(), &bridge.id).pin("ab12");

        erase_pairing(storage.as_ref()).unwrap();
        for key in StorageKey::iter() {
            assert_eq!(storage.get(key).unwrap(), None, "{key} survived erase");
        }
    }

    #[test]
    fn pin_is_scoped_to_its_bridge() {
        let storage = Arc::new(MemoryStorage::new());
        let first = StoredFingerprint::new(storage.clone(), "001788FFFE000001");
        first.pin("ab12");
        assert_eq!(first.pinned().as_deref(), Some("ab12"));

        let other = StoredFingerprint::new(storage.clone(), "001788fffe000002");
        assert_eq!(other.pinned(), None);
    }

    #[test]
    fn load_carries_pinned_fingerprint() {
        let storage = Arc::new(MemoryStorage::new());
        let bridge = BridgeIdentity::new("001788fffe6a1b2c", "10.0.0.2".parse().unwrap());
        save_pairing(storage.as_ref(), &bridge, &Credentials::new("k")).unwrap();
        StoredFingerprint::new(storage.clone(), &bridge.id).pin("ab12");

        let StoredPairing::Complete(loaded, _) = load_pairing(storage.as_ref()).unwrap() else {
            panic!("expected a complete pairing");
        };
        assert_eq!(loaded.cert_fingerprint.as_deref(), Some("ab12"));
    }
}
