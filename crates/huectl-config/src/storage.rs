// ── Pairing persistence ──
//
// `bridge.toml` in the data directory holds the bridge id, address and
// pinned fingerprint. The application key goes to the system keyring when
// one is available and falls back to the same file otherwise.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use huectl_core::{BridgeStorage, CoreError, StorageKey};

use crate::ConfigError;

/// Environment variable that overrides the stored application key.
pub const APPLICATION_KEY_ENV: &str = "HUECTL_APPLICATION_KEY";

/// Set to `file` to keep the application key out of the system keyring.
pub const KEY_STORE_ENV: &str = "HUECTL_KEY_STORE";

const KEYRING_SERVICE: &str = "huectl";
const KEYRING_USER: &str = "application-key";

/// Where the application key lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStore {
    /// System keyring, with the file as fallback.
    Keyring,
    /// Plaintext in `bridge.toml` only.
    File,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct PairingFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bridge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bridge_ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    application_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cert_fingerprint: Option<String>,
}

impl PairingFile {
    fn slot(&mut self, key: StorageKey) -> &mut Option<String> {
        match key {
            StorageKey::BridgeId => &mut self.bridge_id,
            StorageKey::BridgeIpAddress => &mut self.bridge_ip_address,
            StorageKey::ApplicationKey => &mut self.application_key,
            StorageKey::CertFingerprint => &mut self.cert_fingerprint,
        }
    }
}

/// [`BridgeStorage`] backed by `bridge.toml` and the keyring.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    keys: KeyStore,
    key_override: Option<String>,
    lock: Mutex<()>,
}

impl FileStorage {
    /// Storage at the platform location, honouring
    /// [`APPLICATION_KEY_ENV`] and [`KEY_STORE_ENV`].
    pub fn open() -> Self {
        let keys = match std::env::var(KEY_STORE_ENV) {
            Ok(v) if v.eq_ignore_ascii_case("file") => KeyStore::File,
            _ => KeyStore::Keyring,
        };
        let mut storage = Self::new(crate::bridge_state_path(), keys);
        storage.key_override = std::env::var(APPLICATION_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty());
        storage
    }

    pub fn new(path: impl Into<PathBuf>, keys: KeyStore) -> Self {
        Self {
            path: path.into(),
            keys,
            key_override: None,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the application key comes from the environment.
    pub fn key_from_env(&self) -> bool {
        self.key_override.is_some()
    }

    fn read(&self) -> Result<PairingFile, ConfigError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PairingFile::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, file: &PairingFile) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(&self.path, toml::to_string_pretty(file)?).map_err(io)
    }

    fn update(&self, key: StorageKey, value: Option<&str>) -> Result<(), ConfigError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut file = self.read()?;
        *file.slot(key) = value.map(str::to_owned);
        self.write(&file)
    }

    fn keyring_entry() -> Result<keyring::Entry, ConfigError> {
        Ok(keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?)
    }

    fn set_key(&self, value: &str) -> Result<(), ConfigError> {
        if self.keys == KeyStore::Keyring {
            match Self::keyring_entry().and_then(|e| Ok(e.set_password(value)?)) {
                Ok(()) => {
                    debug!("application key stored in keyring");
                    // Drop any plaintext copy left by an earlier fallback.
                    return self.update(StorageKey::ApplicationKey, None);
                }
                Err(e) => warn!(error = %e, "keyring unavailable, storing application key in plaintext"),
            }
        }
        self.update(StorageKey::ApplicationKey, Some(value))
    }

    fn get_key(&self, file: &PairingFile) -> Option<String> {
        if let Some(key) = &self.key_override {
            return Some(key.clone());
        }
        if self.keys == KeyStore::Keyring {
            if let Ok(key) = Self::keyring_entry().and_then(|e| Ok(e.get_password()?)) {
                return Some(key);
            }
        }
        file.application_key.clone()
    }

    fn remove_key(&self) -> Result<(), ConfigError> {
        if self.keys == KeyStore::Keyring {
            match Self::keyring_entry().and_then(|e| Ok(e.delete_credential()?)) {
                Ok(()) | Err(ConfigError::Keyring(keyring::Error::NoEntry)) => {}
                Err(e) => warn!(error = %e, "cannot remove application key from keyring"),
            }
        }
        self.update(StorageKey::ApplicationKey, None)
    }
}

impl BridgeStorage for FileStorage {
    fn get(&self, key: StorageKey) -> Result<Option<String>, CoreError> {
        let mut file = {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.read()?
        };
        Ok(match key {
            StorageKey::ApplicationKey => self.get_key(&file),
            other => file.slot(other).take(),
        })
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), CoreError> {
        match key {
            StorageKey::ApplicationKey => self.set_key(value)?,
            other => self.update(other, Some(value))?,
        }
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), CoreError> {
        match key {
            StorageKey::ApplicationKey => self.remove_key()?,
            other => self.update(other, None)?,
        }
        Ok(())
    }
}
