// ── Bridge-backed pairing ──
//
// The production `PairingBackend`: discovery and link go through
// huectl-api, a connection yields a live `Bridge`.

use std::sync::Arc;

use huectl_api::{BridgeIdentity, Credentials};

use super::driver::PairingBackend;
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::storage::{BridgeStorage, StoredFingerprint};

/// Pairs against a real bridge on the network.
#[derive(Debug, Clone)]
pub struct BridgeBackend {
    config: BridgeConfig,
    storage: Arc<dyn BridgeStorage>,
}

impl BridgeBackend {
    /// `storage` also holds the pinned certificate fingerprint.
    pub fn new(config: BridgeConfig, storage: Arc<dyn BridgeStorage>) -> Self {
        Self { config, storage }
    }

    fn pins(&self, bridge: &BridgeIdentity) -> Arc<StoredFingerprint> {
        Arc::new(StoredFingerprint::new(Arc::clone(&self.storage), &bridge.id))
    }
}

impl PairingBackend for BridgeBackend {
    type Session = Bridge;

    async fn discover(&self) -> Result<Option<BridgeIdentity>, CoreError> {
        Ok(huectl_api::discovery::find_bridge(&self.config.transport, &self.config.discovery).await?)
    }

    async fn link(&self, bridge: &BridgeIdentity) -> Result<Credentials, CoreError> {
        Ok(huectl_api::link::create_application_key(
            bridge,
            &self.config.devicetype,
            &self.config.transport,
            self.pins(bridge),
        )
        .await?)
    }

    async fn connect(
        &self,
        bridge: &BridgeIdentity,
        credentials: &Credentials,
    ) -> Result<Bridge, CoreError> {
        Bridge::connect(
            bridge.clone(),
            credentials,
            self.config.clone(),
            self.pins(bridge),
        )
        .await
    }

    async fn disconnect(&self, session: &Bridge) {
        session.disconnect().await;
    }
}
