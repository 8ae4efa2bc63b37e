// ── Runtime bridge configuration ──
//
// These types describe *how* to talk to a bridge: trust roots, timeouts,
// request budgets. They never touch disk. The CLI builds a `BridgeConfig`
// from its config file and hands it in.

use huectl_api::TransportConfig;
use huectl_api::discovery::DiscoveryConfig;

use crate::queue::QueueLimits;

/// Device type sent when minting an application key.
pub const DEFAULT_DEVICETYPE: &str = "huectl#cli";

/// Configuration for connecting to a single bridge.
///
/// Built by the CLI, passed to `Bridge` and the pairing driver.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// TLS trust root plus connect and request timeouts.
    pub transport: TransportConfig,
    /// Where and how long to look for bridges.
    pub discovery: DiscoveryConfig,
    /// Per-class command budgets.
    pub limits: QueueLimits,
    /// `devicetype` for the link request (`app#instance`).
    pub devicetype: String,
    /// Keep the cache live by consuming the event stream.
    pub event_stream: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            discovery: DiscoveryConfig::default(),
            limits: QueueLimits::default(),
            devicetype: DEFAULT_DEVICETYPE.to_owned(),
            event_stream: true,
        }
    }
}
