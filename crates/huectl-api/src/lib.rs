// huectl-api: Async Rust client for the Hue bridge CLIP v2 API

pub mod clip;
pub mod decoder;
pub mod discovery;
pub mod error;
pub mod eventstream;
pub mod identity;
pub mod link;
pub mod models;
pub mod session;
pub mod transport;
pub mod trust;

pub use error::{Error, TrustError};
pub use eventstream::{EventKind, ResourcePartial, UpdateEvent};
pub use identity::{BridgeIdentity, Credentials};
pub use models::{Resource, ResourceType};
pub use session::BridgeSession;
pub use transport::TransportConfig;
pub use trust::{FingerprintStore, MemoryFingerprintStore, RootCa};
