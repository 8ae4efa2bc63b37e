//! Stateful layer between `huectl-api` and the CLI.
//!
//! - **[`Bridge`]**: connected-bridge facade. [`connect()`](Bridge::connect)
//!   opens a session, loads every tracked resource into the
//!   [`ResourceCache`], then follows the event stream. Writes go through
//!   [`Bridge::execute`], which patches the cache optimistically and rolls
//!   back if the bridge refuses.
//!
//! - **[`CommandQueue`]**: per-class FIFO queues with a minimum spacing
//!   between dispatches (10/s for lights, 1/s for groups and scenes).
//!
//! - **[`ResourceCache`]**: `DashMap` + `tokio::sync::watch` collections,
//!   one per resource type, fed by snapshots and event-stream partials.
//!
//! - **[`pairing`]**: the pairing state machine and its driver, from
//!   stored credentials or discovery through linking to a live session.
//!
//! - **[`BridgeStorage`]**: key-value persistence for the bridge address,
//!   application key and pinned certificate fingerprint.

pub mod bridge;
pub mod command;
pub mod config;
pub mod error;
pub mod pairing;
pub mod queue;
pub mod storage;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::{Bridge, StreamState};
pub use command::{Command, Step};
pub use config::{BridgeConfig, DEFAULT_DEVICETYPE};
pub use error::CoreError;
pub use pairing::{
    BridgeBackend, Guidance, PairingBackend, PairingEvent, PairingHandle, PairingSnapshot,
    PairingState,
};
pub use queue::{CommandQueue, QueueLimits, RateLimit, ResourceClass};
pub use storage::{BridgeStorage, MemoryStorage, StorageKey, StoredFingerprint, StoredPairing};
pub use store::{OptimisticWrite, ResourceCache};
pub use stream::{ResourceStream, Snapshot};

// Wire-level types callers need alongside the core API.
pub use huectl_api::models::{LightUpdate, ResourceIdentifier};
pub use huectl_api::{BridgeIdentity, Credentials, Resource, ResourceType, TransportConfig};
