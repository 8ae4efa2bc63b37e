//! Pairing: find a bridge, obtain an application key, connect.
//!
//! [`machine`] is the pure state machine; [`PairingHandle`] drives it
//! against a [`PairingBackend`].

mod backend;
mod driver;
pub mod machine;

pub use backend::BridgeBackend;
pub use driver::{PairingBackend, PairingHandle, PairingSnapshot};
pub use machine::{Guidance, PairingEvent, PairingState};
