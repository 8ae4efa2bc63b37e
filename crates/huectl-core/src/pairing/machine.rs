// ── Pairing state machine ──
//
// Pure part of pairing: the state set, one transition function, and the
// effects each state asks for on entry. No I/O happens here; the driver
// runs the effects and feeds their outcomes back in as events.

use huectl_api::{BridgeIdentity, Credentials};
use serde::Serialize;
use strum::{Display, EnumIter};

use crate::error::CoreError;

/// Where pairing stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    LoadStoredCredentials,
    Discovering,
    NoBridgeFound,
    LinkWithBridge,
    Linking,
    FailedToLink,
    Connecting,
    FailedToConnect,
    Connected,
}

impl PairingState {
    /// States that wait for the user rather than for a running step.
    pub fn awaits_user(self) -> bool {
        matches!(
            self,
            Self::NoBridgeFound
                | Self::LinkWithBridge
                | Self::FailedToLink
                | Self::FailedToConnect
                | Self::Connected
        )
    }

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Self::NoBridgeFound | Self::FailedToLink | Self::FailedToConnect
        )
    }

    /// Guidance shown to the user in this state.
    pub fn guidance(self) -> Guidance {
        let (title, body) = match self {
            Self::LoadStoredCredentials => ("Loading", "Reading the saved Hue Bridge."),
            Self::Discovering => ("Discovering", "Looking for a Hue Bridge on your network."),
            Self::NoBridgeFound => (
                "No Hue Bridge found",
                "Your Hue Bridge must be switched on, plugged into your router via an \
                 Ethernet cable and connected to the same network as this device. All \
                 three blue lights on the Hue Bridge should be on.",
            ),
            Self::LinkWithBridge => (
                "Hue Bridge found",
                "Press the button in the center of the Hue Bridge, then link to connect.",
            ),
            Self::Linking => ("Linking", "Asking the Hue Bridge for an application key."),
            Self::FailedToLink => (
                "Failed to link with the Hue Bridge",
                "Press the button in the center of the Hue Bridge, then retry.",
            ),
            Self::Connecting => ("Connecting", "Opening a session with the Hue Bridge."),
            Self::FailedToConnect => (
                "Could not reach the saved Hue Bridge",
                "Check that you are on the same network as your Hue Bridge, then retry. \
                 You can also unlink the saved Hue Bridge and pair again.",
            ),
            Self::Connected => (
                "Connected to your Hue Bridge",
                "huectl is linked to your Hue Bridge. Unlink to remove the saved bridge.",
            ),
        };
        Guidance { title, body }
    }
}

/// User-facing text for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Guidance {
    pub title: &'static str,
    pub body: &'static str,
}

/// Inputs to the machine: user actions and step outcomes.
#[derive(Debug, Clone)]
pub enum PairingEvent {
    // ── User actions ─────────────────────────────────────────────────
    Link,
    Retry,
    Unlink,

    // ── Step outcomes ────────────────────────────────────────────────
    StoredCredentialsFound {
        bridge: BridgeIdentity,
        credentials: Credentials,
    },
    /// A bridge address was stored but no key.
    StoredBridgeFound { bridge: BridgeIdentity },
    NothingStored,
    BridgeDiscovered { bridge: BridgeIdentity },
    NoBridgeDiscovered,
    Linked { credentials: Credentials },
    LinkFailed { reason: String },
    ConnectSucceeded,
    ConnectFailed { reason: String },
}

impl PairingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Retry => "retry",
            Self::Unlink => "unlink",
            Self::StoredCredentialsFound { .. } => "stored_credentials_found",
            Self::StoredBridgeFound { .. } => "stored_bridge_found",
            Self::NothingStored => "nothing_stored",
            Self::BridgeDiscovered { .. } => "bridge_discovered",
            Self::NoBridgeDiscovered => "no_bridge_discovered",
            Self::Linked { .. } => "linked",
            Self::LinkFailed { .. } => "link_failed",
            Self::ConnectSucceeded => "connect_succeeded",
            Self::ConnectFailed { .. } => "connect_failed",
        }
    }

    pub fn is_user_action(&self) -> bool {
        matches!(self, Self::Link | Self::Retry | Self::Unlink)
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    LoadStoredCredentials,
    Discover,
    CreateApplicationKey,
    OpenSession,
    PersistCredentials,
    EraseCredentials,
    ShowGuidance,
}

/// The transition function. `None` means the event is not accepted in
/// `state`.
pub fn transition(state: PairingState, event: &PairingEvent) -> Option<PairingState> {
    use PairingEvent as E;
    use PairingState as S;

    let next = match (state, event) {
        (S::LoadStoredCredentials, E::StoredCredentialsFound { .. })
        | (S::Linking, E::Linked { .. })
        | (S::FailedToConnect, E::Retry) => S::Connecting,
        (S::LoadStoredCredentials, E::StoredBridgeFound { .. })
        | (S::Discovering, E::BridgeDiscovered { .. }) => S::LinkWithBridge,
        (S::LoadStoredCredentials, E::NothingStored) | (S::NoBridgeFound, E::Retry) => {
            S::Discovering
        }
        (S::Discovering, E::NoBridgeDiscovered) => S::NoBridgeFound,
        (S::LinkWithBridge, E::Link) | (S::FailedToLink, E::Retry) => S::Linking,
        (S::Linking, E::LinkFailed { .. }) => S::FailedToLink,
        (S::Connecting, E::ConnectSucceeded) => S::Connected,
        (S::Connecting, E::ConnectFailed { .. }) => S::FailedToConnect,
        (
            S::LinkWithBridge
            | S::Linking
            | S::FailedToLink
            | S::Connecting
            | S::FailedToConnect
            | S::Connected,
            E::Unlink,
        ) => S::Discovering,
        _ => return None,
    };
    Some(next)
}

/// Effects run on entering `state`.
pub fn entry_effects(state: PairingState) -> &'static [Effect] {
    match state {
        PairingState::LoadStoredCredentials => &[Effect::LoadStoredCredentials],
        PairingState::Discovering => &[Effect::Discover],
        PairingState::Linking => &[Effect::CreateApplicationKey],
        PairingState::Connecting => &[Effect::OpenSession],
        PairingState::Connected => &[Effect::PersistCredentials, Effect::ShowGuidance],
        PairingState::NoBridgeFound
        | PairingState::LinkWithBridge
        | PairingState::FailedToLink
        | PairingState::FailedToConnect => &[Effect::ShowGuidance],
    }
}

/// Effects run by the transition itself, before any entry effects.
pub fn transition_effects(event: &PairingEvent) -> &'static [Effect] {
    match event {
        PairingEvent::Unlink => &[Effect::EraseCredentials],
        _ => &[],
    }
}

// ── Machine ──────────────────────────────────────────────────────────

/// What pairing has learned so far.
#[derive(Debug, Clone, Default)]
pub struct PairingContext {
    pub bridge: Option<BridgeIdentity>,
    pub credentials: Option<Credentials>,
    /// Why the last step failed, while in a failure state.
    pub last_error: Option<String>,
    /// Address or key came from discovery or linking, not from storage.
    pub unsaved: bool,
}

/// The state plus its context. Only [`handle`](Self::handle) mutates it.
#[derive(Debug, Clone)]
pub struct PairingMachine {
    state: PairingState,
    context: PairingContext,
}

impl Default for PairingMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingMachine {
    pub fn new() -> Self {
        Self {
            state: PairingState::LoadStoredCredentials,
            context: PairingContext::default(),
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn context(&self) -> &PairingContext {
        &self.context
    }

    /// Effects of the initial state, which is entered without an event.
    pub fn initial_effects(&self) -> &'static [Effect] {
        entry_effects(self.state)
    }

    /// Apply `event`, returning the effects to run in order.
    pub fn handle(&mut self, event: PairingEvent) -> Result<Vec<Effect>, CoreError> {
        let next = transition(self.state, &event).ok_or_else(|| CoreError::InvalidTransition {
            state: self.state.to_string(),
            event: event.name().to_owned(),
        })?;

        let mut effects = transition_effects(&event).to_vec();
        effects.extend_from_slice(entry_effects(next));

        let ctx = &mut self.context;
        match event {
            PairingEvent::StoredCredentialsFound {
                bridge,
                credentials,
            } => {
                ctx.bridge = Some(bridge);
                ctx.credentials = Some(credentials);
            }
            PairingEvent::StoredBridgeFound { bridge } => ctx.bridge = Some(bridge),
            PairingEvent::BridgeDiscovered { bridge } => {
                ctx.bridge = Some(bridge);
                ctx.unsaved = true;
            }
            PairingEvent::Linked { credentials } => {
                ctx.credentials = Some(credentials);
                ctx.unsaved = true;
            }
            PairingEvent::LinkFailed { reason } | PairingEvent::ConnectFailed { reason } => {
                ctx.last_error = Some(reason);
            }
            PairingEvent::Unlink => {
                ctx.bridge = None;
                ctx.credentials = None;
                ctx.unsaved = false;
            }
            _ => {}
        }
        if !next.is_failure() {
            ctx.last_error = None;
        }

        self.state = next;
        Ok(effects)
    }

    /// Mark the context as written to storage.
    pub fn mark_saved(&mut self) {
        self.context.unsaved = false;
    }
}
