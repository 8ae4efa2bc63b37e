// ── Command API ──
//
// All write operations flow through a unified `Command` enum. The bridge
// facade queues each one under its resource class and mirrors absolute
// state changes into the cache before the bridge confirms them.

use huectl_api::models::{LightUpdate, MirekSchema, SceneRecall};
use huectl_api::ResourceType;
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::queue::ResourceClass;

/// All write operations against a bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    UpdateLight { id: String, update: LightUpdate },
    UpdateGroupedLight { id: String, update: LightUpdate },
    RecallScene { id: String },
}

impl Command {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::UpdateLight { .. } => ResourceType::Light,
            Self::UpdateGroupedLight { .. } => ResourceType::GroupedLight,
            Self::RecallScene { .. } => ResourceType::Scene,
        }
    }

    /// Id of the resource the command writes to.
    pub fn target(&self) -> &str {
        match self {
            Self::UpdateLight { id, .. }
            | Self::UpdateGroupedLight { id, .. }
            | Self::RecallScene { id } => id,
        }
    }

    pub fn class(&self) -> ResourceClass {
        ResourceClass::of(self.resource_type())
    }

    pub(crate) fn body(&self) -> Result<Value, CoreError> {
        let body = match self {
            Self::UpdateLight { update, .. } | Self::UpdateGroupedLight { update, .. } => {
                serde_json::to_value(update)
            }
            Self::RecallScene { .. } => serde_json::to_value(SceneRecall::default()),
        };
        body.map_err(|e| CoreError::Internal(format!("cannot encode command: {e}")))
    }

    /// The state the cache should show while the command is in flight.
    /// Scene recalls have none: the bridge reports their effect as events.
    pub(crate) fn optimistic_patch(&self) -> Option<Map<String, Value>> {
        match self {
            Self::UpdateLight { update, .. } | Self::UpdateGroupedLight { update, .. } => {
                let patch = update.state_patch();
                (!patch.is_empty()).then_some(patch)
            }
            Self::RecallScene { .. } => None,
        }
    }
}

// ── Stepping ─────────────────────────────────────────────────────────

/// Direction of a relative change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
}

/// Brightness change per step, in percent.
pub const BRIGHTNESS_STEP: f64 = 10.0;
pub const MIN_BRIGHTNESS: f64 = 1.0;
pub const MAX_BRIGHTNESS: f64 = 100.0;

/// Mirek range assumed when a light does not report one.
pub const DEFAULT_MIREK_SCHEMA: MirekSchema = MirekSchema {
    mirek_minimum: 153,
    mirek_maximum: 500,
};

pub fn clamp_brightness(brightness: f64) -> f64 {
    brightness.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS)
}

/// One brightness step from `current`, kept within 1–100.
pub fn step_brightness(current: f64, step: Step) -> f64 {
    match step {
        Step::Up => clamp_brightness(current + BRIGHTNESS_STEP),
        Step::Down => clamp_brightness(current - BRIGHTNESS_STEP),
    }
}

/// One colour-temperature step (a tenth of the light's range). `Up` is
/// warmer, i.e. a higher mirek value.
pub fn step_mirek(current: u16, schema: MirekSchema, step: Step) -> u16 {
    let range = schema.mirek_maximum.saturating_sub(schema.mirek_minimum);
    let delta = (range / 10).max(1);
    let next = match step {
        Step::Up => current.saturating_add(delta),
        Step::Down => current.saturating_sub(delta),
    };
    next.clamp(schema.mirek_minimum, schema.mirek_maximum)
}
