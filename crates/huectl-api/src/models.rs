// CLIP v2 resource models.
//
// Only the fields huectl reads are typed; everything else the bridge sends
// is kept in `extra` so a snapshot round-trips without loss.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumIter, EnumString};

// ── Resource type tag ────────────────────────────────────────────────

/// The resource kinds huectl tracks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceType {
    Light,
    GroupedLight,
    Room,
    Zone,
    Scene,
}

impl ResourceType {
    /// Collection path relative to `/clip/v2/`.
    pub fn path(self) -> String {
        format!("resource/{self}")
    }

    /// Path of one resource relative to `/clip/v2/`.
    pub fn item_path(self, id: &str) -> String {
        format!("resource/{self}/{id}")
    }
}

// ── Shared building blocks ───────────────────────────────────────────

/// Reference to another resource (`{"rid": ..., "rtype": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    pub rid: String,
    pub rtype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archetype: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct On {
    pub on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimming {
    /// Percentage, 0–100.
    pub brightness: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_dim_level: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirekSchema {
    pub mirek_minimum: u16,
    pub mirek_maximum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTemperature {
    #[serde(default)]
    pub mirek: Option<u16>,
    #[serde(default)]
    pub mirek_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirek_schema: Option<MirekSchema>,
}

/// CIE 1931 chromaticity coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XyPoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub xy: XyPoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamut_type: Option<String>,
}

// ── Resource variants ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ResourceIdentifier>,
    pub metadata: Metadata,
    pub on: On,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimming: Option<Dimming>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<ColorTemperature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Light {
    pub fn brightness(&self) -> Option<f64> {
        self.dimming.map(|d| d.brightness)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedLight {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ResourceIdentifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on: Option<On>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimming: Option<Dimming>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A room or a zone: a named set of children with a grouped-light service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub children: Vec<ResourceIdentifier>,
    #[serde(default)]
    pub services: Vec<ResourceIdentifier>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Group {
    /// Id of the grouped-light service controlling this group's lights.
    pub fn grouped_light_id(&self) -> Option<&str> {
        self.services
            .iter()
            .find(|s| s.rtype == "grouped_light")
            .map(|s| s.rid.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ResourceIdentifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneStatus {
    pub active: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub metadata: SceneMetadata,
    /// The room or zone this scene belongs to.
    pub group: ResourceIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SceneStatus>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Scene {
    pub fn is_active(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.active != "inactive")
    }
}

// ── Tagged union ─────────────────────────────────────────────────────

/// Any tracked resource, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Light(Light),
    GroupedLight(GroupedLight),
    Room(Group),
    Zone(Group),
    Scene(Scene),
}

impl Resource {
    pub fn id(&self) -> &str {
        match self {
            Self::Light(l) => &l.id,
            Self::GroupedLight(g) => &g.id,
            Self::Room(g) | Self::Zone(g) => &g.id,
            Self::Scene(s) => &s.id,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Light(_) => ResourceType::Light,
            Self::GroupedLight(_) => ResourceType::GroupedLight,
            Self::Room(_) => ResourceType::Room,
            Self::Zone(_) => ResourceType::Zone,
            Self::Scene(_) => ResourceType::Scene,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Light(l) => Some(&l.metadata.name),
            Self::Room(g) | Self::Zone(g) => Some(&g.metadata.name),
            Self::Scene(s) => Some(&s.metadata.name),
            Self::GroupedLight(_) => None,
        }
    }
}

// ── Mutation bodies ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaAction {
    Up,
    Down,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DimmingDelta {
    pub action: DeltaAction,
    pub brightness_delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MirekUpdate {
    pub mirek: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorUpdate {
    pub xy: XyPoint,
}

/// `PUT` body for a light or grouped light. Unset fields are left alone
/// by the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LightUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on: Option<On>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimming: Option<Dimming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimming_delta: Option<DimmingDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_temperature: Option<MirekUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorUpdate>,
}

impl LightUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, on: bool) -> Self {
        self.on = Some(On { on });
        self
    }

    pub fn brightness(mut self, brightness: f64) -> Self {
        self.dimming = Some(Dimming {
            brightness,
            min_dim_level: None,
        });
        self
    }

    pub fn brightness_delta(mut self, action: DeltaAction, brightness_delta: f64) -> Self {
        self.dimming_delta = Some(DimmingDelta {
            action,
            brightness_delta,
        });
        self
    }

    pub fn mirek(mut self, mirek: u16) -> Self {
        self.color_temperature = Some(MirekUpdate { mirek });
        self
    }

    pub fn xy(mut self, x: f64, y: f64) -> Self {
        self.color = Some(ColorUpdate {
            xy: XyPoint { x, y },
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The absolute state this update will leave behind, as a JSON patch
    /// over the cached resource. Relative changes (`dimming_delta`) have no
    /// absolute form and are left out.
    pub fn state_patch(&self) -> Map<String, Value> {
        let mut patch = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        patch.remove("dimming_delta");
        patch
    }
}

/// `PUT` body recalling a scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneRecall {
    pub recall: RecallAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecallAction {
    pub action: String,
}

impl Default for SceneRecall {
    fn default() -> Self {
        Self {
            recall: RecallAction {
                action: "active".into(),
            },
        }
    }
}
