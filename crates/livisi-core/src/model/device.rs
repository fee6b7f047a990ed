// ── Device domain type ──
//
// The canonical device record assembled by the catalog builder. Fixed
// shape with explicit optional fields -- missing hub data never turns
// into dynamic probing downstream.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Type codes of the controller pseudo-device (the hub itself appears in
/// its own device list).
pub const CONTROLLER_DEVICE_TYPES: [&str; 2] = ["SHC", "SHCA"];

/// Tag key the hub app uses to reclassify generic device types, e.g. a
/// switch actuator tagged as a light.
const TAG_TYPE_CATEGORY: &str = "typeCategory";

/// One physical or virtual end-device, with its capabilities, room and
/// derived status flags merged in.
///
/// Rebuilt wholesale on every catalog refresh; consumers hold immutable
/// snapshots and diff against their own known-id sets to detect
/// additions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Device {
    /// Stable hub-assigned identifier.
    pub id: String,

    /// Hub type code, e.g. `"WDS"`, `"PSS"`, `"SHCA"`.
    #[serde(rename = "type")]
    pub device_type: String,

    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub version: Option<String>,
    pub device_class: Option<String>,
    pub desc: Option<String>,

    /// Device configuration (name, etc.) as the hub stores it.
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,

    /// Free-form tag metadata set by the hub app.
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Capability-type-name → capability id. Capability ids are unique
    /// within the hub but not guaranteed stable across firmware
    /// upgrades.
    #[serde(default)]
    pub capabilities: HashMap<String, String>,

    /// Capability-type-name → static capability configuration
    /// (e.g. min/max temperature bounds).
    #[serde(default)]
    pub capability_config: HashMap<String, serde_json::Value>,

    /// Assigned room, resolved from the hub's location list.
    pub room_id: Option<String>,
    pub room: Option<String>,

    /// State snapshot; populated for the controller pseudo-device only.
    pub state: Option<serde_json::Value>,

    // Derived flags, computed from the hub's pending messages.
    pub battery_low: bool,
    pub update_available: bool,
    /// Recently updated (product update completed).
    pub updated: bool,
    pub unreachable: bool,
}

impl Device {
    /// Device name from config.
    pub fn name(&self) -> Option<&str> {
        self.config.get("name")?.as_str()
    }

    /// Tag type category, used to reclassify generic types.
    pub fn tag_category(&self) -> Option<&str> {
        self.tags.get(TAG_TYPE_CATEGORY).map(String::as_str)
    }

    /// Whether this record is the controller pseudo-device.
    pub fn is_controller(&self) -> bool {
        CONTROLLER_DEVICE_TYPES.contains(&self.device_type.as_str())
    }

    /// Capability id for a capability type name, if the device has it.
    pub fn capability_id(&self, capability_type: &str) -> Option<&str> {
        self.capabilities.get(capability_type).map(String::as_str)
    }
}
