// ── Raw wire types ──
//
// Shapes as the SHC sends them. `livisi-core` converts these into the
// canonical domain model; nothing here is exposed to end consumers.
// Optional everywhere: hub firmware revisions disagree on which fields
// they include, so missing data must never fail deserialization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Controller generation names reported in `GET /status`.
pub const CONTROLLER_TYPE_V1: &str = "Classic";
pub const CONTROLLER_TYPE_V2: &str = "Avatar";

/// Operational status the hub reports when it is fully up.
pub const OPERATION_STATUS_ACTIVE: &str = "active";

/// Response of `POST /auth/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub errorcode: Option<u32>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Controller metadata from `GET /status`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub controller_type: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub operation_status: Option<String>,
    /// Everything else the hub includes (network config, app version, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Controller {
    /// Second-generation ("Avatar") hub.
    pub fn is_v2(&self) -> bool {
        self.controller_type.as_deref() == Some(CONTROLLER_TYPE_V2)
    }

    /// First-generation ("Classic") hub.
    pub fn is_v1(&self) -> bool {
        self.controller_type.as_deref() == Some(CONTROLLER_TYPE_V1)
    }

    /// `false` once the hub reports a non-active operational status
    /// (rebooting, updating). Absent means older firmware -- assume active.
    pub fn is_active(&self) -> bool {
        match self.operation_status.as_deref() {
            Some(status) => status == OPERATION_STATUS_ACTIVE,
            None => true,
        }
    }
}

/// One entry of `GET /device`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDevice {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "class")]
    pub device_class: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    /// Prefixed room reference, e.g. `/location/abc123`.
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// One entry of `GET /capability`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCapability {
    pub id: String,
    #[serde(rename = "type")]
    pub capability_type: String,
    /// Prefixed owner reference, e.g. `/device/abc123`.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

/// One entry of `GET /location`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLocation {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

impl RawLocation {
    /// Room name from the location config, when present.
    pub fn name(&self) -> Option<&str> {
        self.config.as_ref()?.get("name")?.as_str()
    }
}

/// One entry of `GET /message` (pending hub notifications).
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Affected device references (prefixed ids).
    #[serde(default)]
    pub devices: Vec<String>,
    /// Fallback device reference when `devices` is empty.
    #[serde(default)]
    pub source: Option<String>,
}

/// Command envelope for `POST /action`.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub command_type: String,
    pub namespace: String,
    pub target: String,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ActionRequest {
    /// Build an action envelope with a fresh request id.
    pub fn new(
        command_type: impl Into<String>,
        namespace: impl Into<String>,
        target: impl Into<String>,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            command_type: command_type.into(),
            namespace: namespace.into(),
            target: target.into(),
            params,
        }
    }
}

/// Response of `POST /action`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResponse {
    #[serde(default)]
    pub result_code: Option<String>,
}

impl ActionResponse {
    pub fn is_success(&self) -> bool {
        self.result_code.as_deref() == Some("Success")
    }
}

/// Strip the URL-style prefixes the hub puts on entity references,
/// returning the bare id.
pub fn strip_id_prefix(reference: &str) -> &str {
    reference
        .trim_start_matches("/device/")
        .trim_start_matches("/capability/")
        .trim_start_matches("/location/")
}
