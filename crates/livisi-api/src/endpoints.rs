// ── REST endpoint methods ──
//
// Inherent methods on `Session`, one per hub endpoint, kept separate
// from the transport mechanics in `session.rs`. All methods return raw
// wire types; `livisi-core` owns the conversion into domain types.

use reqwest::Method;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Error;
use crate::models::{
    ActionRequest, ActionResponse, Controller, RawCapability, RawDevice, RawLocation, RawMessage,
};
use crate::session::Session;

/// Default command namespace on the hub.
pub const NAMESPACE_CORE: &str = "core.RWE";

/// Command type for state writes.
pub const COMMAND_SET_STATE: &str = "SetState";

/// Command type for restarting the controller itself.
pub const COMMAND_RESTART: &str = "Restart";

/// State keys used by the typed command helpers.
pub const ON_STATE: &str = "onState";
pub const VALUE: &str = "value";
pub const POINT_TEMPERATURE: &str = "pointTemperature";
pub const SETPOINT_TEMPERATURE: &str = "setpointTemperature";

impl Session {
    // ── Inventory reads ──────────────────────────────────────────────

    /// `GET /status` -- current controller metadata.
    pub async fn get_status(&self) -> Result<Controller, Error> {
        self.get_typed("status").await
    }

    /// `GET /message` -- pending hub notifications.
    pub async fn get_messages(&self) -> Result<Vec<RawMessage>, Error> {
        self.get_typed("message").await
    }

    /// `GET /device` -- all devices, including the controller itself.
    pub async fn get_devices(&self) -> Result<Vec<RawDevice>, Error> {
        self.get_typed("device").await
    }

    /// `GET /capability` -- all capabilities across all devices.
    pub async fn get_capabilities(&self) -> Result<Vec<RawCapability>, Error> {
        self.get_typed("capability").await
    }

    /// `GET /location` -- all configured rooms.
    pub async fn get_locations(&self) -> Result<Vec<RawLocation>, Error> {
        self.get_typed("location").await
    }

    // ── State reads ──────────────────────────────────────────────────

    /// `GET /device/{id}/state` -- the controller's own state bag.
    ///
    /// v1 firmware nests the bag under a `state` field; we unwrap it so
    /// callers see one shape.
    pub async fn get_device_state(&self, device_id: &str) -> Result<Value, Error> {
        let value = self
            .request(Method::GET, &format!("device/{device_id}/state"), None)
            .await?;
        if self.controller().is_v1() {
            if let Some(inner) = value.get("state") {
                return Ok(inner.clone());
            }
        }
        Ok(value)
    }

    /// `GET /capability/{id}/state` -- one capability's property bag.
    pub async fn get_capability_state(&self, capability_id: &str) -> Result<Value, Error> {
        self.request(
            Method::GET,
            &format!("capability/{capability_id}/state"),
            None,
        )
        .await
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// `POST /action` with the standard command envelope.
    ///
    /// Returns `Ok(true)` iff the hub answered `resultCode: "Success"`.
    /// Restart is special-cased: the SHC reboots immediately upon
    /// processing it and never answers the request, so a dropped
    /// connection counts as success for that one command.
    pub async fn send_action(&self, action: &ActionRequest) -> Result<bool, Error> {
        let payload = serde_json::to_value(action)
            .map_err(|e| Error::Internal(format!("unserializable action: {e}")))?;

        match self.request(Method::POST, "action", Some(&payload)).await {
            Ok(value) => {
                let response: ActionResponse =
                    serde_json::from_value(value).unwrap_or(ActionResponse { result_code: None });
                Ok(response.is_success())
            }
            Err(Error::Unreachable(reason)) if action.command_type == COMMAND_RESTART => {
                debug!(%reason, "controller dropped connection on restart; treating as success");
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Send a command to a device target.
    pub async fn send_device_command(
        &self,
        device_id: &str,
        command_type: &str,
        namespace: &str,
        params: Map<String, Value>,
    ) -> Result<bool, Error> {
        let action = ActionRequest::new(
            command_type,
            namespace,
            format!("/device/{device_id}"),
            params,
        );
        self.send_action(&action).await
    }

    /// Send a command to a capability target.
    pub async fn send_capability_command(
        &self,
        capability_id: &str,
        command_type: &str,
        namespace: &str,
        params: Map<String, Value>,
    ) -> Result<bool, Error> {
        let action = ActionRequest::new(
            command_type,
            namespace,
            format!("/capability/{capability_id}"),
            params,
        );
        self.send_action(&action).await
    }

    /// Set one state key on a capability (`SetState` with a constant
    /// value parameter).
    pub async fn set_capability_state(
        &self,
        capability_id: &str,
        key: &str,
        value: Value,
    ) -> Result<bool, Error> {
        let mut params = Map::new();
        params.insert(
            key.to_owned(),
            serde_json::json!({"type": "Constant", "value": value}),
        );
        self.send_capability_command(capability_id, COMMAND_SET_STATE, NAMESPACE_CORE, params)
            .await
    }

    /// Switch a `SwitchActuator`-style capability on or off.
    pub async fn set_on_state(&self, capability_id: &str, is_on: bool) -> Result<bool, Error> {
        self.set_capability_state(capability_id, ON_STATE, Value::Bool(is_on))
            .await
    }

    /// Set a boolean variable capability.
    pub async fn set_value(&self, capability_id: &str, value: bool) -> Result<bool, Error> {
        self.set_capability_state(capability_id, VALUE, Value::Bool(value))
            .await
    }

    /// Set a climate-control target temperature. The parameter name
    /// differs by hub generation.
    pub async fn set_target_temperature(
        &self,
        capability_id: &str,
        temperature: f64,
    ) -> Result<bool, Error> {
        let key = if self.controller().is_v2() {
            SETPOINT_TEMPERATURE
        } else {
            POINT_TEMPERATURE
        };
        self.set_capability_state(capability_id, key, serde_json::json!(temperature))
            .await
    }

    /// Restart the controller itself.
    pub async fn restart_controller(&self, controller_device_id: &str) -> Result<bool, Error> {
        self.send_device_command(controller_device_id, COMMAND_RESTART, NAMESPACE_CORE, Map::new())
            .await
    }
}
