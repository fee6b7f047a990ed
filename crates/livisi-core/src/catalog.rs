// ── Device catalog builder ──
//
// Turns the hub's REST inventory (devices, capabilities, locations,
// pending messages) into the canonical device list. The whole poll is
// all-or-nothing: any inventory fetch failure aborts the call and no
// partial catalog is ever returned. Only the controller's own state
// snapshot is best-effort.

use std::collections::{HashMap, HashSet};

use chrono::DateTime;
use tracing::{debug, warn};

use livisi_api::Session;
use livisi_api::models::{RawCapability, RawDevice, RawLocation, RawMessage, strip_id_prefix};

use crate::error::CoreError;
use crate::model::{CONTROLLER_DEVICE_TYPES, Device};

// Message types carrying derived device flags.
const MSG_LOW_BATTERY: &str = "DeviceLowBattery";
const MSG_UPDATE_AVAILABLE: &str = "DeviceUpdateAvailable";
const MSG_PRODUCT_UPDATED: &str = "ProductUpdated";
const MSG_SHC_UPDATE_COMPLETED: &str = "ShcUpdateCompleted";
const MSG_UNREACHABLE: &str = "DeviceUnreachable";

/// Device-id sets derived from the hub's pending messages.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct MessageFlags {
    pub low_battery: HashSet<String>,
    pub update_available: HashSet<String>,
    pub updated: HashSet<String>,
    pub unreachable: HashSet<String>,
}

/// Fetch the full device inventory and assemble the catalog.
pub async fn fetch_catalog(session: &Session) -> Result<Vec<Device>, CoreError> {
    // Messages first, and serially: besides yielding the derived flags,
    // this forces any pending token refresh through the single-flight
    // lock before the parallel fan-out below would race N refreshes.
    let messages = session.get_messages().await?;
    let flags = classify_messages(&messages);

    let (devices, capabilities, locations, status) = tokio::join!(
        session.get_devices(),
        session.get_capabilities(),
        session.get_locations(),
        session.get_status(),
    );
    let raw_devices = devices?;
    let capabilities = capabilities?;
    let locations = locations?;
    let status = status?;

    if !status.is_active() {
        return Err(CoreError::UpdateFailed(format!(
            "hub reports non-active operational status ({})",
            status.operation_status.as_deref().unwrap_or("unknown")
        )));
    }

    // The controller appears in its own device list; its state snapshot
    // is fetched separately and tolerated to fail.
    let controller_id = raw_devices
        .iter()
        .find(|d| CONTROLLER_DEVICE_TYPES.contains(&d.device_type.as_str()))
        .map(|d| d.id.clone());
    let mut controller_state = None;
    if let Some(id) = controller_id {
        match session.get_device_state(&id).await {
            Ok(state) => controller_state = Some(state),
            Err(e) => warn!(error = %e, "error getting controller state"),
        }
    }

    let catalog = assemble_devices(raw_devices, &capabilities, &locations, &flags, controller_state);
    debug!(devices = catalog.len(), "loaded device catalog");
    Ok(catalog)
}

/// Classify pending messages into per-flag device-id sets.
///
/// A message naming zero devices falls back to its own `source`; a
/// message whose timestamp does not parse cannot be ordered and is
/// skipped entirely.
pub(crate) fn classify_messages(messages: &[RawMessage]) -> MessageFlags {
    let mut flags = MessageFlags::default();

    for message in messages {
        let parseable = message
            .timestamp
            .as_deref()
            .is_some_and(|ts| DateTime::parse_from_rfc3339(ts).is_ok());
        if !parseable {
            warn!(
                message_type = ?message.message_type,
                "skipping message with unparseable timestamp"
            );
            continue;
        }

        let mut device_ids: Vec<String> = message
            .devices
            .iter()
            .map(|d| strip_id_prefix(d).to_owned())
            .collect();
        if device_ids.is_empty() {
            if let Some(source) = message.source.as_deref() {
                device_ids.push(strip_id_prefix(source).to_owned());
            }
        }

        let target = match message.message_type.as_deref() {
            Some(MSG_LOW_BATTERY) => &mut flags.low_battery,
            Some(MSG_UPDATE_AVAILABLE) => &mut flags.update_available,
            Some(MSG_PRODUCT_UPDATED | MSG_SHC_UPDATE_COMPLETED) => &mut flags.updated,
            Some(MSG_UNREACHABLE) => &mut flags.unreachable,
            _ => continue,
        };
        target.extend(device_ids);
    }

    flags
}

/// Merge raw devices, capability maps, room names, message flags and the
/// controller state snapshot into the final catalog.
pub(crate) fn assemble_devices(
    raw_devices: Vec<RawDevice>,
    capabilities: &[RawCapability],
    locations: &[RawLocation],
    flags: &MessageFlags,
    controller_state: Option<serde_json::Value>,
) -> Vec<Device> {
    // Capability id and config lookups keyed by owning device id. The
    // owner reference arrives prefixed (`/device/{id}`).
    let mut capability_map: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut capability_config: HashMap<String, HashMap<String, serde_json::Value>> =
        HashMap::new();
    for capability in capabilities {
        let Some(owner) = capability.device.as_deref() else {
            continue;
        };
        let device_id = strip_id_prefix(owner).to_owned();
        capability_map
            .entry(device_id.clone())
            .or_default()
            .insert(capability.capability_type.clone(), capability.id.clone());
        if let Some(config) = &capability.config {
            capability_config
                .entry(device_id)
                .or_default()
                .insert(capability.capability_type.clone(), config.clone());
        }
    }

    let mut room_names: HashMap<String, String> = HashMap::new();
    for location in locations {
        if let (Some(id), Some(name)) = (location.id.as_deref(), location.name()) {
            room_names.insert(id.to_owned(), name.to_owned());
        }
    }

    raw_devices
        .into_iter()
        .map(|raw| {
            let room_id = raw
                .location
                .as_deref()
                .map(|reference| strip_id_prefix(reference).to_owned());
            let room = room_id
                .as_deref()
                .and_then(|id| room_names.get(id).cloned());
            let is_controller = CONTROLLER_DEVICE_TYPES.contains(&raw.device_type.as_str());

            Device {
                battery_low: flags.low_battery.contains(&raw.id),
                update_available: flags.update_available.contains(&raw.id),
                updated: flags.updated.contains(&raw.id),
                unreachable: flags.unreachable.contains(&raw.id),
                capabilities: capability_map.remove(&raw.id).unwrap_or_default(),
                capability_config: capability_config.remove(&raw.id).unwrap_or_default(),
                state: if is_controller {
                    controller_state.clone()
                } else {
                    None
                },
                room_id,
                room,
                id: raw.id,
                device_type: raw.device_type,
                manufacturer: raw.manufacturer,
                product: raw.product,
                version: raw.version,
                device_class: raw.device_class,
                desc: raw.desc,
                config: raw.config,
                tags: raw.tags,
            }
        })
        .collect()
}
