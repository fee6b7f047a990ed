// ── Typed events and topics ──
//
// Push frames are classified into this closed enum before fan-out;
// subscribers match on the tag instead of parsing concatenated topic
// strings.

use serde::{Deserialize, Serialize};

/// State properties recognized for per-(capability, property) fan-out.
/// An inbound state-changed frame produces one [`HubEvent::StateChanged`]
/// per entry of this list present in its property bag.
pub const STATE_PROPERTIES: [&str; 17] = [
    "onState",
    "value",
    "pointTemperature",
    "setpointTemperature",
    "temperature",
    "humidity",
    "luminance",
    "isOpen",
    "isSmokeAlarm",
    "powerConsumptionWatt",
    "shutterLevel",
    "dimLevel",
    "operationMode",
    "energyPerDayInKWh",
    "energyPerMonthInKWh",
    "totalEnergy",
    "powerInWatt",
];

/// Property carrying reachability transitions inside state-changed frames.
pub const PROPERTY_IS_REACHABLE: &str = "isReachable";

/// How a button was pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonPressType {
    Short,
    Long,
}

impl ButtonPressType {
    /// Parse the hub's press-type string; anything unknown counts as a
    /// short press, matching hub app behavior.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("LongPress") => Self::Long,
            _ => Self::Short,
        }
    }
}

/// A normalized event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HubEvent {
    ButtonPressed {
        device_id: String,
        capability_id: String,
        button_index: u32,
        press_type: ButtonPressType,
    },
    MotionDetected {
        device_id: String,
        capability_id: String,
    },
    ReachabilityChanged {
        device_id: String,
        reachable: bool,
    },
    StateChanged {
        capability_id: String,
        property: String,
        value: serde_json::Value,
    },
}

/// Routing key for subscriptions. Structured data, not a concatenated
/// string -- the coordinator publishes each [`HubEvent`] to exactly the
/// topics its variant implies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Reachability transitions of one device.
    Reachability { device_id: String },
    /// One state property of one capability.
    State {
        capability_id: String,
        property: String,
    },
    /// Discrete events (button, motion) of one capability.
    CapabilityEvent { capability_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_type_parsing() {
        assert_eq!(ButtonPressType::from_wire(Some("LongPress")), ButtonPressType::Long);
        assert_eq!(ButtonPressType::from_wire(Some("ShortPress")), ButtonPressType::Short);
        assert_eq!(ButtonPressType::from_wire(None), ButtonPressType::Short);
        assert_eq!(ButtonPressType::from_wire(Some("weird")), ButtonPressType::Short);
    }

    #[test]
    fn topics_with_same_key_are_equal() {
        let a = Topic::State {
            capability_id: "c1".into(),
            property: "onState".into(),
        };
        let b = Topic::State {
            capability_id: "c1".into(),
            property: "onState".into(),
        };
        assert_eq!(a, b);
    }
}
