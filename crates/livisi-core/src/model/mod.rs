// ── Domain model ──

pub mod device;
pub mod event;

pub use device::{CONTROLLER_DEVICE_TYPES, Device};
pub use event::{
    ButtonPressType, HubEvent, PROPERTY_IS_REACHABLE, STATE_PROPERTIES, Topic,
};
