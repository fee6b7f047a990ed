// livisi-core: Domain layer between livisi-api and consumers.
//
// Turns the hub's raw REST/websocket surfaces into a canonical device
// catalog plus a typed, topic-keyed event stream, kept in sync by
// polling and push together.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::HubConfig;
pub use coordinator::HubCoordinator;
pub use error::CoreError;
pub use model::{
    ButtonPressType, CONTROLLER_DEVICE_TYPES, Device, HubEvent, STATE_PROPERTIES, Topic,
};

// Re-export the raw API surface for embedders that need to drop down.
pub use livisi_api as api;
