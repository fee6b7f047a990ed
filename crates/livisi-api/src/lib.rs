// livisi-api: Async Rust client for the LIVISI Smart Home Controller
// (REST surface + websocket push channel).

pub mod endpoints;
pub mod error;
pub mod models;
pub mod session;
pub mod token;
pub mod transport;
pub mod websocket;

pub use error::Error;
pub use session::{Session, connect};
pub use token::Credential;
pub use transport::TransportConfig;
pub use websocket::{ChannelState, CloseSink, EventSink, PushEvent};
