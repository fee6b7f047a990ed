// ── Core error types ──
//
// User-facing errors from livisi-core. Consumers never see raw HTTP or
// websocket failures -- the `From<livisi_api::Error>` impl translates
// transport-layer errors into domain-appropriate variants. Setup-time
// callers match the first three variants to tell the operator whether
// the password, the address, or the network is wrong.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Setup errors ─────────────────────────────────────────────────
    #[error("The hub password is wrong")]
    WrongCredentials,

    #[error("The address does not belong to a Smart Home Controller: {0}")]
    InvalidHost(String),

    #[error("Cannot reach the Smart Home Controller: {0}")]
    Unreachable(String),

    // ── Steady-state errors ──────────────────────────────────────────
    /// A catalog poll failed as a whole. All known devices have already
    /// been marked unreachable when this surfaces.
    #[error("Device update failed: {0}")]
    UpdateFailed(String),

    /// An operation was attempted on a coordinator that is shut down.
    #[error("Hub connection is closed")]
    Disconnected,

    /// The hub reported a specific error code.
    #[error("Hub error {code}: {message}")]
    Hub { code: u32, message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<livisi_api::Error> for CoreError {
    fn from(err: livisi_api::Error) -> Self {
        match err {
            livisi_api::Error::WrongCredentials => CoreError::WrongCredentials,
            livisi_api::Error::InvalidHost(message) => CoreError::InvalidHost(message),
            livisi_api::Error::Unreachable(reason) => CoreError::Unreachable(reason),
            livisi_api::Error::ErrorCode { code } => CoreError::Hub {
                code,
                message: livisi_api::error::error_description(code).to_owned(),
            },
            livisi_api::Error::NotConnected => CoreError::Disconnected,
            livisi_api::Error::InvalidResponse { message, .. } => {
                CoreError::Internal(format!("invalid hub response: {message}"))
            }
            livisi_api::Error::WebSocketConnect(reason)
            | livisi_api::Error::WebSocketRead(reason) => {
                CoreError::Unreachable(format!("push channel failed: {reason}"))
            }
            livisi_api::Error::Internal(message) => CoreError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_maps_to_hub_variant() {
        let err = CoreError::from(livisi_api::Error::ErrorCode { code: 2007 });
        match err {
            CoreError::Hub { code, message } => {
                assert_eq!(code, 2007);
                assert!(message.contains("expired"));
            }
            other => panic!("unexpected mapping: {other:?}"),
        }
    }

    #[test]
    fn setup_errors_stay_distinguishable() {
        assert!(matches!(
            CoreError::from(livisi_api::Error::WrongCredentials),
            CoreError::WrongCredentials
        ));
        assert!(matches!(
            CoreError::from(livisi_api::Error::InvalidHost("html".into())),
            CoreError::InvalidHost(_)
        ));
        assert!(matches!(
            CoreError::from(livisi_api::Error::Unreachable("timeout".into())),
            CoreError::Unreachable(_)
        ));
    }
}
