use thiserror::Error;

/// Error code the SHC sends when the bearer token has expired.
pub const ERROR_CODE_TOKEN_EXPIRED: u32 = 2007;

/// Error codes the SHC sends for a rejected login.
pub const ERROR_CODES_BAD_CREDENTIALS: [u32; 2] = [2003, 2009];

/// Top-level error type for the `livisi-api` crate.
///
/// Covers every failure mode across the REST and websocket surfaces.
/// `livisi-core` maps these into domain-level errors; setup-time callers
/// match on the first three variants to give the operator an actionable
/// message (wrong password vs. wrong address vs. powered-off hub).
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The SHC rejected the password (error codes 2003/2009).
    #[error("Invalid user credentials")]
    WrongCredentials,

    /// The host answered, but not like a Smart Home Controller
    /// (empty or unparseable response body).
    #[error("Host did not answer like a Smart Home Controller: {0}")]
    InvalidHost(String),

    // ── Transport ───────────────────────────────────────────────────
    /// Network-level failure: timeout, connection refused, DNS.
    #[error("Smart Home Controller unreachable: {0}")]
    Unreachable(String),

    // ── Hub-reported ────────────────────────────────────────────────
    /// The SHC answered with an `errorcode` field (other than token
    /// expiry, which is handled transparently).
    #[error("controller error code {code}: {}", error_description(*.code))]
    ErrorCode { code: u32 },

    /// The response body did not match the expected shape.
    #[error("Invalid response from controller: {message}")]
    InvalidResponse { message: String, body: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// The event channel could not be established.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The event channel dropped mid-read.
    #[error("WebSocket read failed: {0}")]
    WebSocketRead(String),

    // ── Session state ───────────────────────────────────────────────
    /// An operation was attempted without an authenticated session.
    #[error("Not authenticated to the Smart Home Controller")]
    NotConnected,

    // ── Catch-all ───────────────────────────────────────────────────
    /// Unexpected failure; always logged at the site that raises it.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying on the
    /// next poll interval.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::WebSocketConnect(_) | Self::WebSocketRead(_)
        )
    }

    /// Extract the hub-reported error code, if any.
    pub fn error_code(&self) -> Option<u32> {
        match self {
            Self::ErrorCode { code } => Some(*code),
            _ => None,
        }
    }
}

/// Human-readable descriptions for the SHC error codes, taken from the
/// hub vendor's public API reference.
pub fn error_description(code: u32) -> &'static str {
    match code {
        // General
        1000 => "An unknown error has occurred",
        1001 => "Service unavailable",
        1002 => "Service timeout",
        1003 => "Internal API error",
        1004 => "SHC invalid operation",
        1005 => "Missing argument or wrong value",
        1006 => "Service too busy",
        1007 => "Unsupported request",
        1008 => "Precondition failed",
        // Authentication and authorization
        2000 => "An unknown error has occurred during authentication",
        2001 => "Access not allowed",
        2002 => "Invalid token request",
        2003 => "Invalid client credentials",
        2004 => "The token signature is invalid",
        2005 => "Failed to initialize user session",
        2006 => "A connection already exists for the current session",
        2007 => "The lifetime of the token has expired",
        2008 => "Login attempted from a different client provider",
        2009 => "Invalid user credentials",
        2010 => "Controller access not allowed",
        2011 => "Insufficient permissions",
        2012 => "Session not found",
        2013 => "Account temporary locked",
        // Entities
        3000 => "The requested entity does not exist",
        3001 => "The provided request content is invalid and can't be parsed",
        3002 => "No change performed",
        3003 => "The provided entity already exists",
        3004 => "The provided interaction is not valid",
        3005 => "Too many entities of this type",
        // Actions
        4000 => "The triggered action is invalid",
        4001 => "Invalid parameter",
        4002 => "Permission to trigger action not allowed",
        4003 => "Unsupported action type",
        // Configuration
        5000 => "The configuration could not be updated",
        5001 => "Could not obtain exclusive access on the configuration",
        5002 => "Communication with the SHC failed",
        5003 => "The owner did not accept the TaC latest version",
        5004 => "One SHC already registered",
        5005 => "The user has no SHC",
        5006 => "Controller offline",
        5009 => "Registration failure",
        _ => "unknown error code",
    }
}
