// ── Authenticated session against the SHC REST surface ──
//
// Owns the HTTP client, the token store, and the single-flight refresh
// lock. All REST traffic flows through `request`, which handles the
// token-expired error code (2007) transparently: refresh once, retry the
// original request once, surface the retry's error if it also fails.

use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::error::{
    ERROR_CODE_TOKEN_EXPIRED, ERROR_CODES_BAD_CREDENTIALS, Error, error_description,
};
use crate::models::Controller;
use crate::token::{Credential, TokenStore};
use crate::transport::{AVATAR_WEBSOCKET_PORT, CLASSIC_WEBSOCKET_PORT, TransportConfig};
use crate::websocket::{CloseSink, EventChannel, EventSink};

/// Fixed client-identity header for the login exchange
/// (base64 of `clientId:clientPass`, same for every SHC).
const AUTH_CLIENT_IDENTITY: &str = "Basic Y2xpZW50SWQ6Y2xpZW50UGFzcw==";

/// Connect to the SHC and return an authenticated session.
pub async fn connect(
    host: &str,
    password: SecretString,
    transport: &TransportConfig,
) -> Result<Session, Error> {
    Session::connect(host, password, transport).await
}

/// An authenticated connection to one Smart Home Controller.
///
/// Holds the credential, host, and event channel as an owned object --
/// operations take `&self`, nothing lives in module-level state. Cheap to
/// share behind an `Arc`; the catalog builder issues several concurrent
/// requests against one session per refresh cycle.
pub struct Session {
    http: reqwest::Client,
    host: String,
    port: u16,
    password: SecretString,
    tokens: TokenStore,
    /// Single-flight guard: concurrent requests that discover the same
    /// expired credential share one login instead of racing several.
    refresh_lock: Mutex<()>,
    controller: Controller,
    websocket: EventChannel,
}

impl Session {
    /// Perform the login exchange, fetch controller metadata, and return
    /// a ready session.
    pub async fn connect(
        host: &str,
        password: SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        let host = host.trim().to_owned();
        let port = transport.port;

        let credential = login(&http, &host, port, &password).await?;

        // Controller metadata with the fresh token -- no 2007 handling
        // needed yet.
        let url = format!("http://{host}:{port}/status");
        let bearer = credential.bearer();
        let status =
            send_with_retry(&http, Method::GET, &url, None, Some(bearer.as_str())).await?;
        if let Some(code) = hub_error_code(&status) {
            return Err(Error::ErrorCode { code });
        }
        let controller: Controller =
            serde_json::from_value(status.clone()).map_err(|e| Error::InvalidResponse {
                message: e.to_string(),
                body: status.to_string(),
            })?;
        debug!(
            controller_type = controller.controller_type.as_deref().unwrap_or("unknown"),
            "connected to controller"
        );

        let session = Self {
            http,
            host,
            port,
            password,
            tokens: TokenStore::new(),
            refresh_lock: Mutex::new(()),
            controller,
            websocket: EventChannel::new(),
        };
        session.tokens.replace(credential);
        Ok(session)
    }

    /// The configured hub host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Controller metadata captured at connect time.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// The current credential, if any. Exposed for diagnostics.
    pub fn credential(&self) -> Option<Arc<Credential>> {
        self.tokens.current()
    }

    /// Close the session: tear down the event channel and drop the token.
    pub async fn close(&self) {
        self.websocket.disconnect().await;
        self.tokens.clear();
    }

    // ── Event channel ────────────────────────────────────────────────

    /// Open the push channel and drive its read loop to completion.
    ///
    /// Returns when the connection closes. `on_close` fires exactly once
    /// per attempt unless the close was a deliberate
    /// [`disconnect_events`](Self::disconnect_events).
    pub async fn listen_for_events(
        &self,
        on_event: EventSink,
        on_close: CloseSink,
    ) -> Result<(), Error> {
        let credential = self.tokens.current().ok_or(Error::NotConnected)?;
        let url = build_event_url(
            &self.host,
            self.websocket_port(),
            self.controller.is_v2(),
            credential.token(),
        );
        self.websocket.connect(&url, on_event, on_close).await
    }

    /// Deliberately close the push channel (no `on_close` fires).
    pub async fn disconnect_events(&self) {
        self.websocket.disconnect().await;
    }

    /// Whether the push channel is currently connected.
    pub fn events_connected(&self) -> bool {
        self.websocket.is_connected()
    }

    /// Total data frames received over the push channel since connect.
    pub fn event_frames_received(&self) -> u64 {
        self.websocket.frames_received()
    }

    fn websocket_port(&self) -> u16 {
        if self.controller.is_v2() {
            AVATAR_WEBSOCKET_PORT
        } else {
            CLASSIC_WEBSOCKET_PORT
        }
    }

    // ── REST mechanics ───────────────────────────────────────────────

    /// Send an authenticated request and return the JSON body.
    ///
    /// Handles credential lifecycle around the call: refreshes before
    /// sending when the stored expiry has passed, and on a 2007 response
    /// refreshes once and retries the request exactly once.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&Value>,
    ) -> Result<Value, Error> {
        let mut credential = self.tokens.current().ok_or(Error::NotConnected)?;

        // Proactive check: a decodably-expired token would only buy us a
        // guaranteed 2007 round-trip.
        if credential.is_expired() {
            credential = self.refresh_credential(Some(&credential)).await?;
        }

        let url = self.service_url(path);
        let bearer = credential.bearer();
        let response =
            send_with_retry(&self.http, method.clone(), &url, payload, Some(bearer.as_str()))
                .await?;

        match hub_error_code(&response) {
            Some(ERROR_CODE_TOKEN_EXPIRED) => {
                let refreshed = self.refresh_credential(Some(&credential)).await?;
                let bearer = refreshed.bearer();
                let retry =
                    send_with_retry(&self.http, method, &url, payload, Some(bearer.as_str()))
                        .await?;
                if let Some(code) = hub_error_code(&retry) {
                    error!(code, "controller sent error code after token refresh");
                    return Err(Error::ErrorCode { code });
                }
                Ok(retry)
            }
            Some(code) => {
                error!(
                    code,
                    path,
                    description = error_description(code),
                    "controller reported an error"
                );
                Err(Error::ErrorCode { code })
            }
            None => Ok(response),
        }
    }

    /// `request` + typed deserialization of the body.
    pub(crate) async fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let value = self.request(Method::GET, path, None).await?;
        serde_json::from_value(value.clone()).map_err(|e| Error::InvalidResponse {
            message: e.to_string(),
            body: value.to_string(),
        })
    }

    fn service_url(&self, path: &str) -> String {
        format!("http://{}:{}/{}", self.host, self.port, path)
    }

    /// Replace the credential via the single-flight lock.
    ///
    /// `observed` is the credential the caller saw fail/expire. After
    /// acquiring the lock we compare identities: if another task already
    /// swapped in a new credential, reuse it instead of logging in again.
    async fn refresh_credential(
        &self,
        observed: Option<&Arc<Credential>>,
    ) -> Result<Arc<Credential>, Error> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(current) = self.tokens.current() {
            let already_replaced = observed.is_none_or(|seen| !Arc::ptr_eq(&current, seen));
            if already_replaced {
                return Ok(current);
            }
        }

        debug!("refreshing access token");
        let credential = login(&self.http, &self.host, self.port, &self.password).await?;
        Ok(self.tokens.replace(credential))
    }
}

// ── Login exchange ───────────────────────────────────────────────────

/// `POST /auth/token` with the fixed client-identity header.
async fn login(
    http: &reqwest::Client,
    host: &str,
    port: u16,
    password: &SecretString,
) -> Result<Credential, Error> {
    let url = format!("http://{host}:{port}/auth/token");
    let payload = serde_json::json!({
        "username": "admin",
        "password": password.expose_secret(),
        "grant_type": "password",
    });

    let response = http
        .post(&url)
        .header(reqwest::header::AUTHORIZATION, AUTH_CLIENT_IDENTITY)
        .header(reqwest::header::ACCEPT, "application/json")
        .json(&payload)
        .send()
        .await
        .map_err(classify_transport)?;

    let body = response.text().await.map_err(classify_transport)?;
    let auth: crate::models::AuthResponse = serde_json::from_str(&body).map_err(|_| {
        // Something answered, but it wasn't an SHC login endpoint.
        Error::InvalidHost(format!("unparseable login response: {body:.100}"))
    })?;

    if let Some(token) = auth.access_token {
        return Ok(Credential::new(token));
    }

    match auth.errorcode {
        Some(code) if ERROR_CODES_BAD_CREDENTIALS.contains(&code) => Err(Error::WrongCredentials),
        code => {
            let description = auth
                .description
                .unwrap_or_else(|| "unknown error".to_owned());
            error!(?code, %description, "controller login response carried no token");
            Err(Error::Internal(format!(
                "no access token received from controller: {description}"
            )))
        }
    }
}

// ── Low-level send helpers ───────────────────────────────────────────

/// Dispatch one HTTP request, with a single transparent retry for the
/// spurious one-shot connection drops older v1 hub firmware produces on
/// idle keep-alive connections.
async fn send_with_retry(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    payload: Option<&Value>,
    bearer: Option<&str>,
) -> Result<Value, Error> {
    match dispatch(http, method.clone(), url, payload, bearer).await {
        Ok(response) => parse_body(response).await,
        Err(e) if is_spurious_disconnect(&e) => {
            debug!(url, "retrying after spurious connection drop");
            let response = dispatch(http, method, url, payload, bearer)
                .await
                .map_err(classify_transport)?;
            parse_body(response).await
        }
        Err(e) => Err(classify_transport(e)),
    }
}

async fn dispatch(
    http: &reqwest::Client,
    method: Method,
    url: &str,
    payload: Option<&Value>,
    bearer: Option<&str>,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut builder = http
        .request(method, url)
        .header(reqwest::header::ACCEPT, "*/*");
    if let Some(bearer) = bearer {
        builder = builder.header(reqwest::header::AUTHORIZATION, bearer);
    }
    if let Some(payload) = payload {
        builder = builder.json(payload);
    }
    builder.send().await
}

async fn parse_body(response: reqwest::Response) -> Result<Value, Error> {
    let status = response.status();
    let body = response.text().await.map_err(classify_transport)?;

    if body.is_empty() {
        if status.is_success() {
            return Ok(Value::Null);
        }
        return Err(Error::InvalidResponse {
            message: format!("no data received from controller, response code {status}"),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| Error::InvalidResponse {
        message: format!("invalid response from controller ({status}): {e}"),
        body,
    })
}

/// The hub signals failures in-band via an `errorcode` body field.
fn hub_error_code(value: &Value) -> Option<u32> {
    value
        .get("errorcode")
        .and_then(Value::as_u64)
        .and_then(|code| u32::try_from(code).ok())
}

/// A request-phase failure that is neither a timeout nor a refused
/// connection: typically the hub closing an idle keep-alive socket just
/// as we reuse it.
fn is_spurious_disconnect(e: &reqwest::Error) -> bool {
    e.is_request() && !e.is_timeout() && !e.is_connect()
}

fn classify_transport(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Unreachable("timeout waiting for controller".to_owned())
    } else if e.is_connect() {
        Error::Unreachable(format!("failed to connect to controller: {e}"))
    } else if e.is_request() || e.is_body() || e.is_decode() {
        Error::Unreachable(e.to_string())
    } else {
        Error::Internal(e.to_string())
    }
}

// ── Websocket URL ────────────────────────────────────────────────────

/// Build the push-channel URL. Second-generation hubs require the token
/// percent-encoded in the query string; v1 firmware chokes on encoding
/// and wants it raw.
pub(crate) fn build_event_url(host: &str, port: u16, is_v2: bool, token: &str) -> String {
    if is_v2 {
        format!("ws://{host}:{port}/events?token={}", urlencoding::encode(token))
    } else {
        format!("ws://{host}:{port}/events?token={token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_url_v1_keeps_token_raw() {
        let url = build_event_url("192.168.1.2", 8080, false, "abc+def");
        assert_eq!(url, "ws://192.168.1.2:8080/events?token=abc+def");
    }

    #[test]
    fn event_url_v2_percent_encodes_token() {
        let url = build_event_url("192.168.1.2", 9090, true, "abc+def");
        assert_eq!(url, "ws://192.168.1.2:9090/events?token=abc%2Bdef");
    }

    #[test]
    fn hub_error_code_extraction() {
        let body = serde_json::json!({"errorcode": 2007});
        assert_eq!(hub_error_code(&body), Some(2007));
        assert_eq!(hub_error_code(&serde_json::json!({"ok": true})), None);
    }
}
