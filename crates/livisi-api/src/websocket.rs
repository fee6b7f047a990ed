//! Push-channel event stream with an explicit connection state machine.
//!
//! The SHC delivers real-time events over a plain websocket at
//! `ws://{host}:{port}/events?token=...`. One [`EventChannel`] drives one
//! connection attempt at a time: `connect` runs the read loop to
//! completion and fires `on_close` exactly once per attempt unless the
//! close was a deliberate `disconnect`. Reconnect policy lives with the
//! caller -- the channel itself never retries.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

// ── Event type tags ──────────────────────────────────────────────────

pub const EVENT_STATE_CHANGED: &str = "StateChanged";
pub const EVENT_BUTTON_PRESSED: &str = "ButtonPressed";
pub const EVENT_MOTION_DETECTED: &str = "MotionDetected";

// ── Heartbeat ────────────────────────────────────────────────────────

const PING_INTERVAL: Duration = Duration::from_secs(10);
const PING_TIMEOUT: Duration = Duration::from_secs(10);

// ── Callback types ───────────────────────────────────────────────────

/// Synchronous subscriber for decoded events.
pub type EventSink = Arc<dyn Fn(PushEvent) + Send + Sync>;

/// Invoked once per connect attempt when the channel faults.
pub type CloseSink = Arc<dyn Fn() + Send + Sync>;

// ── PushEvent ────────────────────────────────────────────────────────

/// One decoded event frame from the push channel.
///
/// The `source` is normalized to a bare id (URL-style `/device/` and
/// `/capability/` prefixes stripped) before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(default)]
    pub namespace: String,

    /// Hub-specific event tag: `"StateChanged"`, `"ButtonPressed"`,
    /// `"MotionDetected"`, or something newer we pass through untouched.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,

    /// Originating device or capability id.
    pub source: String,

    #[serde(default)]
    pub timestamp: Option<String>,

    /// Open property bag; shape depends on `event_type`.
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

impl PushEvent {
    pub fn is_state_changed(&self) -> bool {
        self.event_type.as_deref() == Some(EVENT_STATE_CHANGED)
    }

    /// Look up one property from the bag.
    pub fn property(&self, name: &str) -> Option<&serde_json::Value> {
        self.properties.as_ref()?.get(name)
    }

    fn has_properties(&self) -> bool {
        self.properties.as_ref().is_some_and(|p| !p.is_empty())
    }
}

// ── Channel state ────────────────────────────────────────────────────

/// Observable connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    /// Deliberate teardown in progress.
    Closing,
    /// Read error, protocol violation, or server-side close.
    Faulted,
}

// ── EventChannel ─────────────────────────────────────────────────────

/// Owns the push-channel connection lifecycle.
pub struct EventChannel {
    state: watch::Sender<ChannelState>,
    /// Cancellation token for the active connection, if any. Taken by
    /// `disconnect` to signal a deliberate close; compared by identity so
    /// a finished connection only clears its own slot.
    cancel: Mutex<Option<Arc<CancellationToken>>>,
    /// Data frames received across all connections. The reconnect policy
    /// upstream reads this to tell "connected then died" from "never got
    /// a single frame".
    frames: AtomicU64,
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannel {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            state,
            cancel: Mutex::new(None),
            frames: AtomicU64::new(0),
        }
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ChannelState::Connected
    }

    /// Subscribe to connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Total data frames received since the channel was created.
    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Establish a connection and drive the read loop to completion.
    ///
    /// Returns `Ok(())` after a deliberate `disconnect`, `Err` after any
    /// fault (including failure to establish). `on_close` fires exactly
    /// once per attempt on the fault path, never on deliberate close.
    ///
    /// Calling `connect` while already connected tears the old
    /// connection down first so two live sockets never race callbacks.
    pub(crate) async fn connect(
        &self,
        url: &str,
        on_event: EventSink,
        on_close: CloseSink,
    ) -> Result<(), Error> {
        if self.is_connected() {
            self.disconnect().await;
        }

        let cancel = Arc::new(CancellationToken::new());
        *self.cancel.lock().await = Some(Arc::clone(&cancel));
        let _ = self.state.send(ChannelState::Connecting);

        let result = self.read_loop(url, &on_event, &cancel).await;

        {
            // Only clear our own token -- a re-entrant connect may have
            // installed a new one already.
            let mut slot = self.cancel.lock().await;
            if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, &cancel)) {
                *slot = None;
            }
        }

        match result {
            // Cancelled via disconnect(): deliberate, no on_close.
            Ok(()) => {
                let _ = self.state.send(ChannelState::Disconnected);
                Ok(())
            }
            Err(e) => {
                let _ = self.state.send(ChannelState::Faulted);
                on_close();
                let _ = self.state.send(ChannelState::Disconnected);
                Err(e)
            }
        }
    }

    /// Deliberately close the active connection, if any.
    ///
    /// Suppresses `on_close` for the connection being torn down.
    pub async fn disconnect(&self) {
        if let Some(cancel) = self.cancel.lock().await.take() {
            let _ = self.state.send(ChannelState::Closing);
            cancel.cancel();
        }
    }

    // ── Single connection lifecycle ──────────────────────────────────

    async fn read_loop(
        &self,
        url: &str,
        on_event: &EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        tracing::debug!(url, "connecting push channel");

        let (ws_stream, _response) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(url) => {
                result.map_err(|e| Error::WebSocketConnect(e.to_string()))?
            }
        };

        let _ = self.state.send(ChannelState::Connected);
        tracing::info!("push channel connected");

        let (mut write, mut read) = ws_stream.split();

        // tungstenite answers server pings automatically; this interval
        // is our own liveness probe for hubs that never ping us.
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await; // consume the immediate first tick
        let mut last_rx = Instant::now();

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    // Best-effort close frame on deliberate teardown.
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping.tick() => {
                    if last_rx.elapsed() > PING_INTERVAL + PING_TIMEOUT {
                        return Err(Error::WebSocketRead("ping timeout".into()));
                    }
                    write
                        .send(tungstenite::Message::Ping(tungstenite::Bytes::new()))
                        .await
                        .map_err(|e| Error::WebSocketRead(e.to_string()))?;
                }
                frame = read.next() => {
                    last_rx = Instant::now();
                    match frame {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            self.frames.fetch_add(1, Ordering::Relaxed);
                            dispatch_frame(&text, on_event);
                        }
                        Some(Ok(tungstenite::Message::Binary(_))) => {
                            // Still proof of liveness, even if we can't parse it.
                            self.frames.fetch_add(1, Ordering::Relaxed);
                        }
                        Some(Ok(
                            tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_),
                        )) => {}
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            let reason = frame
                                .map(|f| format!("code {}: {}", f.code, f.reason))
                                .unwrap_or_else(|| "no close payload".to_owned());
                            tracing::info!(%reason, "push channel closed by controller");
                            return Err(Error::WebSocketRead(reason));
                        }
                        Some(Ok(_)) => {} // raw frames -- ignore
                        Some(Err(e)) => return Err(Error::WebSocketRead(e.to_string())),
                        None => return Err(Error::WebSocketRead("stream ended".into())),
                    }
                }
            }
        }
    }
}

// ── Frame processing ─────────────────────────────────────────────────

/// Decode one text frame and hand it to the subscriber.
///
/// A frame that fails to decode is dropped, never fatal. A state-changed
/// event with an empty or absent property bag carries no actionable
/// information and is dropped too. A panicking subscriber is caught and
/// logged so one misbehaving consumer cannot take the channel down.
fn dispatch_frame(text: &str, on_event: &EventSink) {
    let mut event: PushEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "cannot decode websocket message");
            return;
        }
    };

    // Consumers always see the bare id.
    event.source = event
        .source
        .trim_start_matches("/device/")
        .trim_start_matches("/capability/")
        .to_owned();

    if event.is_state_changed() && !event.has_properties() {
        return;
    }

    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| on_event(event))) {
        let message = panic
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        tracing::error!(%message, "event subscriber panicked");
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    fn collecting_sink() -> (EventSink, Arc<StdMutex<Vec<PushEvent>>>) {
        let collected = Arc::new(StdMutex::new(Vec::new()));
        let sink_events = Arc::clone(&collected);
        let sink: EventSink = Arc::new(move |event| {
            sink_events.lock().unwrap().push(event);
        });
        (sink, collected)
    }

    #[test]
    fn frame_source_prefix_is_stripped() {
        let (sink, collected) = collecting_sink();
        let frame = serde_json::json!({
            "namespace": "core.RWE",
            "type": "StateChanged",
            "source": "/capability/abc123",
            "properties": {"onState": true}
        });

        dispatch_frame(&frame.to_string(), &sink);

        let events = collected.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source, "abc123");
    }

    #[test]
    fn device_prefix_is_stripped_too() {
        let (sink, collected) = collecting_sink();
        let frame = serde_json::json!({
            "namespace": "core.RWE",
            "type": "StateChanged",
            "source": "/device/d1",
            "properties": {"isReachable": false}
        });

        dispatch_frame(&frame.to_string(), &sink);

        assert_eq!(collected.lock().unwrap()[0].source, "d1");
    }

    #[test]
    fn empty_properties_state_change_is_dropped() {
        let (sink, collected) = collecting_sink();

        let empty = serde_json::json!({
            "namespace": "core.RWE",
            "type": "StateChanged",
            "source": "/capability/abc123",
            "properties": {}
        });
        dispatch_frame(&empty.to_string(), &sink);

        let absent = serde_json::json!({
            "namespace": "core.RWE",
            "type": "StateChanged",
            "source": "/capability/abc123"
        });
        dispatch_frame(&absent.to_string(), &sink);

        assert!(collected.lock().unwrap().is_empty());
    }

    #[test]
    fn button_event_without_state_properties_is_forwarded() {
        let (sink, collected) = collecting_sink();
        let frame = serde_json::json!({
            "namespace": "core.RWE",
            "type": "ButtonPressed",
            "source": "/capability/btn1",
            "properties": {"index": 2, "type": "ShortPress"}
        });

        dispatch_frame(&frame.to_string(), &sink);

        let events = collected.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].property("index"), Some(&serde_json::json!(2)));
    }

    #[test]
    fn undecodable_frame_is_dropped_without_panic() {
        let (sink, collected) = collecting_sink();
        dispatch_frame("not json at all", &sink);
        assert!(collected.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_subscriber_is_contained() {
        let sink: EventSink = Arc::new(|_| panic!("subscriber bug"));
        let frame = serde_json::json!({
            "namespace": "core.RWE",
            "type": "StateChanged",
            "source": "c1",
            "properties": {"onState": true}
        });

        // Must not propagate the panic.
        dispatch_frame(&frame.to_string(), &sink);
    }

    // ── Live connection tests against a local websocket server ──────

    async fn spawn_ws_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(
                tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
            ) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{addr}/events?token=test")
    }

    #[tokio::test]
    async fn frame_then_unclean_close_fires_on_close_once() {
        let url = spawn_ws_server(|mut ws| async move {
            let frame = serde_json::json!({
                "namespace": "core.RWE",
                "type": "StateChanged",
                "source": "/capability/c1",
                "properties": {"onState": true}
            });
            ws.send(tungstenite::Message::Text(frame.to_string().into()))
                .await
                .unwrap();
            // Drop without a close frame: unclean close.
        })
        .await;

        let channel = EventChannel::new();
        let (sink, collected) = collecting_sink();
        let closes = Arc::new(AtomicUsize::new(0));
        let close_count = Arc::clone(&closes);
        let on_close: CloseSink = Arc::new(move || {
            close_count.fetch_add(1, Ordering::SeqCst);
        });

        let result = channel.connect(&url, sink, on_close).await;

        assert!(result.is_err(), "unclean close should surface as a fault");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(collected.lock().unwrap().len(), 1);
        assert_eq!(channel.frames_received(), 1);
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn deliberate_disconnect_suppresses_on_close() {
        let url = spawn_ws_server(|mut ws| async move {
            // Keep the connection open until the client goes away.
            while ws.next().await.is_some() {}
        })
        .await;

        let channel = Arc::new(EventChannel::new());
        let (sink, _collected) = collecting_sink();
        let closes = Arc::new(AtomicUsize::new(0));
        let close_count = Arc::clone(&closes);
        let on_close: CloseSink = Arc::new(move || {
            close_count.fetch_add(1, Ordering::SeqCst);
        });

        let runner = Arc::clone(&channel);
        let handle =
            tokio::spawn(async move { runner.connect(&url, sink, on_close).await });

        // Wait for the connection to establish.
        let mut state = channel.state_changes();
        while *state.borrow() != ChannelState::Connected {
            state.changed().await.unwrap();
        }

        channel.disconnect().await;
        let result = handle.await.unwrap();

        assert!(result.is_ok(), "deliberate close is not a fault");
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn failed_upgrade_is_a_connect_error() {
        // Nothing listening on this port.
        let channel = EventChannel::new();
        let (sink, _collected) = collecting_sink();
        let closes = Arc::new(AtomicUsize::new(0));
        let close_count = Arc::clone(&closes);
        let on_close: CloseSink = Arc::new(move || {
            close_count.fetch_add(1, Ordering::SeqCst);
        });

        let result = channel
            .connect("ws://127.0.0.1:1/events?token=test", sink, on_close)
            .await;

        assert!(matches!(result, Err(Error::WebSocketConnect(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
