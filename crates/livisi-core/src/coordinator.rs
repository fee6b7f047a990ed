// ── Synchronization coordinator ──
//
// Orchestrates periodic catalog polling and push-channel supervision
// over one hub session, reconciles reachability between the two paths,
// and fans typed events out by topic. Reconnect policy for the push
// channel is bounded: one immediate retry, then after two consecutive
// zero-frame failures the channel stays down until the next successful
// poll re-arms it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use livisi_api::websocket::{
    CloseSink, EVENT_BUTTON_PRESSED, EVENT_MOTION_DETECTED, EVENT_STATE_CHANGED, EventSink,
};
use livisi_api::{PushEvent, Session, TransportConfig};

use crate::catalog::fetch_catalog;
use crate::config::HubConfig;
use crate::error::CoreError;
use crate::model::{
    ButtonPressType, Device, HubEvent, PROPERTY_IS_REACHABLE, STATE_PROPERTIES, Topic,
};

const EVENT_CHANNEL_SIZE: usize = 256;
const TOPIC_CHANNEL_SIZE: usize = 64;

/// Consecutive zero-frame connection failures after which the push
/// channel stops auto-reconnecting until the next successful poll.
const MAX_WS_FAILURES: u32 = 2;

// ── HubCoordinator ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc`. Owns the session, the device snapshot,
/// the capability→device map and the topic registry; presentation
/// layers consume it through [`get_devices`](Self::get_devices),
/// [`subscribe`](Self::subscribe) and the command surface.
#[derive(Clone)]
pub struct HubCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    session: Arc<Session>,
    config: HubConfig,
    /// Copy-on-refresh catalog snapshot; never mutated in place, so
    /// consumers holding an old list never observe it changing.
    devices: ArcSwap<Vec<Arc<Device>>>,
    /// Capability id → owning device id, rebuilt on every refresh.
    capability_to_device: ArcSwap<HashMap<String, String>>,
    topics: DashMap<Topic, broadcast::Sender<HubEvent>>,
    /// Global bus for discrete (button/motion) events.
    event_bus: broadcast::Sender<HubEvent>,
    /// Consecutive push-channel attempts that ended without a single
    /// data frame. Reset by any frame and by every successful poll.
    ws_failures: AtomicU32,
    /// Whether the supervisor is actively (re)connecting the channel.
    ws_armed: AtomicBool,
    /// Woken by a successful poll to re-arm a disarmed channel.
    rearm: Notify,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HubCoordinator {
    /// Connect to the hub and start the background tasks.
    ///
    /// Performs the login exchange and controller handshake; the first
    /// catalog load is the caller's first [`get_devices`](Self::get_devices)
    /// call, whose success also arms the push channel.
    pub async fn connect(config: HubConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            timeout: config.request_timeout,
            port: config.service_port,
        };
        let session = Arc::new(
            Session::connect(&config.host, config.password.clone(), &transport).await?,
        );
        info!(host = %config.host, "connected to hub");

        let (event_bus, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let inner = Arc::new(CoordinatorInner {
            session,
            config,
            devices: ArcSwap::from_pointee(Vec::new()),
            capability_to_device: ArcSwap::from_pointee(HashMap::new()),
            topics: DashMap::new(),
            event_bus,
            ws_failures: AtomicU32::new(0),
            ws_armed: AtomicBool::new(false),
            rearm: Notify::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });
        let coordinator = Self { inner };

        let mut tasks = coordinator.inner.tasks.lock().await;
        if coordinator.inner.config.websocket_enabled {
            tasks.push(tokio::spawn(ws_supervisor(Arc::clone(&coordinator.inner))));
        }
        let poll_interval = coordinator.inner.config.poll_interval;
        if !poll_interval.is_zero() {
            let this = coordinator.clone();
            tasks.push(tokio::spawn(poll_task(this, poll_interval)));
        }
        drop(tasks);

        Ok(coordinator)
    }

    /// Controller metadata captured at connect time.
    pub fn controller(&self) -> &livisi_api::models::Controller {
        self.inner.session.controller()
    }

    /// The current catalog snapshot (empty before the first refresh).
    pub fn devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.devices.load_full()
    }

    // ── Catalog refresh ──────────────────────────────────────────────

    /// Rebuild the device catalog from the hub.
    ///
    /// On success the snapshot is replaced wholesale, the
    /// capability→device map is rebuilt, reachability is fanned out per
    /// device and the push channel is re-armed. On failure every known
    /// device is marked unreachable before the error surfaces -- no
    /// partial catalog is ever returned.
    pub async fn get_devices(&self) -> Result<Arc<Vec<Arc<Device>>>, CoreError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(CoreError::Disconnected);
        }

        match fetch_catalog(&self.inner.session).await {
            Ok(devices) => {
                let devices: Vec<Arc<Device>> = devices.into_iter().map(Arc::new).collect();

                let mut mapping = HashMap::new();
                for device in &devices {
                    for capability_id in device.capabilities.values() {
                        mapping.insert(capability_id.clone(), device.id.clone());
                    }
                }
                self.inner.capability_to_device.store(Arc::new(mapping));

                let snapshot = Arc::new(devices);
                self.inner.devices.store(Arc::clone(&snapshot));

                for device in snapshot.iter() {
                    self.inner.publish(HubEvent::ReachabilityChanged {
                        device_id: device.id.clone(),
                        reachable: !device.unreachable,
                    });
                }

                // A successful poll proves the hub is reachable again:
                // reset the failure counter and re-arm the channel.
                self.inner.ws_failures.store(0, Ordering::SeqCst);
                if self.inner.config.websocket_enabled
                    && !self.inner.ws_armed.load(Ordering::SeqCst)
                {
                    self.inner.rearm.notify_one();
                }

                Ok(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "device update failed");
                self.inner.mark_all_unreachable();
                Err(CoreError::UpdateFailed(e.to_string()))
            }
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Subscribe to one topic. Slow consumers observe
    /// [`broadcast::error::RecvError::Lagged`] rather than blocking the
    /// dispatch path.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<HubEvent> {
        self.inner
            .topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(TOPIC_CHANNEL_SIZE).0)
            .subscribe()
    }

    /// Subscribe to the global bus of discrete (button/motion) events.
    pub fn events(&self) -> broadcast::Receiver<HubEvent> {
        self.inner.event_bus.subscribe()
    }

    // ── Capability state reads ───────────────────────────────────────

    /// Read one capability's property bag. Failures are isolated per
    /// capability: an error is logged and `None` returned so sibling
    /// fetches keep going.
    pub async fn get_capability_state(&self, capability_id: &str) -> Option<serde_json::Value> {
        match self.inner.session.get_capability_state(capability_id).await {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => None,
            Err(e) => {
                warn!(capability_id, error = %e, "error getting capability state");
                None
            }
        }
    }

    /// Read the current value of one state property of a capability.
    pub async fn get_capability_value(
        &self,
        capability_id: &str,
        property: &str,
    ) -> Option<serde_json::Value> {
        let state = self.get_capability_state(capability_id).await?;
        state.get(property)?.get("value").cloned()
    }

    // ── Command surface ──────────────────────────────────────────────

    /// Set one state key on a capability.
    pub async fn set_state(
        &self,
        capability_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<bool, CoreError> {
        Ok(self
            .inner
            .session
            .set_capability_state(capability_id, key, value)
            .await?)
    }

    /// Send an arbitrary command to a capability.
    pub async fn send_command(
        &self,
        capability_id: &str,
        command_type: &str,
        namespace: &str,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Result<bool, CoreError> {
        Ok(self
            .inner
            .session
            .send_capability_command(capability_id, command_type, namespace, params)
            .await?)
    }

    /// Switch a capability on or off.
    pub async fn set_on_state(&self, capability_id: &str, is_on: bool) -> Result<bool, CoreError> {
        Ok(self.inner.session.set_on_state(capability_id, is_on).await?)
    }

    /// Set a boolean variable capability.
    pub async fn set_value(&self, capability_id: &str, value: bool) -> Result<bool, CoreError> {
        Ok(self.inner.session.set_value(capability_id, value).await?)
    }

    /// Set a climate-control target temperature.
    pub async fn set_target_temperature(
        &self,
        capability_id: &str,
        temperature: f64,
    ) -> Result<bool, CoreError> {
        Ok(self
            .inner
            .session
            .set_target_temperature(capability_id, temperature)
            .await?)
    }

    /// Restart the hub itself. The hub drops the connection as it
    /// reboots; that disconnect counts as success.
    pub async fn restart_controller(&self) -> Result<bool, CoreError> {
        let snapshot = self.inner.devices.load();
        let controller = snapshot
            .iter()
            .find(|d| d.is_controller())
            .ok_or_else(|| CoreError::Internal("no controller device in catalog".into()))?;
        Ok(self.inner.session.restart_controller(&controller.id).await?)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Shut the connection down: stop the poll loop, cancel the push
    /// channel, and prevent the reconnect loop from re-arming.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.session.disconnect_events().await;

        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        self.inner.session.close().await;
        debug!("hub connection closed");
    }
}

impl CoordinatorInner {
    /// Deliver one event to the topic its variant implies, plus the
    /// global bus for discrete events.
    fn publish(&self, event: HubEvent) {
        let topic = match &event {
            HubEvent::ReachabilityChanged { device_id, .. } => Topic::Reachability {
                device_id: device_id.clone(),
            },
            HubEvent::StateChanged {
                capability_id,
                property,
                ..
            } => Topic::State {
                capability_id: capability_id.clone(),
                property: property.clone(),
            },
            HubEvent::ButtonPressed { capability_id, .. }
            | HubEvent::MotionDetected { capability_id, .. } => Topic::CapabilityEvent {
                capability_id: capability_id.clone(),
            },
        };

        if matches!(
            event,
            HubEvent::ButtonPressed { .. } | HubEvent::MotionDetected { .. }
        ) {
            let _ = self.event_bus.send(event.clone());
        }

        if let Some(sender) = self.topics.get(&topic) {
            let _ = sender.send(event);
        }
    }

    /// Fan out reachability-false for every device in the current
    /// snapshot. Used when a poll fails or the push channel drops --
    /// whichever signal arrives next wins.
    fn mark_all_unreachable(&self) {
        for device in self.devices.load().iter() {
            self.publish(HubEvent::ReachabilityChanged {
                device_id: device.id.clone(),
                reachable: false,
            });
        }
    }
}

// ── Push event classification ────────────────────────────────────────

/// Classify one inbound push frame into zero or more typed events.
///
/// Button and motion events arrive capability-scoped; the source is
/// resolved back to the owning device through the map rebuilt on every
/// refresh, and events for unknown capabilities are dropped. A generic
/// state change yields one event per recognized state property present
/// in the bag.
fn classify_push_event(
    event: &PushEvent,
    capability_to_device: &HashMap<String, String>,
) -> Vec<HubEvent> {
    let mut out = Vec::new();

    match event.event_type.as_deref() {
        Some(EVENT_BUTTON_PRESSED) => {
            let Some(device_id) = capability_to_device.get(&event.source) else {
                return out;
            };
            let button_index = event
                .property("index")
                .and_then(serde_json::Value::as_u64)
                .and_then(|i| u32::try_from(i).ok())
                .unwrap_or(0);
            let press_type = ButtonPressType::from_wire(
                event.property("type").and_then(serde_json::Value::as_str),
            );
            out.push(HubEvent::ButtonPressed {
                device_id: device_id.clone(),
                capability_id: event.source.clone(),
                button_index,
                press_type,
            });
        }
        Some(EVENT_MOTION_DETECTED) => {
            let Some(device_id) = capability_to_device.get(&event.source) else {
                return out;
            };
            out.push(HubEvent::MotionDetected {
                device_id: device_id.clone(),
                capability_id: event.source.clone(),
            });
        }
        Some(EVENT_STATE_CHANGED) => {
            let Some(properties) = &event.properties else {
                return out;
            };
            if let Some(reachable) = properties
                .get(PROPERTY_IS_REACHABLE)
                .and_then(serde_json::Value::as_bool)
            {
                out.push(HubEvent::ReachabilityChanged {
                    device_id: event.source.clone(),
                    reachable,
                });
            }
            for property in STATE_PROPERTIES {
                if let Some(value) = properties.get(property) {
                    out.push(HubEvent::StateChanged {
                        capability_id: event.source.clone(),
                        property: property.to_owned(),
                        value: value.clone(),
                    });
                }
            }
        }
        _ => {}
    }

    out
}

fn handle_push_event(inner: &CoordinatorInner, event: &PushEvent) {
    // Any data frame proves the channel viable.
    inner.ws_failures.store(0, Ordering::SeqCst);

    let mapping = inner.capability_to_device.load();
    for typed in classify_push_event(event, &mapping) {
        inner.publish(typed);
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Periodically rebuild the catalog.
async fn poll_task(coordinator: HubCoordinator, interval: Duration) {
    let cancel = coordinator.inner.shutdown.clone();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = coordinator.get_devices().await {
                    warn!(error = %e, "periodic device update failed");
                }
            }
        }
    }
}

/// Whether to keep auto-reconnecting after a connection attempt ended.
#[derive(Debug, PartialEq, Eq)]
enum ReconnectAction {
    /// Reconnect immediately.
    Retry,
    /// Stop until the next successful poll re-arms the channel.
    Disarm,
}

/// Evaluate one finished connection attempt against the bounded
/// reconnect policy. Frames received during the attempt reset the
/// counter (they prove the channel viable); two consecutive zero-frame
/// attempts disarm it.
fn evaluate_attempt(failures: &AtomicU32, got_frames: bool) -> ReconnectAction {
    if got_frames {
        failures.store(0, Ordering::SeqCst);
        return ReconnectAction::Retry;
    }
    let consecutive = failures.fetch_add(1, Ordering::SeqCst) + 1;
    if consecutive >= MAX_WS_FAILURES {
        ReconnectAction::Disarm
    } else {
        ReconnectAction::Retry
    }
}

/// Supervise the push channel: wait for a successful poll to arm it,
/// then keep one connection alive under the bounded reconnect policy.
async fn ws_supervisor(inner: Arc<CoordinatorInner>) {
    loop {
        inner.ws_armed.store(false, Ordering::SeqCst);
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => return,
            () = inner.rearm.notified() => {}
        }
        inner.ws_armed.store(true, Ordering::SeqCst);
        info!("connecting to hub websocket");

        loop {
            let frames_before = inner.session.event_frames_received();

            let sink_inner = Arc::clone(&inner);
            let on_event: EventSink =
                Arc::new(move |event| handle_push_event(&sink_inner, &event));
            let close_inner = Arc::clone(&inner);
            let on_close: CloseSink = Arc::new(move || {
                // Channel down: presume every device unreachable until a
                // fresh signal (poll or event) says otherwise.
                close_inner.mark_all_unreachable();
            });

            let result = inner.session.listen_for_events(on_event, on_close).await;

            // A cancellation mid-attempt must not resurrect the channel.
            if inner.shutdown.is_cancelled() {
                return;
            }

            match result {
                Ok(()) => {
                    // Deliberate disconnect outside shutdown: stand down
                    // until the next poll re-arms us.
                    debug!("push channel closed deliberately");
                    break;
                }
                Err(e) => warn!(error = %e, "push channel lost"),
            }

            let got_frames = inner.session.event_frames_received() > frames_before;
            match evaluate_attempt(&inner.ws_failures, got_frames) {
                ReconnectAction::Retry => {}
                ReconnectAction::Disarm => {
                    warn!(
                        "push channel failed {MAX_WS_FAILURES} times without data; \
                         waiting for next successful poll"
                    );
                    break;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_event(value: serde_json::Value) -> PushEvent {
        serde_json::from_value(value).unwrap()
    }

    fn mapping() -> HashMap<String, String> {
        HashMap::from([("c1".to_owned(), "d1".to_owned())])
    }

    #[test]
    fn button_press_resolves_owning_device() {
        let event = push_event(json!({
            "namespace": "core.RWE",
            "type": "ButtonPressed",
            "source": "c1",
            "properties": {"index": 3, "type": "LongPress"}
        }));

        let events = classify_push_event(&event, &mapping());
        assert_eq!(
            events,
            vec![HubEvent::ButtonPressed {
                device_id: "d1".into(),
                capability_id: "c1".into(),
                button_index: 3,
                press_type: ButtonPressType::Long,
            }]
        );
    }

    #[test]
    fn button_press_for_unknown_capability_is_dropped() {
        let event = push_event(json!({
            "namespace": "core.RWE",
            "type": "ButtonPressed",
            "source": "c-unknown",
            "properties": {"index": 0}
        }));

        assert!(classify_push_event(&event, &mapping()).is_empty());
    }

    #[test]
    fn motion_event_resolves_owning_device() {
        let event = push_event(json!({
            "namespace": "core.RWE",
            "type": "MotionDetected",
            "source": "c1",
            "properties": {"motionDetectedCount": 12}
        }));

        let events = classify_push_event(&event, &mapping());
        assert_eq!(
            events,
            vec![HubEvent::MotionDetected {
                device_id: "d1".into(),
                capability_id: "c1".into(),
            }]
        );
    }

    #[test]
    fn state_change_fans_out_reachability_and_properties() {
        let event = push_event(json!({
            "namespace": "core.RWE",
            "type": "StateChanged",
            "source": "c1",
            "properties": {
                "isReachable": false,
                "onState": true,
                "somethingNew": 42
            }
        }));

        let events = classify_push_event(&event, &mapping());
        assert_eq!(events.len(), 2);
        assert!(events.contains(&HubEvent::ReachabilityChanged {
            device_id: "c1".into(),
            reachable: false,
        }));
        assert!(events.contains(&HubEvent::StateChanged {
            capability_id: "c1".into(),
            property: "onState".into(),
            value: json!(true),
        }));
    }

    #[test]
    fn unrecognized_event_type_yields_nothing() {
        let event = push_event(json!({
            "namespace": "core.RWE",
            "type": "ConfigurationChanged",
            "source": "c1",
            "properties": {"schemaVersion": 2}
        }));

        assert!(classify_push_event(&event, &mapping()).is_empty());
    }

    #[test]
    fn two_zero_frame_attempts_disarm_the_channel() {
        let failures = AtomicU32::new(0);

        assert_eq!(evaluate_attempt(&failures, false), ReconnectAction::Retry);
        assert_eq!(evaluate_attempt(&failures, false), ReconnectAction::Disarm);
    }

    #[test]
    fn data_frames_reset_the_failure_counter() {
        let failures = AtomicU32::new(0);

        assert_eq!(evaluate_attempt(&failures, false), ReconnectAction::Retry);
        assert_eq!(evaluate_attempt(&failures, true), ReconnectAction::Retry);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        // The slate is clean: the next failure is attempt #1 again.
        assert_eq!(evaluate_attempt(&failures, false), ReconnectAction::Retry);
    }

    #[test]
    fn poll_success_reset_rearms_counting_from_zero() {
        let failures = AtomicU32::new(0);

        assert_eq!(evaluate_attempt(&failures, false), ReconnectAction::Retry);
        assert_eq!(evaluate_attempt(&failures, false), ReconnectAction::Disarm);

        // What get_devices() does on success.
        failures.store(0, Ordering::SeqCst);

        assert_eq!(evaluate_attempt(&failures, false), ReconnectAction::Retry);
    }
}
