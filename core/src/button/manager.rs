//! Discovery, connection, and automatic reconnection for the button.
//!
//! One sequential driver task owns the whole lifecycle: scan → qualify →
//! connect → subscribe → monitor. Each stage's failure short-circuits back
//! to the reconnect path; there is no backoff ceiling because connection
//! loss is normal for a pocket-sized peripheral. An armed flag (watch
//! channel) is shared between the public API and the driver, so
//! [`ConnectionManager::disconnect`] interrupts any in-progress wait and
//! suspends auto-reconnect until the next [`ConnectionManager::start_scanning`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::adapter::{ButtonAdapter, RawNotification};
use super::classifier::{ClassifierError, GestureClassifier, GestureTiming, UnknownSignalPolicy};
use super::policy::DeviceFilter;
use super::ButtonEvent;

/// HID Report characteristic; shutter-style buttons publish clicks there.
/// Firmware revisions differ, hence the first-notifiable fallback in the
/// adapter.
pub const BUTTON_REPORT_CHARACTERISTIC: &str = "00002a4d-0000-1000-8000-00805f9b34fb";

/// Connection lifecycle for the one paired peripheral. Mutated only by the
/// driver task; read through [`ConnectionManager::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Scanning => write!(f, "scanning"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Connection-side configuration. Replaced wholesale, never field-by-field.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub filter: DeviceFilter,
    /// Characteristic expected to carry button notifications.
    pub preferred_characteristic: Option<String>,
    /// How long one discovery pass may run before expiring.
    pub scan_window: Duration,
    /// Cadence for re-attempting discovery while nothing is connected.
    pub reconnect_interval: Duration,
    /// Bound on connect plus characteristic discovery.
    pub connect_timeout: Duration,
    /// Fixed delay before rescanning after a drop or failed connect.
    pub reconnect_delay: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            filter: DeviceFilter::default(),
            preferred_characteristic: Some(BUTTON_REPORT_CHARACTERISTIC.to_string()),
            scan_window: Duration::from_secs(20),
            reconnect_interval: Duration::from_secs(6),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(3),
        }
    }
}

impl ConnectConfig {
    pub fn validate(&self) -> Result<(), ManagerError> {
        self.filter
            .validate()
            .map_err(ManagerError::InvalidConfig)?;
        if self.scan_window.is_zero()
            || self.reconnect_interval.is_zero()
            || self.connect_timeout.is_zero()
            || self.reconnect_delay.is_zero()
        {
            return Err(ManagerError::InvalidConfig(
                "connection intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Timing(#[from] ClassifierError),
}

/// Handle to the connection driver.
///
/// Owns the armed flag and the shared state snapshot; the driver task and
/// the classifier task run until the handle is dropped.
pub struct ConnectionManager {
    adapter: Arc<dyn ButtonAdapter>,
    state: Arc<RwLock<ConnectionState>>,
    armed: watch::Sender<bool>,
}

impl ConnectionManager {
    /// Start the driver and classifier tasks. Events (connectivity edges and
    /// classified gestures) arrive on the returned channel.
    pub fn spawn(
        adapter: Arc<dyn ButtonAdapter>,
        config: ConnectConfig,
        timing: GestureTiming,
        policy: UnknownSignalPolicy,
    ) -> Result<(Self, mpsc::Receiver<ButtonEvent>), ManagerError> {
        config.validate()?;
        let classifier = GestureClassifier::new(timing, policy)?;

        let (events_tx, events_rx) = mpsc::channel(64);
        let (raw_tx, raw_rx) = mpsc::channel(64);
        let (armed_tx, armed_rx) = watch::channel(false);
        let state = Arc::new(RwLock::new(ConnectionState::Idle));

        tokio::spawn(classifier.run(raw_rx, events_tx.clone()));
        tokio::spawn(drive(
            Arc::clone(&adapter),
            config,
            Arc::clone(&state),
            armed_rx,
            raw_tx,
            events_tx,
        ));

        let manager = Self {
            adapter,
            state,
            armed: armed_tx,
        };
        Ok((manager, events_rx))
    }

    /// Arm discovery and auto-reconnect. Returns false when the radio is
    /// unavailable or not permitted; returns true without side effect when
    /// already armed.
    pub async fn start_scanning(&self) -> bool {
        if *self.armed.borrow() {
            return true;
        }
        if !self.adapter.ready().await {
            warn!("bluetooth unavailable or not permitted, scanning not started");
            return false;
        }
        self.armed.send_replace(true);
        true
    }

    /// Release the peripheral and suspend auto-reconnect until the next
    /// `start_scanning`. Idempotent.
    pub fn disconnect(&self) {
        self.armed.send_replace(false);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }
}

async fn drive(
    adapter: Arc<dyn ButtonAdapter>,
    config: ConnectConfig,
    state: Arc<RwLock<ConnectionState>>,
    mut armed: watch::Receiver<bool>,
    raw_tx: mpsc::Sender<RawNotification>,
    events: mpsc::Sender<ButtonEvent>,
) {
    loop {
        // Parked until start_scanning; exits when the handle is gone.
        if armed.wait_for(|on| *on).await.is_err() {
            return;
        }

        set_state(&state, &events, ConnectionState::Scanning).await;
        let outcome = tokio::select! {
            result = adapter.discover(&config.filter, config.scan_window) => result,
            _ = disarmed(&mut armed) => {
                set_state(&state, &events, ConnectionState::Disconnected).await;
                continue;
            }
        };

        let device = match outcome {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!(window = ?config.scan_window, "scan window expired without a qualifying device");
                set_state(&state, &events, ConnectionState::Idle).await;
                pause(&mut armed, &state, &events, config.reconnect_interval).await;
                continue;
            }
            Err(e) => {
                warn!(error = %e, "discovery failed");
                set_state(&state, &events, ConnectionState::Idle).await;
                pause(&mut armed, &state, &events, config.reconnect_interval).await;
                continue;
            }
        };

        info!(name = ?device.name, id = %device.device_id, "button found, connecting");
        set_state(&state, &events, ConnectionState::Connecting).await;
        let attached = tokio::select! {
            result = adapter.attach(
                &device,
                config.preferred_characteristic.as_deref(),
                config.connect_timeout,
            ) => result,
            _ = disarmed(&mut armed) => {
                set_state(&state, &events, ConnectionState::Disconnected).await;
                continue;
            }
        };

        let mut link = match attached {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "connection failed, will retry");
                set_state(&state, &events, ConnectionState::Disconnected).await;
                pause(&mut armed, &state, &events, config.reconnect_delay).await;
                continue;
            }
        };

        info!(characteristic = %link.characteristic, "subscribed to button notifications");
        set_state(&state, &events, ConnectionState::Connected).await;

        let mut disarm_requested = false;
        loop {
            tokio::select! {
                notification = link.notifications.recv() => match notification {
                    Some(raw) => {
                        // Classifier gone means the pipeline is shutting down.
                        if raw_tx.send(raw).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        info!("button disconnected");
                        break;
                    }
                },
                _ = disarmed(&mut armed) => {
                    disarm_requested = true;
                    break;
                }
            }
        }

        drop(link);
        set_state(&state, &events, ConnectionState::Disconnected).await;
        if disarm_requested {
            continue;
        }
        pause(&mut armed, &state, &events, config.reconnect_delay).await;
    }
}

/// Record a transition and surface connectivity edges.
async fn set_state(
    state: &RwLock<ConnectionState>,
    events: &mpsc::Sender<ButtonEvent>,
    next: ConnectionState,
) {
    let previous = {
        let mut guard = state.write();
        std::mem::replace(&mut *guard, next)
    };
    if previous == next {
        return;
    }
    debug!(from = %previous, to = %next, "connection state");
    if next == ConnectionState::Connected {
        let _ = events.send(ButtonEvent::Connectivity(true)).await;
    } else if previous == ConnectionState::Connected {
        let _ = events.send(ButtonEvent::Connectivity(false)).await;
    }
}

/// Resolves once the armed flag is false (or the handle is gone).
async fn disarmed(armed: &mut watch::Receiver<bool>) {
    let _ = armed.wait_for(|on| !*on).await;
}

/// Sleep for `delay`, cut short by a disarm; a disarm during the pause
/// settles the state to Disconnected.
async fn pause(
    armed: &mut watch::Receiver<bool>,
    state: &RwLock<ConnectionState>,
    events: &mpsc::Sender<ButtonEvent>,
    delay: Duration,
) {
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = disarmed(armed) => {
            set_state(state, events, ConnectionState::Disconnected).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::button::adapter::{AdapterError, ButtonLink, DiscoveredDevice};
    use crate::button::classifier::{GestureEvent, SIGNAL_BUTTON_DOWN, SIGNAL_BUTTON_UP};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::timeout;

    enum Step {
        FindNone,
        Find,
        DiscoverErr,
        AttachOk,
        AttachErr,
    }

    /// Plays back a scripted sequence of discovery/attach outcomes and keeps
    /// the send side of every established link so tests can push
    /// notifications or drop the connection.
    struct ScriptedAdapter {
        ready: bool,
        script: Mutex<VecDeque<Step>>,
        links: Mutex<Vec<mpsc::Sender<RawNotification>>>,
    }

    impl ScriptedAdapter {
        fn new(ready: bool, steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                ready,
                script: Mutex::new(steps.into()),
                links: Mutex::new(Vec::new()),
            })
        }

        fn link(&self, index: usize) -> mpsc::Sender<RawNotification> {
            self.links.lock()[index].clone()
        }

        fn established_links(&self) -> usize {
            self.links.lock().len()
        }
    }

    #[async_trait]
    impl ButtonAdapter for ScriptedAdapter {
        async fn ready(&self) -> bool {
            self.ready
        }

        async fn discover(
            &self,
            _filter: &DeviceFilter,
            _window: Duration,
        ) -> Result<Option<DiscoveredDevice>, AdapterError> {
            let step = self.script.lock().pop_front();
            match step {
                Some(Step::Find) => Ok(Some(DiscoveredDevice {
                    device_id: "dev-1".into(),
                    name: Some("AB Shutter3".into()),
                })),
                Some(Step::DiscoverErr) => Err(AdapterError::Discovery("radio reset".into())),
                Some(Step::FindNone) | None => Ok(None),
                Some(other) => {
                    self.script.lock().push_front(other);
                    Ok(None)
                }
            }
        }

        async fn attach(
            &self,
            device: &DiscoveredDevice,
            _preferred: Option<&str>,
            _timeout: Duration,
        ) -> Result<ButtonLink, AdapterError> {
            let step = self.script.lock().pop_front();
            match step {
                Some(Step::AttachOk) => {
                    let (tx, rx) = mpsc::channel(8);
                    self.links.lock().push(tx);
                    Ok(ButtonLink {
                        characteristic: BUTTON_REPORT_CHARACTERISTIC.to_string(),
                        notifications: rx,
                    })
                }
                _ => Err(AdapterError::Connect(format!(
                    "refused by {}",
                    device.device_id
                ))),
            }
        }
    }

    fn test_config() -> ConnectConfig {
        ConnectConfig {
            scan_window: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_millis(500),
            ..ConnectConfig::default()
        }
    }

    fn spawn_manager(
        adapter: Arc<ScriptedAdapter>,
    ) -> (ConnectionManager, mpsc::Receiver<ButtonEvent>) {
        ConnectionManager::spawn(
            adapter,
            test_config(),
            GestureTiming::default(),
            UnknownSignalPolicy::default(),
        )
        .unwrap()
    }

    async fn recv_event(events: &mut mpsc::Receiver<ButtonEvent>) -> ButtonEvent {
        timeout(Duration::from_secs(60), events.recv())
            .await
            .expect("timed out waiting for button event")
            .expect("event channel closed")
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_scanning_requires_ready_adapter() {
        let adapter = ScriptedAdapter::new(false, vec![]);
        let (manager, _events) = spawn_manager(adapter);

        assert!(!manager.start_scanning().await);
        assert_eq!(manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_scanning_is_idempotent_while_armed() {
        let adapter = ScriptedAdapter::new(true, vec![Step::Find, Step::AttachOk]);
        let (manager, mut events) = spawn_manager(adapter);

        assert!(manager.start_scanning().await);
        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_to_qualifying_device() {
        let adapter = ScriptedAdapter::new(true, vec![Step::Find, Step::AttachOk]);
        let (manager, mut events) = spawn_manager(Arc::clone(&adapter));

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(adapter.established_links(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_scans_retry_until_device_appears() {
        let adapter = ScriptedAdapter::new(
            true,
            vec![Step::FindNone, Step::FindNone, Step::Find, Step::AttachOk],
        );
        let (manager, mut events) = spawn_manager(Arc::clone(&adapter));

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));
        assert!(adapter.script.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_error_is_nonfatal() {
        let adapter =
            ScriptedAdapter::new(true, vec![Step::DiscoverErr, Step::Find, Step::AttachOk]);
        let (manager, mut events) = spawn_manager(adapter);

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failure_retries_unconditionally() {
        let adapter = ScriptedAdapter::new(
            true,
            vec![Step::Find, Step::AttachErr, Step::Find, Step::AttachOk],
        );
        let (manager, mut events) = spawn_manager(Arc::clone(&adapter));

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));
        assert_eq!(adapter.established_links(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spontaneous_drop_triggers_reconnect() {
        let adapter = ScriptedAdapter::new(
            true,
            vec![Step::Find, Step::AttachOk, Step::Find, Step::AttachOk],
        );
        let (manager, mut events) = spawn_manager(Arc::clone(&adapter));

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));

        // Peripheral drops: the notification stream ends.
        let first_link = adapter.link(0);
        drop(first_link);
        {
            let mut links = adapter.links.lock();
            links.remove(0);
        }

        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(false));
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_suppresses_auto_reconnect() {
        // A second Find is scripted; it must never be consumed.
        let adapter = ScriptedAdapter::new(
            true,
            vec![Step::Find, Step::AttachOk, Step::Find, Step::AttachOk],
        );
        let (manager, mut events) = spawn_manager(Arc::clone(&adapter));

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));

        manager.disconnect();
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(false));

        let quiet = timeout(Duration::from_secs(120), events.recv()).await;
        assert!(quiet.is_err(), "no events expected after disconnect");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(adapter.script.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let adapter = ScriptedAdapter::new(true, vec![Step::Find, Step::AttachOk]);
        let (manager, mut events) = spawn_manager(adapter);

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));

        manager.disconnect();
        manager.disconnect();
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(false));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_after_disconnect_scans_again() {
        let adapter = ScriptedAdapter::new(
            true,
            vec![Step::Find, Step::AttachOk, Step::Find, Step::AttachOk],
        );
        let (manager, mut events) = spawn_manager(adapter);

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));

        manager.disconnect();
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(false));

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_classify_into_gestures() {
        let adapter = ScriptedAdapter::new(true, vec![Step::Find, Step::AttachOk]);
        let (manager, mut events) = spawn_manager(Arc::clone(&adapter));

        assert!(manager.start_scanning().await);
        assert_eq!(recv_event(&mut events).await, ButtonEvent::Connectivity(true));

        let link = adapter.link(0);
        link.send(RawNotification {
            payload: vec![SIGNAL_BUTTON_DOWN],
        })
        .await
        .unwrap();
        link.send(RawNotification {
            payload: vec![SIGNAL_BUTTON_UP],
        })
        .await
        .unwrap();

        assert_eq!(
            recv_event(&mut events).await,
            ButtonEvent::Gesture(GestureEvent::SingleClick)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_is_rejected() {
        let adapter = ScriptedAdapter::new(true, vec![]);
        let config = ConnectConfig {
            scan_window: Duration::ZERO,
            ..ConnectConfig::default()
        };
        let result = ConnectionManager::spawn(
            adapter,
            config,
            GestureTiming::default(),
            UnknownSignalPolicy::default(),
        );
        assert!(matches!(result, Err(ManagerError::InvalidConfig(_))));
    }
}
