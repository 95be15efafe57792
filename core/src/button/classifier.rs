//! Raw-signal decoding and gesture classification.
//!
//! The peripheral pushes small payloads whose first byte is an event code.
//! Most firmware reports bare press/release edges and leaves timing to us;
//! some revisions classify on-device and send a finished gesture code. Both
//! shapes are handled here. Edge signals run through a timer-driven debounce
//! state machine (hold timer, double-click window, decision timer) that emits
//! at most one [`GestureEvent`] per physical interaction.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::adapter::RawNotification;
use super::ButtonEvent;

/// First-byte event codes. Firmware revisions differ; unknown codes fall to
/// the configured [`UnknownSignalPolicy`].
pub const SIGNAL_BUTTON_UP: u8 = 0x00;
pub const SIGNAL_BUTTON_DOWN: u8 = 0x01;
pub const SIGNAL_CLICK: u8 = 0x02;
pub const SIGNAL_DOUBLE_CLICK: u8 = 0x03;
pub const SIGNAL_HOLD: u8 = 0x04;

/// A classified user action. Ephemeral; carries no payload beyond its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureEvent {
    SingleClick,
    DoubleClick,
    Hold,
}

impl fmt::Display for GestureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GestureEvent::SingleClick => write!(f, "single-click"),
            GestureEvent::DoubleClick => write!(f, "double-click"),
            GestureEvent::Hold => write!(f, "hold"),
        }
    }
}

/// One decoded hardware signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonSignal {
    Pressed,
    Released,
    /// Firmware that classifies on-device sends the finished gesture.
    Classified(GestureEvent),
}

impl ButtonSignal {
    /// Decode one notification payload. `None` means undecodable.
    pub fn decode(raw: &RawNotification) -> Option<ButtonSignal> {
        match raw.payload.first() {
            Some(&SIGNAL_BUTTON_UP) => Some(ButtonSignal::Released),
            Some(&SIGNAL_BUTTON_DOWN) => Some(ButtonSignal::Pressed),
            Some(&SIGNAL_CLICK) => Some(ButtonSignal::Classified(GestureEvent::SingleClick)),
            Some(&SIGNAL_DOUBLE_CLICK) => {
                Some(ButtonSignal::Classified(GestureEvent::DoubleClick))
            }
            Some(&SIGNAL_HOLD) => Some(ButtonSignal::Classified(GestureEvent::Hold)),
            _ => None,
        }
    }
}

/// What to do with a payload that decodes to no known signal.
///
/// Firmware in the field has been seen emitting unknown codes on release, so
/// the default feeds the payload into the release path: a misread click is
/// cheaper than an interaction stuck waiting for a release that already
/// happened. This is a heuristic, not a protocol guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnknownSignalPolicy {
    #[default]
    TreatAsRelease,
    /// Drop the payload (logged).
    Ignore,
}

/// Debounce timing. The hold timer runs from press; the double-click window
/// spans consecutive releases; the decision timer runs from the last release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureTiming {
    pub hold: Duration,
    pub double_window: Duration,
    pub decide_window: Duration,
}

impl Default for GestureTiming {
    fn default() -> Self {
        Self {
            hold: Duration::from_millis(1000),
            double_window: Duration::from_millis(350),
            decide_window: Duration::from_millis(280),
        }
    }
}

impl GestureTiming {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.hold.is_zero() || self.double_window.is_zero() || self.decide_window.is_zero() {
            return Err(ClassifierError::InvalidTiming(
                "timer durations must be non-zero".to_string(),
            ));
        }
        if self.decide_window > self.double_window {
            return Err(ClassifierError::InvalidTiming(format!(
                "decision window {:?} exceeds double-click window {:?}",
                self.decide_window, self.double_window
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid timing: {0}")]
    InvalidTiming(String),
}

/// Position within one physical interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierPhase {
    Idle,
    AwaitingRelease,
    AwaitingSecondClick,
}

/// Timer-driven debounce state machine.
///
/// Single sequential task: a new raw signal always re-arms the relevant
/// timer, never overlaps it. Deadlines are owned here and die with the task.
pub struct GestureClassifier {
    timing: GestureTiming,
    policy: UnknownSignalPolicy,
    click_count: u32,
    last_release: Option<Instant>,
    hold_deadline: Option<Instant>,
    decide_deadline: Option<Instant>,
    hold_fired: bool,
}

impl GestureClassifier {
    pub fn new(
        timing: GestureTiming,
        policy: UnknownSignalPolicy,
    ) -> Result<Self, ClassifierError> {
        timing.validate()?;
        Ok(Self {
            timing,
            policy,
            click_count: 0,
            last_release: None,
            hold_deadline: None,
            decide_deadline: None,
            hold_fired: false,
        })
    }

    /// Derived from the armed deadlines; exposed for diagnostics and tests.
    pub fn phase(&self) -> ClassifierPhase {
        if self.hold_deadline.is_some() {
            ClassifierPhase::AwaitingRelease
        } else if self.decide_deadline.is_some() {
            ClassifierPhase::AwaitingSecondClick
        } else {
            ClassifierPhase::Idle
        }
    }

    /// Feed one raw payload. Pre-classified codes yield a gesture directly;
    /// edges arm the timers and yield through [`Self::hold_elapsed`] /
    /// [`Self::decide_elapsed`].
    pub fn on_notification(
        &mut self,
        raw: &RawNotification,
        now: Instant,
    ) -> Option<GestureEvent> {
        match ButtonSignal::decode(raw) {
            Some(ButtonSignal::Pressed) => {
                self.on_pressed(now);
                None
            }
            Some(ButtonSignal::Released) => {
                self.on_released(now);
                None
            }
            Some(ButtonSignal::Classified(gesture)) => {
                debug!(%gesture, "firmware pre-classified gesture");
                self.reset_interaction();
                Some(gesture)
            }
            None => match self.policy {
                UnknownSignalPolicy::TreatAsRelease => {
                    warn!(payload = ?raw.payload, "undecodable payload, treating as release");
                    self.on_released(now);
                    None
                }
                UnknownSignalPolicy::Ignore => {
                    warn!(payload = ?raw.payload, "undecodable payload ignored");
                    None
                }
            },
        }
    }

    fn on_pressed(&mut self, now: Instant) {
        self.hold_deadline = Some(now + self.timing.hold);
        self.hold_fired = false;
        // A new press keeps the click sequence open; no decision may fire
        // while the button is down. The coming release re-arms the timer.
        self.decide_deadline = None;
    }

    fn on_released(&mut self, now: Instant) {
        self.hold_deadline = None;
        if self.hold_fired {
            // The hold already consumed this interaction.
            self.hold_fired = false;
            return;
        }
        let within_double = self
            .last_release
            .map_or(false, |prev| now.duration_since(prev) < self.timing.double_window);
        self.click_count = if within_double { self.click_count + 1 } else { 1 };
        self.last_release = Some(now);
        self.decide_deadline = Some(now + self.timing.decide_window);
    }

    /// The hold timer fired before release: emit Hold, stop click accounting
    /// for this interaction.
    pub fn hold_elapsed(&mut self) -> Option<GestureEvent> {
        self.hold_deadline = None;
        self.hold_fired = true;
        self.click_count = 0;
        Some(GestureEvent::Hold)
    }

    /// The decision timer fired: settle the accumulated clicks.
    pub fn decide_elapsed(&mut self) -> Option<GestureEvent> {
        self.decide_deadline = None;
        let gesture = match self.click_count {
            0 => None,
            1 => Some(GestureEvent::SingleClick),
            _ => Some(GestureEvent::DoubleClick),
        };
        self.click_count = 0;
        gesture
    }

    fn reset_interaction(&mut self) {
        self.hold_deadline = None;
        self.decide_deadline = None;
        self.click_count = 0;
        self.hold_fired = false;
    }

    /// Drive the classifier until the raw channel closes.
    pub async fn run(
        mut self,
        mut raw: mpsc::Receiver<RawNotification>,
        events: mpsc::Sender<ButtonEvent>,
    ) {
        loop {
            let emitted = tokio::select! {
                notification = raw.recv() => match notification {
                    Some(n) => self.on_notification(&n, Instant::now()),
                    None => break,
                },
                _ = wait_deadline(self.hold_deadline) => self.hold_elapsed(),
                _ = wait_deadline(self.decide_deadline) => self.decide_elapsed(),
            };
            if let Some(gesture) = emitted {
                debug!(%gesture, "gesture classified");
                if events.send(ButtonEvent::Gesture(gesture)).await.is_err() {
                    break;
                }
            }
        }
        debug!("classifier stopped");
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => futures::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    fn classifier(policy: UnknownSignalPolicy) -> GestureClassifier {
        GestureClassifier::new(GestureTiming::default(), policy).unwrap()
    }

    fn press() -> RawNotification {
        RawNotification {
            payload: vec![SIGNAL_BUTTON_DOWN],
        }
    }

    fn release() -> RawNotification {
        RawNotification {
            payload: vec![SIGNAL_BUTTON_UP],
        }
    }

    #[test]
    fn test_decode_edge_codes() {
        assert_eq!(ButtonSignal::decode(&press()), Some(ButtonSignal::Pressed));
        assert_eq!(
            ButtonSignal::decode(&release()),
            Some(ButtonSignal::Released)
        );
        // Trailing bytes are firmware noise; only the first byte matters.
        let with_noise = RawNotification {
            payload: vec![SIGNAL_BUTTON_DOWN, 0xaa, 0xbb],
        };
        assert_eq!(
            ButtonSignal::decode(&with_noise),
            Some(ButtonSignal::Pressed)
        );
    }

    #[test]
    fn test_decode_preclassified_codes() {
        let click = RawNotification {
            payload: vec![SIGNAL_CLICK],
        };
        assert_eq!(
            ButtonSignal::decode(&click),
            Some(ButtonSignal::Classified(GestureEvent::SingleClick))
        );
        let hold = RawNotification {
            payload: vec![SIGNAL_HOLD],
        };
        assert_eq!(
            ButtonSignal::decode(&hold),
            Some(ButtonSignal::Classified(GestureEvent::Hold))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_and_empty() {
        assert_eq!(
            ButtonSignal::decode(&RawNotification { payload: vec![0x7f] }),
            None
        );
        assert_eq!(
            ButtonSignal::decode(&RawNotification { payload: vec![] }),
            None
        );
    }

    #[test]
    fn test_timing_validation() {
        let mut timing = GestureTiming::default();
        assert!(timing.validate().is_ok());

        timing.hold = Duration::ZERO;
        assert!(timing.validate().is_err());

        timing = GestureTiming {
            decide_window: Duration::from_millis(500),
            double_window: Duration::from_millis(350),
            hold: Duration::from_millis(1000),
        };
        assert!(timing.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_click_emits_on_decision_timer() {
        let mut c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let t0 = Instant::now();

        assert_eq!(c.on_notification(&press(), t0), None);
        assert_eq!(c.phase(), ClassifierPhase::AwaitingRelease);

        assert_eq!(
            c.on_notification(&release(), t0 + Duration::from_millis(100)),
            None
        );
        assert_eq!(c.phase(), ClassifierPhase::AwaitingSecondClick);

        assert_eq!(c.decide_elapsed(), Some(GestureEvent::SingleClick));
        assert_eq!(c.phase(), ClassifierPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_click_within_window() {
        let mut c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let t0 = Instant::now();

        c.on_notification(&press(), t0);
        c.on_notification(&release(), t0 + Duration::from_millis(80));
        c.on_notification(&press(), t0 + Duration::from_millis(180));
        // Second release lands 160 ms after the first, inside the 350 ms window.
        c.on_notification(&release(), t0 + Duration::from_millis(240));

        assert_eq!(c.decide_elapsed(), Some(GestureEvent::DoubleClick));
    }

    #[tokio::test(start_paused = true)]
    async fn test_releases_outside_window_are_separate_singles() {
        let mut c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let t0 = Instant::now();

        c.on_notification(&press(), t0);
        c.on_notification(&release(), t0 + Duration::from_millis(50));
        assert_eq!(c.decide_elapsed(), Some(GestureEvent::SingleClick));

        let t1 = t0 + Duration::from_millis(600);
        c.on_notification(&press(), t1);
        c.on_notification(&release(), t1 + Duration::from_millis(50));
        assert_eq!(c.decide_elapsed(), Some(GestureEvent::SingleClick));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_suppresses_click_accounting() {
        let mut c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let t0 = Instant::now();

        c.on_notification(&press(), t0);
        assert_eq!(c.hold_elapsed(), Some(GestureEvent::Hold));

        // The release that follows a fired hold must not count as a click.
        c.on_notification(&release(), t0 + Duration::from_millis(1200));
        assert_eq!(c.phase(), ClassifierPhase::Idle);
        assert_eq!(c.decide_elapsed(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_payload_treated_as_release_by_default() {
        // Known approximation: diverse firmware emits unknown codes on
        // release, so the default policy may synthesize a click.
        let mut c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let garbage = RawNotification {
            payload: vec![0xee, 0x01],
        };

        assert_eq!(c.on_notification(&garbage, Instant::now()), None);
        assert_eq!(c.phase(), ClassifierPhase::AwaitingSecondClick);
        assert_eq!(c.decide_elapsed(), Some(GestureEvent::SingleClick));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_payload_ignored_under_ignore_policy() {
        let mut c = classifier(UnknownSignalPolicy::Ignore);
        let garbage = RawNotification {
            payload: vec![0xee, 0x01],
        };

        assert_eq!(c.on_notification(&garbage, Instant::now()), None);
        assert_eq!(c.phase(), ClassifierPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preclassified_code_bypasses_timers() {
        let mut c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let double = RawNotification {
            payload: vec![SIGNAL_DOUBLE_CLICK],
        };

        assert_eq!(
            c.on_notification(&double, Instant::now()),
            Some(GestureEvent::DoubleClick)
        );
        assert_eq!(c.phase(), ClassifierPhase::Idle);
    }

    async fn recv_gesture(events: &mut mpsc::Receiver<ButtonEvent>) -> GestureEvent {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(ButtonEvent::Gesture(g))) => g,
            other => panic!("expected gesture, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_emits_single_click() {
        let c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        tokio::spawn(c.run(raw_rx, events_tx));

        raw_tx.send(press()).await.unwrap();
        advance(Duration::from_millis(100)).await;
        raw_tx.send(release()).await.unwrap();

        assert_eq!(recv_gesture(&mut events_rx).await, GestureEvent::SingleClick);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_emits_hold_without_release() {
        let c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        tokio::spawn(c.run(raw_rx, events_tx));

        raw_tx.send(press()).await.unwrap();

        assert_eq!(recv_gesture(&mut events_rx).await, GestureEvent::Hold);

        // Late release produces nothing further.
        raw_tx.send(release()).await.unwrap();
        let followup = timeout(Duration::from_secs(5), events_rx.recv()).await;
        assert!(followup.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_double_click_yields_no_singles() {
        let c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        tokio::spawn(c.run(raw_rx, events_tx));

        raw_tx.send(press()).await.unwrap();
        advance(Duration::from_millis(60)).await;
        raw_tx.send(release()).await.unwrap();
        advance(Duration::from_millis(90)).await;
        raw_tx.send(press()).await.unwrap();
        advance(Duration::from_millis(60)).await;
        raw_tx.send(release()).await.unwrap();

        assert_eq!(recv_gesture(&mut events_rx).await, GestureEvent::DoubleClick);
        let followup = timeout(Duration::from_secs(5), events_rx.recv()).await;
        assert!(followup.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_slow_double_click_emits_one_double() {
        let c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        tokio::spawn(c.run(raw_rx, events_tx));

        raw_tx.send(press()).await.unwrap();
        advance(Duration::from_millis(50)).await;
        raw_tx.send(release()).await.unwrap();
        advance(Duration::from_millis(150)).await;
        raw_tx.send(press()).await.unwrap();
        advance(Duration::from_millis(80)).await;
        // The second press is held across the decision window; no decision
        // may fire while the button is down.
        advance(Duration::from_millis(210)).await;
        // Second release lands 290 ms after the first: past the decision
        // window, still inside the 350 ms double window.
        raw_tx.send(release()).await.unwrap();

        assert_eq!(recv_gesture(&mut events_rx).await, GestureEvent::DoubleClick);
        let followup = timeout(Duration::from_secs(5), events_rx.recv()).await;
        assert!(followup.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_stops_when_raw_channel_closes() {
        let c = classifier(UnknownSignalPolicy::TreatAsRelease);
        let (raw_tx, raw_rx) = mpsc::channel::<RawNotification>(8);
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let handle = tokio::spawn(c.run(raw_rx, events_tx));

        drop(raw_tx);
        handle.await.unwrap();
        assert!(events_rx.recv().await.is_none());
    }
}
