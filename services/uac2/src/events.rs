//! # Host Event Notifier
//!
//! Tells the outside world when the host starts or stops streaming.
//!
//! Disconnects are reported on the next run. A direction that was
//! announced as connected owes a `Disconnected` as soon as its stream is
//! torn down, even if the host selects an alt again before the work runs.
//!
//! Connects are debounced. Activating a stream schedules the connect work
//! [`UEVENT_DELAY_MS`] out so a host probing alt settings in quick
//! succession produces one event, not a burst. When the connect work runs
//! it compares the alt the host has selected now with the one last
//! announced and emits only the difference.
//!
//! ```text
//!  announced \ now   alt 0           alt k
//!  none              -               Connected
//!  Some(k)           Disconnected    -
//!  Some(j), j != k   Disconnected    Disconnected, Connected
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

use crate::{Direction, UEVENT_DELAY_MS};

/// Events delivered to the host-facing side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    PlaybackConnected,
    PlaybackDisconnected,
    CaptureConnected,
    CaptureDisconnected,
    CableDisconnected,
}

impl HostEvent {
    pub const fn connected(direction: Direction) -> Self {
        match direction {
            Direction::Playback => HostEvent::PlaybackConnected,
            Direction::Capture => HostEvent::CaptureConnected,
        }
    }

    pub const fn disconnected(direction: Direction) -> Self {
        match direction {
            Direction::Playback => HostEvent::PlaybackDisconnected,
            Direction::Capture => HostEvent::CaptureDisconnected,
        }
    }

    /// Uevent string
    pub const fn as_str(&self) -> &'static str {
        match self {
            HostEvent::PlaybackConnected => "HOST_PLAYBACK_STREAM_PARAMS_CHANGED",
            HostEvent::PlaybackDisconnected => "HOST_PLAYBACK_STREAM_CLOSED",
            HostEvent::CaptureConnected => "HOST_CAPTURE_STREAM_PARAMS_CHANGED",
            HostEvent::CaptureDisconnected => "HOST_CAPTURE_STREAM_CLOSED",
            HostEvent::CableDisconnected => "HOST_CABLE_DISCONNECTED",
        }
    }
}

/// Delivers events to whoever listens for them
pub trait HostEventSink: Send + Sync {
    fn send(&self, event: HostEvent);
}

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
struct DirectionWork {
    /// When the connect work should run, if scheduled
    connect_due: Option<u64>,
    /// An announced stream was torn down and the listener has not heard
    disconnect_owed: bool,
    /// Alt last announced as connected
    announced: Option<u8>,
}

impl DirectionWork {
    /// The stream went away. Cancels any pending connect.
    fn teardown(&mut self) {
        self.connect_due = None;
        if self.announced.is_some() {
            self.disconnect_owed = true;
        }
    }
}

#[derive(Debug, Default)]
struct NotifierState {
    work: [DirectionWork; 2],
    cable_pending: bool,
}

/// Debounced per-instance event scheduler
pub struct EventNotifier {
    sink: Arc<dyn HostEventSink>,
    clock: Arc<dyn Clock>,
    state: Mutex<NotifierState>,
}

impl EventNotifier {
    pub fn new(sink: Arc<dyn HostEventSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            state: Mutex::new(NotifierState::default()),
        }
    }

    /// Schedules the direction's connect work [`UEVENT_DELAY_MS`] from
    /// now. An earlier pending deadline is kept.
    pub fn schedule_connect(&self, direction: Direction) {
        log::debug!("uac2: scheduling {} connect event", direction.as_str());
        let due = self.clock.now_ms().saturating_add(UEVENT_DELAY_MS);
        let mut state = self.state.lock();
        let work = &mut state.work[direction.index()];
        work.connect_due = Some(match work.connect_due {
            Some(prev) => prev.min(due),
            None => due,
        });
    }

    /// The direction's stream was torn down. Owes a `Disconnected` on the
    /// next run if the stream had been announced.
    pub fn schedule_disconnect(&self, direction: Direction) {
        log::debug!("uac2: scheduling {} disconnect event", direction.as_str());
        self.state.lock().work[direction.index()].teardown();
    }

    /// The cable or configuration went away
    pub fn cable_disconnected(&self) {
        let mut state = self.state.lock();
        state.cable_pending = true;
        for work in state.work.iter_mut() {
            work.teardown();
        }
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<u64> {
        let state = self.state.lock();
        if state.cable_pending || state.work.iter().any(|w| w.disconnect_owed) {
            return Some(self.clock.now_ms());
        }
        state.work.iter().filter_map(|w| w.connect_due).min()
    }

    /// Runs every piece of work that is due. `current_alt` reports the alt
    /// the host has selected for a direction right now.
    ///
    /// Events are delivered after the notifier lock is released. Returns
    /// the number delivered.
    pub fn run_pending<F>(&self, current_alt: F) -> usize
    where
        F: Fn(Direction) -> u8,
    {
        let now = self.clock.now_ms();
        let mut events: Vec<HostEvent> = Vec::new();

        {
            let mut state = self.state.lock();
            if core::mem::take(&mut state.cable_pending) {
                events.push(HostEvent::CableDisconnected);
            }

            for direction in Direction::ALL {
                let work = &mut state.work[direction.index()];
                if core::mem::take(&mut work.disconnect_owed) {
                    events.push(HostEvent::disconnected(direction));
                    work.announced = None;
                }

                match work.connect_due {
                    Some(due) if due <= now => {}
                    _ => continue,
                }
                work.connect_due = None;

                let alt = current_alt(direction);
                match (alt, work.announced) {
                    (0, Some(_)) => {
                        events.push(HostEvent::disconnected(direction));
                        work.announced = None;
                    }
                    (0, None) => {}
                    (k, None) => {
                        events.push(HostEvent::connected(direction));
                        work.announced = Some(k);
                    }
                    (k, Some(j)) if j != k => {
                        events.push(HostEvent::disconnected(direction));
                        events.push(HostEvent::connected(direction));
                        work.announced = Some(k);
                    }
                    (_, Some(_)) => {}
                }
            }
        }

        for event in events.iter() {
            log::debug!("uac2: host event {}", event.as_str());
            self.sink.send(*event);
        }
        events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<HostEvent>>);

    impl HostEventSink for Recorder {
        fn send(&self, event: HostEvent) {
            self.0.lock().push(event);
        }
    }

    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn setup() -> (Arc<Recorder>, Arc<ManualClock>, EventNotifier) {
        let sink = Arc::new(Recorder::default());
        let clock = Arc::new(ManualClock::default());
        let n = EventNotifier::new(sink.clone(), clock.clone());
        (sink, clock, n)
    }

    #[test]
    fn test_connect_is_delayed() {
        let (sink, clock, n) = setup();
        n.schedule_connect(Direction::Playback);

        assert_eq!(n.run_pending(|_| 2), 0);
        clock.0.store(29, Ordering::SeqCst);
        assert_eq!(n.run_pending(|_| 2), 0);
        clock.0.store(30, Ordering::SeqCst);
        assert_eq!(n.run_pending(|_| 2), 1);

        assert_eq!(*sink.0.lock(), vec![HostEvent::PlaybackConnected]);
    }

    #[test]
    fn test_flapping_alt_reports_disconnect_now() {
        let (sink, clock, n) = setup();

        // connected and announced
        n.schedule_connect(Direction::Capture);
        clock.0.store(30, Ordering::SeqCst);
        n.run_pending(|_| 1);

        // host drops and restores the same alt before the work runs
        n.schedule_disconnect(Direction::Capture);
        n.schedule_connect(Direction::Capture);
        assert_eq!(n.next_deadline(), Some(30));
        assert_eq!(n.run_pending(|_| 1), 1);
        assert_eq!(n.next_deadline(), Some(60));

        clock.0.store(60, Ordering::SeqCst);
        assert_eq!(n.run_pending(|_| 1), 1);
        assert_eq!(
            *sink.0.lock(),
            vec![
                HostEvent::CaptureConnected,
                HostEvent::CaptureDisconnected,
                HostEvent::CaptureConnected,
            ]
        );
    }

    #[test]
    fn test_unannounced_teardown_is_silent() {
        let (sink, clock, n) = setup();
        n.schedule_connect(Direction::Playback);
        n.schedule_disconnect(Direction::Playback);
        assert_eq!(n.next_deadline(), None);

        clock.0.store(30, Ordering::SeqCst);
        assert_eq!(n.run_pending(|_| 0), 0);
        assert!(sink.0.lock().is_empty());
    }

    #[test]
    fn test_alt_change_reannounces() {
        let (sink, clock, n) = setup();
        n.schedule_connect(Direction::Playback);
        clock.0.store(30, Ordering::SeqCst);
        n.run_pending(|_| 2);

        n.schedule_connect(Direction::Playback);
        clock.0.store(60, Ordering::SeqCst);
        n.run_pending(|_| 4);

        assert_eq!(
            *sink.0.lock(),
            vec![
                HostEvent::PlaybackConnected,
                HostEvent::PlaybackDisconnected,
                HostEvent::PlaybackConnected,
            ]
        );
    }

    #[test]
    fn test_disconnect_pulls_deadline_forward() {
        let (sink, clock, n) = setup();
        n.schedule_connect(Direction::Playback);
        clock.0.store(30, Ordering::SeqCst);
        n.run_pending(|_| 1);

        clock.0.store(40, Ordering::SeqCst);
        n.schedule_connect(Direction::Playback);
        n.schedule_disconnect(Direction::Playback);
        assert_eq!(n.next_deadline(), Some(40));
        n.run_pending(|_| 0);

        assert_eq!(
            *sink.0.lock(),
            vec![HostEvent::PlaybackConnected, HostEvent::PlaybackDisconnected]
        );
    }

    #[test]
    fn test_cable_disconnect_first() {
        let (sink, clock, n) = setup();
        n.schedule_connect(Direction::Playback);
        n.schedule_connect(Direction::Capture);
        clock.0.store(30, Ordering::SeqCst);
        n.run_pending(|_| 2);
        sink.0.lock().clear();

        n.cable_disconnected();
        n.run_pending(|_| 0);
        assert_eq!(
            *sink.0.lock(),
            vec![
                HostEvent::CableDisconnected,
                HostEvent::PlaybackDisconnected,
                HostEvent::CaptureDisconnected,
            ]
        );
    }

    #[test]
    fn test_uevent_strings() {
        assert_eq!(HostEvent::CableDisconnected.as_str(), "HOST_CABLE_DISCONNECTED");
        assert_eq!(
            HostEvent::connected(Direction::Capture).as_str(),
            "HOST_CAPTURE_STREAM_PARAMS_CHANGED"
        );
    }
}
