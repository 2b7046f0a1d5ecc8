//! Detection state machine: active/idle with a debounced reset timer.
//!
//! Every accepted detection emits a [`DetectionEvent`] and pushes the reset
//! point forward, so continuous triggering keeps the signal on without
//! flicker. The pending reset is a tokio task guarded by a generation
//! counter: only the most recently armed timer may flip the state back to
//! idle, which makes cancel-vs-fire races harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::DetectionEvent;

struct CoordinatorState {
    active: bool,
    last_detection: Option<DateTime<Utc>>,
    /// Bumped on every (re)arm and on shutdown. A reset task fires only if
    /// its generation is still current when the sleep elapses.
    timer_gen: u64,
    reset_task: Option<JoinHandle<()>>,
    shut_down: bool,
}

/// Owns the active/idle detection state and the single pending reset timer.
///
/// Shared between transport handlers and the reset task; all mutation goes
/// through the internal mutex, so interleaved detections transition the
/// state machine correctly regardless of ordering.
pub struct DetectionCoordinator {
    entry_id: String,
    sensor_duration: Duration,
    events: mpsc::Sender<DetectionEvent>,
    state: Mutex<CoordinatorState>,
}

impl DetectionCoordinator {
    pub fn new(
        entry_id: String,
        sensor_duration: Duration,
        events: mpsc::Sender<DetectionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            entry_id,
            sensor_duration,
            events,
            state: Mutex::new(CoordinatorState {
                active: false,
                last_detection: None,
                timer_gen: 0,
                reset_task: None,
                shut_down: false,
            }),
        })
    }

    /// Records an accepted detection: emits an event, transitions to active
    /// and (re)arms the reset timer. Must be called from within a tokio
    /// runtime.
    pub fn on_detection(self: &Arc<Self>) {
        let now = Utc::now();
        let mut state = self.state.lock();
        if state.shut_down {
            return;
        }

        state.active = true;
        state.last_detection = Some(now);
        state.timer_gen += 1;
        let generation = state.timer_gen;

        if let Some(task) = state.reset_task.take() {
            task.abort();
        }

        // Event delivery must never block ingestion; a full channel drops
        // the event.
        let event = DetectionEvent::new(self.entry_id.clone(), now);
        if let Err(e) = self.events.try_send(event) {
            warn!("detector '{}': dropping detection event: {}", self.entry_id, e);
        }

        let coordinator = Arc::clone(self);
        state.reset_task = Some(tokio::spawn(async move {
            tokio::time::sleep(coordinator.sensor_duration).await;
            let mut state = coordinator.state.lock();
            if state.timer_gen == generation {
                state.active = false;
                state.reset_task = None;
                debug!("detector '{}': reset to idle", coordinator.entry_id);
            }
        }));
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_detection
    }

    /// Cancels any pending reset timer and blocks further transitions.
    /// Idempotent; cancelling an already-fired timer is a no-op.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.timer_gen += 1;
        if let Some(task) = state.reset_task.take() {
            task.abort();
        }
    }
}
