//! Background table search.
//!
//! When nothing is in view the arm sweeps a fixed grid of inspection
//! waypoints, dwelling at each so the detector gets a few clear frames.  The
//! traversal runs as its own task; the servo loop stops it as soon as an
//! object shows up.
//!
//! [`SearchControl`] is the one synchronised handle both sides share.  It
//! wraps a [`tokio::sync::watch`] channel so that stop requests wake a
//! dwelling traversal immediately and the servo loop can await the
//! traversal's acknowledgement instead of sleeping on a flag.
//!
//! ```text
//!   Idle ──start──▶ Running ──request_stop──▶ StopRequested
//!                      │                            │
//!                      └──── exhausted ────▶ Stopped ◀┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use graspos_kernel::MotionSupervisor;
use graspos_middleware::EventBus;
use graspos_types::{ArmError, EventPayload, SearchState, WaypointGrid};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SOURCE: &str = "graspos-runtime::search";

/// Search tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Pause at each waypoint for the detector.
    pub dwell_ms: u64,
    pub grid: WaypointGrid,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            dwell_ms: 1500,
            grid: WaypointGrid::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SearchControl
// ─────────────────────────────────────────────────────────────────────────────

/// Shared search lifecycle cell.  Clone it cheaply.
#[derive(Clone, Debug)]
pub struct SearchControl {
    state: Arc<watch::Sender<SearchState>>,
}

impl Default for SearchControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchControl {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SearchState::Idle);
        Self { state: Arc::new(tx) }
    }

    pub fn state(&self) -> SearchState {
        *self.state.borrow()
    }

    /// `true` while a traversal task exists (running or winding down).
    pub fn is_active(&self) -> bool {
        matches!(self.state(), SearchState::Running | SearchState::StopRequested)
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    /// Ask a running traversal to stop.  Returns `false` when there was
    /// nothing running.
    ///
    /// The request is honoured between moves: a move already in flight runs
    /// to confirmation or to its deadline first, so the stop may take up to
    /// one move timeout to land.
    pub fn request_stop(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SearchState::Running {
                *state = SearchState::StopRequested;
                true
            } else {
                false
            }
        })
    }

    /// Wait up to `timeout` for the traversal to acknowledge and stop.
    /// Returns `true` once no traversal is active.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let mut rx = self.subscribe();
        let stopped = tokio::time::timeout(
            timeout,
            rx.wait_for(|s| !matches!(s, SearchState::Running | SearchState::StopRequested)),
        )
        .await;
        matches!(stopped, Ok(Ok(_)))
    }

    fn begin(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SearchState::Idle | SearchState::Stopped) {
                *state = SearchState::Running;
                true
            } else {
                false
            }
        })
    }

    fn stop_requested(&self) -> bool {
        self.state() == SearchState::StopRequested
    }

    fn finish(&self) {
        self.state.send_replace(SearchState::Stopped);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// How a traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Waypoints actually reached.
    pub visited: usize,
    /// `true` when a stop request ended the traversal early.
    pub cancelled: bool,
}

/// Handle to one spawned traversal.
pub struct SearchHandle {
    task: JoinHandle<SearchOutcome>,
}

impl SearchHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the traversal to end.
    pub async fn join(self) -> Result<SearchOutcome, ArmError> {
        self.task
            .await
            .map_err(|e| ArmError::Channel(format!("search task failed: {e}")))
    }
}

/// Spawns table-search traversals, at most one at a time.
pub struct SearchScheduler {
    supervisor: Arc<MotionSupervisor>,
    control: SearchControl,
    bus: EventBus,
    dwell: Duration,
}

impl SearchScheduler {
    pub fn new(supervisor: Arc<MotionSupervisor>, bus: EventBus, dwell: Duration) -> Self {
        Self {
            supervisor,
            control: SearchControl::new(),
            bus,
            dwell,
        }
    }

    pub fn control(&self) -> &SearchControl {
        &self.control
    }

    /// Start traversing `grid` in the background.
    ///
    /// Returns `None` without doing anything when a traversal is already
    /// active or the arm is moving.
    pub fn start(&self, grid: WaypointGrid) -> Option<SearchHandle> {
        if self.supervisor.is_moving() {
            debug!("search not started: arm is moving");
            return None;
        }
        if !self.control.begin() {
            debug!("search not started: already running");
            return None;
        }

        info!(waypoints = grid.len(), "table search started");
        let _ = self.bus.emit(SOURCE, EventPayload::Search(SearchState::Running));

        let task = tokio::spawn(traverse(
            Arc::clone(&self.supervisor),
            self.control.clone(),
            self.bus.clone(),
            grid,
            self.dwell,
        ));
        Some(SearchHandle { task })
    }
}

async fn traverse(
    supervisor: Arc<MotionSupervisor>,
    control: SearchControl,
    bus: EventBus,
    grid: WaypointGrid,
    dwell: Duration,
) -> SearchOutcome {
    let total = grid.len();
    let mut visited = 0;
    let mut cancelled = false;

    for (idx, waypoint) in grid.iter().enumerate() {
        if control.stop_requested() {
            cancelled = true;
            break;
        }

        debug!(waypoint = idx + 1, total, x = waypoint.x, y = waypoint.y, "search waypoint");
        if let Err(e) = supervisor
            .move_to(waypoint.target(), supervisor.config().normal())
            .await
        {
            warn!(waypoint = idx + 1, error = %e, "search waypoint not reached, skipping");
            continue;
        }
        visited += 1;

        if control.stop_requested() {
            cancelled = true;
            break;
        }

        let mut rx = control.subscribe();
        let interrupted = tokio::time::timeout(dwell, rx.wait_for(|s| *s == SearchState::StopRequested))
            .await
            .is_ok();
        if interrupted || control.stop_requested() {
            cancelled = true;
            break;
        }
    }

    control.finish();
    let _ = bus.emit(SOURCE, EventPayload::Search(SearchState::Stopped));
    if cancelled {
        info!(visited, "table search stopped");
    } else {
        info!(visited, total, "table search complete, nothing found");
    }
    SearchOutcome { visited, cancelled }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graspos_hal::sim::SimArm;
    use graspos_kernel::MotionConfig;
    use graspos_types::{Pose, Waypoint};

    async fn scheduler() -> (Arc<SimArm>, Arc<MotionSupervisor>, SearchScheduler) {
        let arm = Arc::new(SimArm::new(Pose::new(0.5, 0.4, 0.2, -2.8246, -1.3081, -0.0257)));
        let supervisor = Arc::new(MotionSupervisor::new(arm.clone(), arm.clone(), MotionConfig::default()));
        supervisor.connect().await.unwrap();
        let scheduler = SearchScheduler::new(Arc::clone(&supervisor), EventBus::default(), Duration::from_millis(1500));
        (arm, supervisor, scheduler)
    }

    #[tokio::test(start_paused = true)]
    async fn full_traversal_visits_every_waypoint() {
        let (arm, _sup, scheduler) = scheduler().await;
        let handle = scheduler.start(WaypointGrid::default()).unwrap();

        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, SearchOutcome { visited: 9, cancelled: false });
        assert_eq!(arm.moves().len(), 9);
        assert_eq!(scheduler.control().state(), SearchState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_dwell_ends_traversal_without_further_moves() {
        let (arm, _sup, scheduler) = scheduler().await;
        let handle = scheduler.start(WaypointGrid::default()).unwrap();
        let control = scheduler.control().clone();

        // First waypoint is confirmed after one poll; we are now dwelling.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(control.request_stop());
        assert!(control.wait_stopped(Duration::from_secs(2)).await);

        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, SearchOutcome { visited: 1, cancelled: true });
        assert_eq!(arm.moves().len(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(arm.moves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_the_move_in_flight() {
        let (arm, _sup, scheduler) = scheduler().await;
        arm.stall_after(0);
        let grid = WaypointGrid::new(vec![Waypoint::new(0.3, 0.6, 0.1), Waypoint::new(0.7, 0.6, 0.1)]);
        let handle = scheduler.start(grid).unwrap();
        let control = scheduler.control().clone();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(control.request_stop());
        // The stalled move holds the traversal until its 5 s deadline.
        assert!(!control.wait_stopped(Duration::from_secs(2)).await);
        assert_eq!(control.state(), SearchState::StopRequested);

        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome, SearchOutcome { visited: 0, cancelled: true });
        assert_eq!(arm.moves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_refused_while_running() {
        let (_arm, _sup, scheduler) = scheduler().await;
        let first = scheduler.start(WaypointGrid::default()).unwrap();
        assert!(scheduler.start(WaypointGrid::default()).is_none());

        scheduler.control().request_stop();
        first.join().await.unwrap();
        assert!(scheduler.start(WaypointGrid::new(vec![])).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_waypoint_is_skipped() {
        let (arm, _sup, scheduler) = scheduler().await;
        arm.stall_after(1);
        let grid = WaypointGrid::new(vec![
            Waypoint::new(0.3, 0.6, 0.1),
            Waypoint::new(0.5, 0.6, 0.1),
            Waypoint::new(0.7, 0.6, 0.1),
        ]);

        let outcome = scheduler.start(grid).unwrap().join().await.unwrap();
        assert_eq!(outcome, SearchOutcome { visited: 1, cancelled: false });
        assert_eq!(arm.moves().len(), 3);
    }

    #[tokio::test]
    async fn request_stop_without_search_is_a_no_op() {
        let control = SearchControl::new();
        assert!(!control.request_stop());
        assert_eq!(control.state(), SearchState::Idle);
        assert!(control.wait_stopped(Duration::from_millis(10)).await);
    }
}
