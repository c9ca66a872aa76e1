//! [`ServoLoop`] – the per-frame visual-servo controller.
//!
//! Each perception cycle the loop decides one thing to do:
//!
//! 1. **Signals** – drain operator text from the intake queue.
//! 2. **Pose** – refresh from telemetry (published on the telemetry topic),
//!    falling back to the cached pose.
//! 3. **Quiesce** – an object in view stops any running table search.
//! 4. **Act** – with auto-pick on and no motion in flight, either pick the
//!    object (when centred under the gripper) or take one slow step toward
//!    it.
//! 5. **Lost** – after too many empty cycles the remembered target is
//!    dropped and the search restarts.
//!
//! Every give-up path (divergence, centering budget spent, pick or place
//! failure, lost target) resets the centering state and restarts the search.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use graspos_hal::gripper::SimGripper;
//! use graspos_hal::sim::SimArm;
//! use graspos_kernel::{MotionConfig, MotionSupervisor};
//! use graspos_middleware::{EventBus, ScriptedFeed};
//! use graspos_runtime::search::SearchScheduler;
//! use graspos_runtime::sequence::{SequenceConfig, SequenceEngine};
//! use graspos_runtime::servo_loop::{ServoConfig, ServoLoop};
//! use graspos_types::Pose;
//!
//! # async fn demo() {
//! let arm = Arc::new(SimArm::new(Pose::new(0.5, 0.4, 0.1, -2.8, -1.3, 0.0)));
//! let supervisor = Arc::new(MotionSupervisor::new(arm.clone(), arm.clone(), MotionConfig::default()));
//! let bus = EventBus::default();
//! let engine = Arc::new(SequenceEngine::new(
//!     supervisor.clone(),
//!     Arc::new(SimGripper::new()),
//!     bus.clone(),
//!     SequenceConfig::default(),
//! ));
//! let search = SearchScheduler::new(supervisor.clone(), bus.clone(), Duration::from_millis(1500));
//! let mut servo = ServoLoop::new(supervisor, engine, search, bus, ServoConfig::default());
//!
//! let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let stats = servo.run(&mut ScriptedFeed::new([vec![]]), stop_rx).await;
//! assert_eq!(stats.cycles, 1);
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use graspos_kernel::MotionSupervisor;
use graspos_middleware::{EventBus, PerceptionSource};
use graspos_perception::{DetectionFilter, FilterSettings, GripForceTable, PlacementMap, mapper};
use graspos_types::{CalibrationProfile, Detection, EventPayload, Pose, WaypointGrid, WorkspacePoint};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::divergence::DivergenceGuard;
use crate::search::{SearchControl, SearchHandle, SearchScheduler};
use crate::sequence::SequenceEngine;

const SOURCE: &str = "graspos-runtime::servo_loop";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Servo loop tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub auto_pick: bool,
    /// Place at the label's destination after a pick instead of carrying the
    /// object home.
    pub auto_place: bool,
    /// Share of the remaining distance covered by one centering step.
    pub centering_step_fraction: f64,
    pub max_centering_attempts: u32,
    pub divergence_threshold_px: f64,
    /// Empty cycles tolerated before a remembered target counts as lost.
    pub lost_threshold_cycles: u32,
    /// How long to wait for a running search to acknowledge a stop.
    pub quiesce_timeout_ms: u64,
    pub search_on_start: bool,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            auto_pick: true,
            auto_place: false,
            centering_step_fraction: 0.6,
            max_centering_attempts: 10,
            divergence_threshold_px: 20.0,
            lost_threshold_cycles: 30,
            quiesce_timeout_ms: 2000,
            search_on_start: true,
        }
    }
}

impl ServoConfig {
    pub fn quiesce_timeout(&self) -> Duration {
        Duration::from_millis(self.quiesce_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes, signals and statistics
// ─────────────────────────────────────────────────────────────────────────────

/// What one call to [`ServoLoop::cycle`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Neither telemetry nor the cache could provide a pose.
    NoPose,
    /// Nothing to do this cycle.
    Idle,
    /// A search was asked to stop but has not yet acknowledged.
    Quiescing,
    /// Centering moved the object away from the gripper; target dropped.
    Diverged,
    Picked { label: String },
    /// A pick or place sequence failed; target dropped.
    Aborted,
    /// One centering step was taken.
    Centering,
    CenteringExhausted,
    /// The remembered target has been out of view too long.
    Lost,
}

/// Operator commands understood on the intake channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorSignal {
    InvertX,
    InvertY,
    /// `Some` sets auto mode, `None` toggles it.
    Auto(Option<bool>),
    Search,
    Home,
}

impl OperatorSignal {
    /// Parse one intake message.  Unknown text yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "invert_x" | "x" => Some(Self::InvertX),
            "invert_y" | "y" => Some(Self::InvertY),
            "auto" | "a" => Some(Self::Auto(None)),
            "auto on" => Some(Self::Auto(Some(true))),
            "auto off" => Some(Self::Auto(Some(false))),
            "search" | "s" => Some(Self::Search),
            "home" | "h" => Some(Self::Home),
            _ => None,
        }
    }
}

/// Counters reported when the session ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub cycles: u64,
    pub objects_processed: u64,
    pub started_at: DateTime<Utc>,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            cycles: 0,
            objects_processed: 0,
            started_at: Utc::now(),
        }
    }

    pub fn runtime(&self) -> chrono::TimeDelta {
        Utc::now() - self.started_at
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServoLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Drives detection, centering, picking and searching for one session.
pub struct ServoLoop {
    supervisor: Arc<MotionSupervisor>,
    engine: Arc<SequenceEngine>,
    search: SearchScheduler,
    search_task: Option<SearchHandle>,
    bus: EventBus,
    config: ServoConfig,

    calibration: watch::Sender<CalibrationProfile>,
    filter: DetectionFilter,
    placement: PlacementMap,
    grip_forces: GripForceTable,
    grid: WaypointGrid,
    signals: Option<mpsc::Receiver<String>>,

    guard: DivergenceGuard,
    target: Option<String>,
    centering_attempts: u32,
    lost_cycles: u32,
    stats: SessionStats,
}

impl ServoLoop {
    pub fn new(
        supervisor: Arc<MotionSupervisor>,
        engine: Arc<SequenceEngine>,
        search: SearchScheduler,
        bus: EventBus,
        config: ServoConfig,
    ) -> Self {
        let (calibration, _) = watch::channel(CalibrationProfile::default());
        Self {
            supervisor,
            engine,
            search,
            search_task: None,
            bus,
            config,
            calibration,
            filter: DetectionFilter::new(&FilterSettings::default()),
            placement: PlacementMap::default(),
            grip_forces: GripForceTable::default(),
            grid: WaypointGrid::default(),
            signals: None,
            guard: DivergenceGuard::new(config.divergence_threshold_px),
            target: None,
            centering_attempts: 0,
            lost_cycles: 0,
            stats: SessionStats::new(),
        }
    }

    pub fn with_calibration(self, calibration: CalibrationProfile) -> Self {
        self.calibration.send_replace(calibration);
        self
    }

    pub fn with_filter(mut self, settings: &FilterSettings) -> Self {
        self.filter = DetectionFilter::new(settings);
        self
    }

    pub fn with_placement(mut self, placement: PlacementMap) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_grip_forces(mut self, forces: GripForceTable) -> Self {
        self.grip_forces = forces;
        self
    }

    pub fn with_grid(mut self, grid: WaypointGrid) -> Self {
        self.grid = grid;
        self
    }

    /// Attach the operator intake queue.
    pub fn with_signals(mut self, signals: mpsc::Receiver<String>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    /// Snapshot of the active calibration.
    pub fn calibration(&self) -> CalibrationProfile {
        *self.calibration.borrow()
    }

    /// Watch calibration changes made by operator signals.
    pub fn subscribe_calibration(&self) -> watch::Receiver<CalibrationProfile> {
        self.calibration.subscribe()
    }

    pub fn search_control(&self) -> &SearchControl {
        self.search.control()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Start a table search over the configured grid unless one is already
    /// active or the arm is moving.
    pub fn start_search(&mut self) -> bool {
        match self.search.start(self.grid.clone()) {
            Some(handle) => {
                self.search_task = Some(handle);
                true
            }
            None => false,
        }
    }

    async fn stop_search(&self) -> bool {
        let control = self.search.control();
        if !control.is_active() {
            return true;
        }
        control.request_stop();
        control.wait_stopped(self.config.quiesce_timeout()).await
    }

    /// Drop the current target and go back to searching.
    fn abandon(&mut self) {
        self.target = None;
        self.centering_attempts = 0;
        self.lost_cycles = 0;
        self.guard.reset();
        self.start_search();
    }

    // ── Signals ──────────────────────────────────────────────────────────────

    async fn drain_signals(&mut self) {
        let mut pending = Vec::new();
        if let Some(rx) = self.signals.as_mut() {
            while let Ok(text) = rx.try_recv() {
                pending.push(text);
            }
        }
        for text in pending {
            let _ = self.bus.emit(SOURCE, EventPayload::OperatorSignal(text.clone()));
            match OperatorSignal::parse(&text) {
                Some(signal) => self.apply_signal(signal).await,
                None => debug!(text, "unrecognised operator signal"),
            }
        }
    }

    /// Act on one operator signal.
    pub async fn apply_signal(&mut self, signal: OperatorSignal) {
        match signal {
            OperatorSignal::InvertX => {
                self.calibration.send_modify(|c| c.invert_x = !c.invert_x);
                info!(invert_x = self.calibration().invert_x, "x axis inversion toggled");
            }
            OperatorSignal::InvertY => {
                self.calibration.send_modify(|c| c.invert_y = !c.invert_y);
                info!(invert_y = self.calibration().invert_y, "y axis inversion toggled");
            }
            OperatorSignal::Auto(mode) => {
                let on = mode.unwrap_or(!self.config.auto_pick);
                self.config.auto_pick = on;
                self.config.auto_place = on;
                info!(auto_pick = on, auto_place = on, "auto mode changed");
            }
            OperatorSignal::Search => {
                if !self.start_search() {
                    debug!("search request ignored");
                }
            }
            OperatorSignal::Home => {
                if !self.stop_search().await {
                    warn!("search still winding down, home request dropped");
                    return;
                }
                if let Err(e) = self.engine.home().await {
                    warn!(error = %e, "home request failed");
                }
            }
        }
    }

    // ── Cycle ────────────────────────────────────────────────────────────────

    /// Process one perception cycle.
    #[instrument(skip(self, detections), fields(cycle = self.stats.cycles + 1))]
    pub async fn cycle(&mut self, detections: Vec<Detection>) -> CycleOutcome {
        self.stats.cycles += 1;
        self.drain_signals().await;

        let pose = match self.supervisor.refresh_pose().await {
            Ok(pose) => {
                let _ = self.bus.emit(SOURCE, EventPayload::PoseUpdate(pose));
                pose
            }
            Err(e) => match self.supervisor.current_pose() {
                Some(cached) => {
                    debug!(error = %e, "telemetry read failed, using cached pose");
                    cached
                }
                None => {
                    warn!(error = %e, "no pose available");
                    return CycleOutcome::NoPose;
                }
            },
        };

        let detections = self.filter.apply(detections);
        let Some(detection) = detections.into_iter().next() else {
            return self.on_empty_cycle();
        };

        self.lost_cycles = 0;
        self.target = Some(detection.label.clone());
        if self.search.control().is_active() {
            info!(label = %detection.label, "object found, stopping search");
            if !self.stop_search().await {
                return CycleOutcome::Quiescing;
            }
        }

        if !self.config.auto_pick || self.supervisor.is_moving() || self.engine.is_active() {
            return CycleOutcome::Idle;
        }
        self.act(detection, pose).await
    }

    fn on_empty_cycle(&mut self) -> CycleOutcome {
        if self.target.is_none() {
            return CycleOutcome::Idle;
        }
        self.lost_cycles += 1;
        if self.lost_cycles > self.config.lost_threshold_cycles
            && !self.search.control().is_active()
            && !self.supervisor.is_moving()
        {
            info!(cycles = self.lost_cycles, "target lost, searching");
            self.abandon();
            return CycleOutcome::Lost;
        }
        CycleOutcome::Idle
    }

    async fn act(&mut self, detection: Detection, pose: Pose) -> CycleOutcome {
        let cal = self.calibration();
        let distance_px = mapper::pixel_distance(detection.centroid, &cal);

        if self.guard.record(distance_px, self.centering_attempts > 0) {
            warn!(
                label = %detection.label,
                distance_px,
                "object moving away while centering, check axis inversion"
            );
            self.abandon();
            return CycleOutcome::Diverged;
        }

        let goal = mapper::map(detection.centroid, pose.xy_mm(), &cal);

        if mapper::is_centered(detection.centroid, &cal) {
            return self.pick_and_deliver(&detection.label, goal).await;
        }

        if self.centering_attempts >= self.config.max_centering_attempts {
            warn!(attempts = self.centering_attempts, "centering failed, searching for a better view");
            self.abandon();
            return CycleOutcome::CenteringExhausted;
        }

        self.centering_attempts += 1;
        info!(
            label = %detection.label,
            attempt = self.centering_attempts,
            max = self.config.max_centering_attempts,
            distance_px,
            "centering"
        );
        match self
            .engine
            .approach(goal, self.config.centering_step_fraction, 1)
            .await
        {
            Ok(_) => CycleOutcome::Centering,
            Err(e) => {
                warn!(error = %e, "centering step failed");
                self.abandon();
                CycleOutcome::Aborted
            }
        }
    }

    async fn pick_and_deliver(&mut self, label: &str, goal: WorkspacePoint) -> CycleOutcome {
        let force = self.grip_forces.force_for(label);
        info!(label, x_mm = goal.x_mm, y_mm = goal.y_mm, force, "object centred, picking");

        if let Err(e) = self.engine.pick(goal, label, force).await {
            warn!(label, error = %e, "pick failed");
            self.abandon();
            return CycleOutcome::Aborted;
        }

        let delivered = if self.config.auto_place {
            self.engine.place(self.placement.destination(label), label).await
        } else {
            self.engine.return_and_release().await
        };
        if let Err(e) = delivered {
            warn!(label, error = %e, "delivery failed");
            self.abandon();
            return CycleOutcome::Aborted;
        }

        self.stats.objects_processed += 1;
        let _ = self.bus.emit(
            SOURCE,
            EventPayload::ObjectProcessed {
                label: label.to_string(),
            },
        );
        info!(label, total = self.stats.objects_processed, "object processed");
        self.abandon();
        CycleOutcome::Picked {
            label: label.to_string(),
        }
    }

    // ── Session ──────────────────────────────────────────────────────────────

    /// Drive cycles from `source` until it ends or `shutdown` flips to
    /// `true` (or its sender is dropped), then stop any running search.
    pub async fn run(
        &mut self,
        source: &mut dyn PerceptionSource,
        mut shutdown: watch::Receiver<bool>,
    ) -> SessionStats {
        if self.config.search_on_start {
            self.start_search();
        }

        loop {
            if *shutdown.borrow() {
                break;
            }
            let detections = tokio::select! {
                next = source.next_cycle() => match next {
                    Some(detections) => detections,
                    None => {
                        info!("perception feed ended");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            };
            let outcome = self.cycle(detections).await;
            debug!(?outcome, "cycle finished");
        }

        if !self.stop_search().await {
            warn!("search did not stop before shutdown");
        }
        if let Some(task) = self.search_task.take() {
            if task.is_finished() {
                if let Ok(outcome) = task.join().await {
                    debug!(visited = outcome.visited, "last search joined");
                }
            }
        }
        info!(
            cycles = self.stats.cycles,
            objects = self.stats.objects_processed,
            "servo session ended"
        );
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graspos_hal::gripper::{GripperCall, SimGripper};
    use graspos_hal::sim::SimArm;
    use graspos_kernel::MotionConfig;
    use graspos_middleware::{ScriptedFeed, Topic};
    use graspos_types::{BoundingBox, SearchState};

    use crate::sequence::SequenceConfig;

    struct Rig {
        arm: Arc<SimArm>,
        gripper: Arc<SimGripper>,
        bus: EventBus,
        servo: ServoLoop,
    }

    fn start_pose() -> Pose {
        Pose::new(0.5, 0.4, 0.1, -2.8246, -1.3081, -0.0257)
    }

    async fn rig_with(config: ServoConfig) -> Rig {
        let arm = Arc::new(SimArm::new(start_pose()));
        let supervisor = Arc::new(MotionSupervisor::new(arm.clone(), arm.clone(), MotionConfig::default()));
        supervisor.connect().await.unwrap();
        let gripper = Arc::new(SimGripper::new());
        let bus = EventBus::default();
        let engine = Arc::new(SequenceEngine::new(
            Arc::clone(&supervisor),
            gripper.clone(),
            bus.clone(),
            SequenceConfig::default(),
        ));
        let search = SearchScheduler::new(Arc::clone(&supervisor), bus.clone(), Duration::from_millis(1500));
        let servo = ServoLoop::new(supervisor, engine, search, bus.clone(), config).with_grid(WaypointGrid::new(vec![]));
        Rig {
            arm,
            gripper,
            bus,
            servo,
        }
    }

    async fn rig() -> Rig {
        rig_with(ServoConfig {
            search_on_start: false,
            ..ServoConfig::default()
        })
        .await
    }

    /// 100×100 px box centred on `(cx, cy)`.
    fn seen(label: &str, cx: f64, cy: f64) -> Detection {
        Detection::new(label, 0.9, BoundingBox::new(cx - 50.0, cy - 50.0, cx + 50.0, cy + 50.0))
    }

    #[test]
    fn signals_parse_long_and_short_forms() {
        assert_eq!(OperatorSignal::parse("invert_x"), Some(OperatorSignal::InvertX));
        assert_eq!(OperatorSignal::parse(" Y "), Some(OperatorSignal::InvertY));
        assert_eq!(OperatorSignal::parse("auto off"), Some(OperatorSignal::Auto(Some(false))));
        assert_eq!(OperatorSignal::parse("a"), Some(OperatorSignal::Auto(None)));
        assert_eq!(OperatorSignal::parse("s"), Some(OperatorSignal::Search));
        assert_eq!(OperatorSignal::parse("home"), Some(OperatorSignal::Home));
        assert_eq!(OperatorSignal::parse("dance"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn centred_object_is_picked_and_carried_home() {
        let mut rig = rig().await;
        let outcome = rig.servo.cycle(vec![seen("mouse", 640.0, 440.0)]).await;

        assert_eq!(outcome, CycleOutcome::Picked { label: "mouse".into() });
        assert_eq!(
            rig.gripper.calls(),
            vec![GripperCall::Open, GripperCall::Close(18), GripperCall::Open]
        );
        let moves = rig.arm.moves();
        assert_eq!(moves.len(), 6);
        assert!((moves[2].x - 0.5).abs() < 1e-9 && (moves[2].y - 0.4).abs() < 1e-9);
        assert!(rig.arm.commands().last().unwrap().starts_with("movej("));
        assert_eq!(rig.servo.stats().objects_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_place_delivers_to_label_destination() {
        let mut rig = rig_with(ServoConfig {
            search_on_start: false,
            auto_place: true,
            ..ServoConfig::default()
        })
        .await;
        let mut sequence_events = rig.bus.subscribe_to(Topic::Sequence);

        let outcome = rig.servo.cycle(vec![seen("remote", 640.0, 440.0)]).await;

        assert_eq!(outcome, CycleOutcome::Picked { label: "remote".into() });
        let last = *rig.arm.moves().last().unwrap();
        assert!((last.x - 0.4).abs() < 1e-9 && (last.y + 0.4).abs() < 1e-9);
        assert!(sequence_events.try_recv().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pick_never_reaches_the_placement_destination() {
        let mut rig = rig_with(ServoConfig {
            search_on_start: false,
            auto_place: true,
            ..ServoConfig::default()
        })
        .await;
        rig.arm.stall_after(2);

        let outcome = rig.servo.cycle(vec![seen("remote", 640.0, 440.0)]).await;

        assert_eq!(outcome, CycleOutcome::Aborted);
        assert_eq!(rig.gripper.calls(), vec![GripperCall::Open]);
        assert!(
            rig.arm
                .moves()
                .iter()
                .all(|m| (m.x - 0.4).abs() > 1e-6 || (m.y + 0.4).abs() > 1e-6),
            "a move went to the remote's drop-off point"
        );
        assert_eq!(rig.servo.stats().objects_processed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshed_pose_is_published_on_telemetry_topic() {
        let mut rig = rig().await;
        let mut poses = rig.bus.subscribe_to(Topic::Telemetry);

        assert_eq!(rig.servo.cycle(vec![]).await, CycleOutcome::Idle);

        let event = poses.try_recv().expect("no pose published");
        assert!(matches!(event.payload, EventPayload::PoseUpdate(p) if p == start_pose()));
    }

    #[tokio::test(start_paused = true)]
    async fn off_centre_object_takes_one_partial_step() {
        let mut rig = rig().await;
        // 100 px right of the reference; x is inverted, so the goal is 35 mm toward -X.
        let outcome = rig.servo.cycle(vec![seen("mouse", 740.0, 440.0)]).await;

        assert_eq!(outcome, CycleOutcome::Centering);
        let moves = rig.arm.moves();
        assert_eq!(moves.len(), 1);
        assert!((moves[0].x - 0.479).abs() < 1e-9);
        assert!((moves[0].z - 0.1).abs() < 1e-12);
        assert!(rig.gripper.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn growing_pixel_distance_while_centering_abandons_target() {
        let mut rig = rig().await;
        assert_eq!(rig.servo.cycle(vec![seen("mouse", 740.0, 440.0)]).await, CycleOutcome::Centering);

        let outcome = rig.servo.cycle(vec![seen("mouse", 800.0, 440.0)]).await;
        assert_eq!(outcome, CycleOutcome::Diverged);
        assert_eq!(rig.arm.moves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn centering_budget_is_bounded() {
        let mut rig = rig_with(ServoConfig {
            search_on_start: false,
            max_centering_attempts: 2,
            ..ServoConfig::default()
        })
        .await;
        let frame = || vec![seen("mouse", 740.0, 440.0)];

        assert_eq!(rig.servo.cycle(frame()).await, CycleOutcome::Centering);
        assert_eq!(rig.servo.cycle(frame()).await, CycleOutcome::Centering);
        assert_eq!(rig.servo.cycle(frame()).await, CycleOutcome::CenteringExhausted);
        assert_eq!(rig.arm.moves().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn target_is_lost_after_threshold_empty_cycles() {
        let mut rig = rig().await;
        rig.servo.cycle(vec![seen("mouse", 740.0, 440.0)]).await;

        for _ in 0..30 {
            assert_eq!(rig.servo.cycle(vec![]).await, CycleOutcome::Idle);
        }
        assert_eq!(rig.servo.cycle(vec![]).await, CycleOutcome::Lost);
        assert_eq!(rig.servo.cycle(vec![]).await, CycleOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn filtered_detections_count_as_empty() {
        let mut rig = rig().await;
        let faint = Detection::new("mouse", 0.2, BoundingBox::new(590.0, 390.0, 690.0, 490.0));
        let outcome = rig.servo.cycle(vec![faint, seen("person", 640.0, 440.0)]).await;

        assert_eq!(outcome, CycleOutcome::Idle);
        assert!(rig.arm.moves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_pick_off_only_watches() {
        let mut rig = rig_with(ServoConfig {
            search_on_start: false,
            auto_pick: false,
            ..ServoConfig::default()
        })
        .await;
        let outcome = rig.servo.cycle(vec![seen("mouse", 640.0, 440.0)]).await;

        assert_eq!(outcome, CycleOutcome::Idle);
        assert!(rig.arm.moves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn no_pose_without_telemetry_or_cache() {
        let arm = Arc::new(SimArm::new(start_pose()));
        arm.fail_telemetry(true);
        let supervisor = Arc::new(MotionSupervisor::new(arm.clone(), arm.clone(), MotionConfig::default()));
        let bus = EventBus::default();
        let engine = Arc::new(SequenceEngine::new(
            Arc::clone(&supervisor),
            Arc::new(SimGripper::new()),
            bus.clone(),
            SequenceConfig::default(),
        ));
        let search = SearchScheduler::new(Arc::clone(&supervisor), bus.clone(), Duration::from_millis(1500));
        let mut servo = ServoLoop::new(supervisor, engine, search, bus, ServoConfig::default());

        assert_eq!(servo.cycle(vec![seen("mouse", 640.0, 440.0)]).await, CycleOutcome::NoPose);
        assert!(arm.moves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cached_pose_covers_telemetry_dropout() {
        let mut rig = rig().await;
        rig.arm.fail_telemetry(true);
        // Auto-pick off keeps the failing telemetry away from the motion path.
        rig.servo.apply_signal(OperatorSignal::Auto(Some(false))).await;

        let outcome = rig.servo.cycle(vec![seen("mouse", 640.0, 440.0)]).await;
        assert_eq!(outcome, CycleOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn object_in_view_stops_a_dwelling_search() {
        let mut rig = rig().await;
        rig.servo = rig.servo.with_grid(WaypointGrid::default());
        assert!(rig.servo.start_search());
        tokio::time::sleep(Duration::from_millis(500)).await;

        let outcome = rig.servo.cycle(vec![seen("mouse", 640.0, 440.0)]).await;
        assert_eq!(outcome, CycleOutcome::Picked { label: "mouse".into() });
        // One search move, then the full pick and return.
        assert_eq!(rig.arm.moves().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_search_reports_quiescing() {
        let mut rig = rig().await;
        rig.servo = rig.servo.with_grid(WaypointGrid::default());
        rig.arm.freeze();
        assert!(rig.servo.start_search());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let outcome = rig.servo.cycle(vec![seen("mouse", 640.0, 440.0)]).await;
        assert_eq!(outcome, CycleOutcome::Quiescing);
        assert_eq!(rig.servo.search_control().state(), SearchState::StopRequested);
    }

    #[tokio::test(start_paused = true)]
    async fn intake_signals_toggle_calibration_and_auto_mode() {
        let (tx, rx) = mpsc::channel(8);
        let mut rig = rig().await;
        rig.servo = rig.servo.with_signals(rx);
        let mut signals = rig.bus.subscribe_to(Topic::Alerts);

        tx.send("x".to_string()).await.unwrap();
        tx.send("auto off".to_string()).await.unwrap();
        tx.send("wave".to_string()).await.unwrap();
        rig.servo.cycle(vec![]).await;

        assert!(!rig.servo.calibration().invert_x);
        assert!(!rig.servo.config().auto_pick);
        assert!(!rig.servo.config().auto_place);
        let mut seen_texts = Vec::new();
        while let Some(event) = signals.try_recv() {
            if let EventPayload::OperatorSignal(text) = event.payload {
                seen_texts.push(text);
            }
        }
        assert_eq!(seen_texts, vec!["x", "auto off", "wave"]);
    }

    #[tokio::test(start_paused = true)]
    async fn home_signal_runs_joint_move() {
        let mut rig = rig().await;
        rig.servo.apply_signal(OperatorSignal::Home).await;
        assert_eq!(rig.arm.moves().last().copied(), Some(SequenceConfig::default().home_pose));
    }

    #[tokio::test(start_paused = true)]
    async fn run_counts_cycles_and_objects() {
        let mut rig = rig().await;
        let mut feed = ScriptedFeed::new([vec![], vec![seen("scissors", 640.0, 440.0)], vec![]]);
        let (_tx, rx) = watch::channel(false);

        let stats = rig.servo.run(&mut feed, rx).await;
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.objects_processed, 1);
        assert_eq!(rig.gripper.calls()[1], GripperCall::Close(25));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let mut rig = rig().await;
        let mut feed = ScriptedFeed::new([vec![], vec![]]);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let stats = rig.servo.run(&mut feed, rx).await;
        assert_eq!(stats.cycles, 0);
    }
}
