//! [`SequenceEngine`] – multi-step manipulation sequences.
//!
//! Every sequence is an ordered list of verified moves with settling pauses
//! in between.  The first move that cannot be confirmed aborts the whole
//! sequence with [`ArmError::SequenceAbort`]; nothing is rolled back, the arm
//! simply stays wherever the last confirmed move left it.  Gripper failures
//! are soft: they are logged and published as faults, and the sequence goes
//! on.
//!
//! At most one sequence runs at a time.  A second request while one is in
//! progress fails immediately with [`ArmError::SequenceBusy`].
//!
//! | Sequence | States |
//! |---|---|
//! | Pick | Approaching → Descending → Gripping → Lifting → Retreating → Done |
//! | Place | Approaching → Descending → Releasing → Retreating → Done |
//! | Home | Approaching → Done |
//! | ReturnAndRelease | Approaching → Releasing → Done |

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use graspos_hal::gripper::Gripper;
use graspos_kernel::MotionSupervisor;
use graspos_middleware::EventBus;
use graspos_types::{
    ArmError, EventPayload, Motion, MotionTarget, Pose, SequenceKind, SequenceState, WorkspacePoint,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const SOURCE: &str = "graspos-runtime::sequence";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Heights (metres), settling pauses (milliseconds) and the home pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Transit height, clear of every object on the table.
    pub safe_height: f64,
    /// Inspection height, also used for centering and search.
    pub approach_height: f64,
    pub grasp_height: f64,
    /// Release happens this far above the grasp height.
    pub release_offset: f64,
    /// Planar error at approach height that triggers one corrective move.
    pub lateral_tolerance_mm: f64,
    pub open_settle_ms: u64,
    pub step_settle_ms: u64,
    pub grasp_settle_ms: u64,
    pub release_settle_ms: u64,
    pub drop_settle_ms: u64,
    pub home_pose: Pose,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            safe_height: 0.200,
            approach_height: 0.100,
            grasp_height: 0.00001,
            release_offset: 0.010,
            lateral_tolerance_mm: 5.0,
            open_settle_ms: 1000,
            step_settle_ms: 500,
            grasp_settle_ms: 2000,
            release_settle_ms: 1500,
            drop_settle_ms: 1000,
            home_pose: Pose::new(0.7289, 0.5731, 0.1988, -2.8246, -1.3081, -0.0257),
        }
    }
}

impl SequenceConfig {
    pub fn release_height(&self) -> f64 {
        self.grasp_height + self.release_offset
    }
}

/// Result of an incremental approach that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproachOutcome {
    /// The tool is within tolerance of the target.
    Converged,
    /// Every allowed step was taken without converging.
    BudgetExhausted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Marks the engine busy for as long as it is alive.
struct ActiveSequence<'a>(&'a AtomicBool);

impl Drop for ActiveSequence<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// State tracking for one running sequence.
struct Run<'a> {
    engine: &'a SequenceEngine,
    kind: SequenceKind,
    state: SequenceState,
}

impl<'a> Run<'a> {
    fn new(engine: &'a SequenceEngine, kind: SequenceKind) -> Self {
        Self {
            engine,
            kind,
            state: SequenceState::Idle,
        }
    }

    fn enter(&mut self, state: SequenceState) {
        if self.state == state {
            return;
        }
        info!(sequence = %self.kind, from = ?self.state, to = ?state, "sequence transition");
        self.state = state;
        let _ = self.engine.bus.emit(
            SOURCE,
            EventPayload::Sequence {
                kind: self.kind,
                state,
            },
        );
    }

    /// Enter `state` and make one verified move.
    async fn step(&mut self, state: SequenceState, target: MotionTarget, motion: Motion) -> Result<Pose, ArmError> {
        self.enter(state);
        match self.engine.supervisor.move_to(target, motion).await {
            Ok(pose) => Ok(pose),
            Err(e) => Err(self.abort(e)),
        }
    }

    fn abort(&mut self, cause: ArmError) -> ArmError {
        let failed_in = self.state;
        warn!(sequence = %self.kind, state = ?failed_in, error = %cause, "sequence aborted");
        let _ = self.engine.bus.emit(
            SOURCE,
            EventPayload::Fault {
                component: format!("sequence::{}", self.kind),
                message: cause.to_string(),
            },
        );
        self.enter(SequenceState::Failed);
        ArmError::SequenceAbort {
            sequence: self.kind,
            state: failed_in,
            reason: cause.to_string(),
        }
    }
}

fn settle(ms: u64) -> tokio::time::Sleep {
    tokio::time::sleep(Duration::from_millis(ms))
}

// ─────────────────────────────────────────────────────────────────────────────
// SequenceEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Runs pick, place, home and return-and-release sequences through the
/// [`MotionSupervisor`].
pub struct SequenceEngine {
    supervisor: Arc<MotionSupervisor>,
    gripper: Arc<dyn Gripper>,
    bus: EventBus,
    config: SequenceConfig,
    active: AtomicBool,
}

impl SequenceEngine {
    pub fn new(
        supervisor: Arc<MotionSupervisor>,
        gripper: Arc<dyn Gripper>,
        bus: EventBus,
        config: SequenceConfig,
    ) -> Self {
        Self {
            supervisor,
            gripper,
            bus,
            config,
            active: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<ActiveSequence<'_>, ArmError> {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ArmError::SequenceBusy)?;
        Ok(ActiveSequence(&self.active))
    }

    fn soft_gripper(&self, action: &str, result: Result<(), ArmError>) {
        if let Err(e) = result {
            warn!(gripper = self.gripper.id(), action, error = %e, "gripper command failed, continuing");
            let _ = self.bus.emit(
                SOURCE,
                EventPayload::Fault {
                    component: self.gripper.id().to_string(),
                    message: e.to_string(),
                },
            );
        }
    }

    /// Pick the object at `target` (planar millimetres), closing the gripper
    /// with `grip_force`.  Returns the pose after retreating to safe height.
    pub async fn pick(&self, target: WorkspacePoint, label: &str, grip_force: u8) -> Result<Pose, ArmError> {
        let _active = self.begin()?;
        let cfg = &self.config;
        let motion = self.supervisor.config();
        let mut run = Run::new(self, SequenceKind::Pick);
        info!(label, x_mm = target.x_mm, y_mm = target.y_mm, grip_force, "pick started");

        self.soft_gripper("open", self.gripper.open().await);
        settle(cfg.open_settle_ms).await;

        run.step(SequenceState::Approaching, MotionTarget::from_workspace(target, cfg.safe_height), motion.normal())
            .await?;
        settle(cfg.step_settle_ms).await;

        let above = MotionTarget::from_workspace(target, cfg.approach_height);
        run.step(SequenceState::Approaching, above, motion.normal()).await?;
        settle(cfg.step_settle_ms).await;

        match self.supervisor.refresh_pose().await {
            Ok(pose) => {
                let error_mm = pose.xy_mm().distance_to(&target);
                if error_mm > cfg.lateral_tolerance_mm {
                    warn!(error_mm, "lateral error above tolerance, correcting");
                    run.step(SequenceState::Approaching, above, motion.normal()).await?;
                } else {
                    debug!(error_mm, "lateral position verified");
                }
            }
            Err(e) => debug!(error = %e, "lateral check skipped"),
        }

        run.step(SequenceState::Descending, MotionTarget::from_workspace(target, cfg.grasp_height), motion.slow())
            .await?;
        settle(cfg.step_settle_ms).await;

        run.enter(SequenceState::Gripping);
        self.soft_gripper("close", self.gripper.close(grip_force).await);
        settle(cfg.grasp_settle_ms).await;

        run.step(SequenceState::Lifting, above, motion.normal()).await?;
        settle(cfg.step_settle_ms).await;

        let pose = run
            .step(SequenceState::Retreating, MotionTarget::from_workspace(target, cfg.safe_height), motion.normal())
            .await?;
        run.enter(SequenceState::Done);
        info!(label, "pick completed");
        Ok(pose)
    }

    /// Put the held object down at `target` (planar millimetres).
    pub async fn place(&self, target: WorkspacePoint, label: &str) -> Result<Pose, ArmError> {
        let _active = self.begin()?;
        let cfg = &self.config;
        let motion = self.supervisor.config();
        let mut run = Run::new(self, SequenceKind::Place);
        info!(label, x_mm = target.x_mm, y_mm = target.y_mm, "place started");

        let above = MotionTarget::from_workspace(target, cfg.safe_height);
        run.step(SequenceState::Approaching, above, motion.normal()).await?;
        settle(cfg.step_settle_ms).await;

        run.step(SequenceState::Descending, MotionTarget::from_workspace(target, cfg.release_height()), motion.slow())
            .await?;
        settle(cfg.step_settle_ms).await;

        run.enter(SequenceState::Releasing);
        self.soft_gripper("open", self.gripper.open().await);
        settle(cfg.release_settle_ms).await;

        let pose = run.step(SequenceState::Retreating, above, motion.normal()).await?;
        run.enter(SequenceState::Done);
        info!(label, "place completed");
        Ok(pose)
    }

    /// Joint-interpolated move to the configured home pose.
    pub async fn home(&self) -> Result<Pose, ArmError> {
        let _active = self.begin()?;
        let mut run = Run::new(self, SequenceKind::Home);
        let pose = self.go_home(&mut run).await?;
        run.enter(SequenceState::Done);
        Ok(pose)
    }

    /// Carry the held object home and drop it there.
    pub async fn return_and_release(&self) -> Result<Pose, ArmError> {
        let _active = self.begin()?;
        let mut run = Run::new(self, SequenceKind::ReturnAndRelease);
        let pose = self.go_home(&mut run).await?;

        run.enter(SequenceState::Releasing);
        self.soft_gripper("open", self.gripper.open().await);
        settle(self.config.drop_settle_ms).await;

        run.enter(SequenceState::Done);
        Ok(pose)
    }

    async fn go_home(&self, run: &mut Run<'_>) -> Result<Pose, ArmError> {
        let joint = self.supervisor.config().joint();
        run.step(SequenceState::Approaching, MotionTarget::from(self.config.home_pose), joint)
            .await
    }

    /// Move toward `target` at approach height in slow steps, each covering
    /// `fraction` of the remaining planar distance, for at most
    /// `max_attempts` steps.
    ///
    /// # Errors
    ///
    /// Propagates the first telemetry or motion failure unchanged.
    pub async fn approach(
        &self,
        target: WorkspacePoint,
        fraction: f64,
        max_attempts: u32,
    ) -> Result<ApproachOutcome, ArmError> {
        let _active = self.begin()?;
        let slow = self.supervisor.config().slow();

        for attempt in 1..=max_attempts {
            let current = self.supervisor.refresh_pose().await?.xy_mm();
            let remaining_mm = current.distance_to(&target);
            if remaining_mm < self.config.lateral_tolerance_mm {
                debug!(remaining_mm, attempt, "approach converged");
                return Ok(ApproachOutcome::Converged);
            }

            let step = WorkspacePoint::new(
                current.x_mm + (target.x_mm - current.x_mm) * fraction,
                current.y_mm + (target.y_mm - current.y_mm) * fraction,
            );
            debug!(attempt, remaining_mm, step_x_mm = step.x_mm, step_y_mm = step.y_mm, "approach step");
            self.supervisor
                .move_to(MotionTarget::from_workspace(step, self.config.approach_height), slow)
                .await?;
            settle(self.config.step_settle_ms).await;
        }
        Ok(ApproachOutcome::BudgetExhausted)
    }
}
