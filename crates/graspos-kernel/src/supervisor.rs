//! [`MotionSupervisor`] – move-and-verify against live telemetry.
//!
//! The controller accepts a move command without telling us whether the arm
//! will actually get there, so every move is followed by a telemetry poll.
//! A move succeeds when either
//!
//! 1. the observed position is within the arrival tolerance of the target,
//!    in which case the cached pose becomes the commanded target, or
//! 2. the arm has visibly left its starting point in the plane, in which case
//!    the command is trusted and the cached pose becomes the observed one.
//!
//! If neither happens before the deadline the move fails with
//! [`ArmError::NotReached`] and the cache keeps its last confirmed value.
//!
//! All motion goes through a single async mutex (the *motion claim*): only
//! one command is ever in flight and [`MotionSupervisor::is_moving`] is
//! `true` exactly while the claim is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use graspos_hal::command::{CommandSink, encode_move, encode_text_message};
use graspos_hal::telemetry::TelemetrySource;
use graspos_types::{ArmError, Motion, MotionTarget, Orientation, Pose};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Text shown on the teach pendant when the supervisor connects.
pub const CONNECT_PROBE: &str = "Robot connected - remote control active";

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunables for move verification and default motion parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// 3-D distance under which the target counts as reached.
    pub arrival_tolerance_mm: f64,
    /// Planar displacement from the start that counts as "in motion".
    pub motion_threshold_mm: f64,
    pub poll_interval_ms: u64,
    /// Deadline used by [`MotionSupervisor::move_to`].
    pub move_timeout_ms: u64,
    pub acceleration: f64,
    pub velocity: f64,
    /// Velocity for descents and fine approach steps.
    pub slow_velocity: f64,
    /// Tool orientation used when a target carries none.
    pub default_orientation: Orientation,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            arrival_tolerance_mm: 5.0,
            motion_threshold_mm: 1.0,
            poll_interval_ms: 100,
            move_timeout_ms: 5000,
            acceleration: 0.3,
            velocity: 0.1,
            slow_velocity: 0.05,
            default_orientation: Orientation::new(-2.8246, -1.3081, -0.0257),
        }
    }
}

impl MotionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn move_timeout(&self) -> Duration {
        Duration::from_millis(self.move_timeout_ms)
    }

    /// Linear move at normal speed.
    pub fn normal(&self) -> Motion {
        Motion::linear(self.acceleration, self.velocity)
    }

    /// Linear move at reduced speed.
    pub fn slow(&self) -> Motion {
        Motion::linear(self.acceleration, self.slow_velocity)
    }

    /// Joint-interpolated move at normal speed.
    pub fn joint(&self) -> Motion {
        Motion::joint(self.acceleration, self.velocity)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Motion claim
// ────────────────────────────────────────────────────────────────────────────

/// Held for the duration of one move; clears the is-moving flag on drop.
struct MotionClaim<'a> {
    _lock: MutexGuard<'a, ()>,
    moving: &'a AtomicBool,
}

impl Drop for MotionClaim<'_> {
    fn drop(&mut self) {
        self.moving.store(false, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MotionSupervisor
// ────────────────────────────────────────────────────────────────────────────

/// Serialises motion commands and verifies each one against telemetry.
pub struct MotionSupervisor {
    telemetry: Arc<dyn TelemetrySource>,
    commands: Arc<dyn CommandSink>,
    config: MotionConfig,
    pose: RwLock<Option<Pose>>,
    moving: AtomicBool,
    claim: Mutex<()>,
}

impl MotionSupervisor {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        commands: Arc<dyn CommandSink>,
        config: MotionConfig,
    ) -> Self {
        Self {
            telemetry,
            commands,
            config,
            pose: RwLock::new(None),
            moving: AtomicBool::new(false),
            claim: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    /// The command sink moves are sent through, shared with script-driven
    /// peripherals such as the gripper.
    pub fn command_sink(&self) -> Arc<dyn CommandSink> {
        Arc::clone(&self.commands)
    }

    /// `true` while a move holds the motion claim.
    pub fn is_moving(&self) -> bool {
        self.moving.load(Ordering::SeqCst)
    }

    /// Last confirmed pose, if connected.
    pub fn current_pose(&self) -> Option<Pose> {
        *self.pose.read().unwrap_or_else(|e| e.into_inner())
    }

    fn store_pose(&self, pose: Option<Pose>) {
        *self.pose.write().unwrap_or_else(|e| e.into_inner()) = pose;
    }

    async fn acquire(&self) -> MotionClaim<'_> {
        let lock = self.claim.lock().await;
        self.moving.store(true, Ordering::SeqCst);
        MotionClaim {
            _lock: lock,
            moving: &self.moving,
        }
    }

    /// Read the pose, reject an unresponsive controller, cache the pose and
    /// announce the connection on the pendant.
    ///
    /// # Errors
    ///
    /// Propagates telemetry failures, and returns [`ArmError::Connection`]
    /// when the controller reports an all-zero pose.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> Result<Pose, ArmError> {
        let pose = self.telemetry.read_pose().await?;
        if pose.is_zero() {
            return Err(ArmError::Connection {
                endpoint: "telemetry".to_string(),
                details: "controller reported an all-zero pose; robot not responding".to_string(),
            });
        }
        self.store_pose(Some(pose));
        info!(x = pose.x, y = pose.y, z = pose.z, "connected to manipulator");

        if let Err(e) = self.commands.send(&encode_text_message(CONNECT_PROBE)).await {
            warn!(error = %e, "connect probe not delivered");
        }
        Ok(pose)
    }

    /// Drop the cached pose.
    pub fn disconnect(&self) {
        self.store_pose(None);
        info!("disconnected from manipulator");
    }

    /// Read telemetry and replace the cached pose with the result.
    pub async fn refresh_pose(&self) -> Result<Pose, ArmError> {
        let pose = self.telemetry.read_pose().await?;
        self.store_pose(Some(pose));
        Ok(pose)
    }

    /// [`move_and_verify`][Self::move_and_verify] with the configured default
    /// deadline.
    pub async fn move_to(&self, target: MotionTarget, motion: Motion) -> Result<Pose, ArmError> {
        self.move_and_verify(target, motion, self.config.move_timeout())
            .await
    }

    /// Command a move and poll telemetry until it is confirmed or `timeout`
    /// expires.
    ///
    /// # Errors
    ///
    /// - [`ArmError::Connection`] when the starting pose cannot be read or the
    ///   command cannot be delivered.
    /// - [`ArmError::NotReached`] when neither success condition holds by the
    ///   deadline; the cached pose is left untouched.
    #[instrument(skip(self, motion), fields(x = target.x, y = target.y, z = target.z))]
    pub async fn move_and_verify(
        &self,
        target: MotionTarget,
        motion: Motion,
        timeout: Duration,
    ) -> Result<Pose, ArmError> {
        let _claim = self.acquire().await;

        let baseline = self.telemetry.read_pose().await?;
        let commanded = target.resolve(self.config.default_orientation);
        self.commands.send(&encode_move(&commanded, &motion)).await?;

        self.verify(commanded, baseline, timeout).await
    }

    async fn verify(&self, commanded: Pose, baseline: Pose, timeout: Duration) -> Result<Pose, ArmError> {
        let interval = self.config.poll_interval();
        let deadline = Instant::now() + timeout;
        let mut last_distance_mm = baseline.distance_to(commanded.x, commanded.y, commanded.z) * 1000.0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(distance_mm = last_distance_mm, "target not reached");
                return Err(ArmError::NotReached {
                    distance_mm: last_distance_mm,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep_until((now + interval).min(deadline)).await;

            let observed = match self.telemetry.read_pose().await {
                Ok(pose) => pose,
                Err(e) => {
                    debug!(error = %e, "telemetry read failed while verifying");
                    continue;
                }
            };

            last_distance_mm = observed.distance_to(commanded.x, commanded.y, commanded.z) * 1000.0;
            if last_distance_mm < self.config.arrival_tolerance_mm {
                debug!(distance_mm = last_distance_mm, "target reached");
                self.store_pose(Some(commanded));
                return Ok(commanded);
            }

            let displacement_mm = observed.planar_distance(&baseline) * 1000.0;
            if displacement_mm > self.config.motion_threshold_mm {
                debug!(displacement_mm, "arm in motion, trusting command");
                self.store_pose(Some(observed));
                return Ok(observed);
            }
        }
    }
}
