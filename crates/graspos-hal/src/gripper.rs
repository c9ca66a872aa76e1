//! Generic `Gripper` trait for end-effectors that open and close with a
//! commanded force.
//!
//! The sequence engine only ever talks to the trait, so drivers can be
//! swapped without touching any motion logic.  Gripper failures are treated
//! as soft by the engine; drivers should still report them faithfully.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use graspos_types::ArmError;
use tracing::{debug, info};

use crate::command::CommandSink;

/// Upper bound of the closing force scale.
pub const MAX_FORCE: u8 = 100;

/// An end-effector that can be opened and closed.
#[async_trait]
pub trait Gripper: Send + Sync {
    /// Stable identifier, e.g. `"ag95"`.
    fn id(&self) -> &str;

    async fn connect(&self) -> Result<(), ArmError>;

    async fn disconnect(&self) -> Result<(), ArmError>;

    async fn open(&self) -> Result<(), ArmError>;

    /// Close with `force` on a `0..=100` scale.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::ActuatorFault`] when `force` exceeds [`MAX_FORCE`]
    /// or the command cannot be delivered.
    async fn close(&self, force: u8) -> Result<(), ArmError>;
}

fn check_force(id: &str, force: u8) -> Result<(), ArmError> {
    if force > MAX_FORCE {
        return Err(ArmError::ActuatorFault {
            component: id.to_string(),
            details: format!("grip force {force} outside 0..={MAX_FORCE}"),
        });
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Script gripper
// ────────────────────────────────────────────────────────────────────────────

/// Drives a controller-hosted gripper by sending script snippets over a
/// [`CommandSink`].
///
/// The close script may contain a `{force}` placeholder that is replaced by
/// the requested force.  The snippets must match the gripper program
/// installed on the controller.
pub struct ScriptGripper {
    id: String,
    sink: Arc<dyn CommandSink>,
    open_script: String,
    close_script: String,
}

impl ScriptGripper {
    pub fn new(
        id: impl Into<String>,
        sink: Arc<dyn CommandSink>,
        open_script: impl Into<String>,
        close_script: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sink,
            open_script: open_script.into(),
            close_script: close_script.into(),
        }
    }

    async fn run(&self, script: String) -> Result<(), ArmError> {
        let script = if script.ends_with('\n') {
            script
        } else {
            format!("{script}\n")
        };
        self.sink
            .send(&script)
            .await
            .map_err(|e| ArmError::ActuatorFault {
                component: self.id.clone(),
                details: e.to_string(),
            })
    }
}

#[async_trait]
impl Gripper for ScriptGripper {
    fn id(&self) -> &str {
        &self.id
    }

    async fn connect(&self) -> Result<(), ArmError> {
        info!(gripper = %self.id, "script gripper ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ArmError> {
        Ok(())
    }

    async fn open(&self) -> Result<(), ArmError> {
        debug!(gripper = %self.id, "opening");
        self.run(self.open_script.clone()).await
    }

    async fn close(&self, force: u8) -> Result<(), ArmError> {
        check_force(&self.id, force)?;
        debug!(gripper = %self.id, force, "closing");
        self.run(self.close_script.replace("{force}", &force.to_string()))
            .await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Disabled gripper
// ────────────────────────────────────────────────────────────────────────────

/// Stand-in used when no gripper is configured.  Every call fails with
/// [`ArmError::ActuatorFault`], which the sequence engine logs and ignores.
pub struct DisabledGripper;

impl DisabledGripper {
    fn fault(&self) -> ArmError {
        ArmError::ActuatorFault {
            component: "gripper".to_string(),
            details: "gripper disabled".to_string(),
        }
    }
}

#[async_trait]
impl Gripper for DisabledGripper {
    fn id(&self) -> &str {
        "disabled"
    }

    async fn connect(&self) -> Result<(), ArmError> {
        Err(self.fault())
    }

    async fn disconnect(&self) -> Result<(), ArmError> {
        Ok(())
    }

    async fn open(&self) -> Result<(), ArmError> {
        Err(self.fault())
    }

    async fn close(&self, _force: u8) -> Result<(), ArmError> {
        Err(self.fault())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated gripper
// ────────────────────────────────────────────────────────────────────────────

/// One call recorded by [`SimGripper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GripperCall {
    Open,
    Close(u8),
}

/// A simulated gripper that records every open/close call.  Optionally fails
/// every call so soft-failure handling can be exercised.
#[derive(Default)]
pub struct SimGripper {
    calls: Mutex<Vec<GripperCall>>,
    failing: bool,
}

impl SimGripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gripper whose open/close calls always fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<GripperCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: GripperCall) -> Result<(), ArmError> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
        if self.failing {
            return Err(ArmError::ActuatorFault {
                component: "sim_gripper".to_string(),
                details: "simulated fault".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Gripper for SimGripper {
    fn id(&self) -> &str {
        "sim_gripper"
    }

    async fn connect(&self) -> Result<(), ArmError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ArmError> {
        Ok(())
    }

    async fn open(&self) -> Result<(), ArmError> {
        self.record(GripperCall::Open)
    }

    async fn close(&self, force: u8) -> Result<(), ArmError> {
        check_force(self.id(), force)?;
        self.record(GripperCall::Close(force))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimArm;
    use graspos_types::Pose;

    #[tokio::test]
    async fn script_gripper_substitutes_force() {
        let arm = Arc::new(SimArm::new(Pose::new(0.5, 0.4, 0.2, 0.0, 0.0, 0.0)));
        let gripper = ScriptGripper::new("ag95", arm.clone(), "gripper_open()", "gripper_close({force})");

        gripper.open().await.unwrap();
        gripper.close(25).await.unwrap();

        assert_eq!(arm.commands(), vec!["gripper_open()\n", "gripper_close(25)\n"]);
    }

    #[tokio::test]
    async fn force_above_scale_is_rejected() {
        let gripper = SimGripper::new();
        let err = gripper.close(101).await.unwrap_err();
        assert!(matches!(err, ArmError::ActuatorFault { .. }));
        assert!(gripper.calls().is_empty());
    }

    #[tokio::test]
    async fn sim_gripper_records_calls() {
        let gripper = SimGripper::new();
        gripper.open().await.unwrap();
        gripper.close(15).await.unwrap();
        assert_eq!(gripper.calls(), vec![GripperCall::Open, GripperCall::Close(15)]);
    }

    #[tokio::test]
    async fn disabled_gripper_always_faults() {
        let gripper = DisabledGripper;
        assert!(gripper.open().await.is_err());
        assert!(gripper.close(20).await.is_err());
        assert!(gripper.disconnect().await.is_ok());
    }
}
