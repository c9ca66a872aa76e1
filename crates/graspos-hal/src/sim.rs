//! In-process and TCP manipulator simulation for testing without hardware.
//!
//! [`SimArm`] implements both [`TelemetrySource`] and [`CommandSink`]: move
//! commands are parsed and applied to an internal pose, every command is
//! recorded, and telemetry reports the current pose.  Faults (frozen joints,
//! stalls, failing sockets) can be injected to exercise the supervisor's
//! verification paths.
//!
//! [`SimManipulator`] serves a [`SimArm`] over real TCP sockets speaking the
//! controller's wire formats, so the network decoder and command channel can
//! be tested end to end.
//!
//! # Example
//!
//! ```rust
//! use graspos_hal::sim::SimArm;
//! use graspos_hal::{CommandSink, TelemetrySource};
//! use graspos_types::Pose;
//!
//! # tokio_test_block(async {
//! let arm = SimArm::new(Pose::new(0.5, 0.4, 0.2, 0.0, 3.14, 0.0));
//! arm.send("movel(p[0.3, 0.6, 0.1, 0.0, 3.14, 0.0], a=0.3, v=0.1)\n").await.unwrap();
//! assert_eq!(arm.read_pose().await.unwrap().x, 0.3);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f);
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use graspos_types::{ArmError, Pose};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::CommandSink;
use crate::telemetry::{TelemetrySource, encode_frame};

/// Parse the target pose out of a `movel`/`movej` command.
///
/// Returns `None` for any other command.
pub fn parse_move(command: &str) -> Option<Pose> {
    let body = command.trim();
    if !(body.starts_with("movel(") || body.starts_with("movej(")) {
        return None;
    }
    let start = body.find("p[")? + 2;
    let end = start + body[start..].find(']')?;
    let values: Vec<f64> = body[start..end]
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [x, y, z, rx, ry, rz] => Some(Pose::new(*x, *y, *z, *rx, *ry, *rz)),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-process double
// ────────────────────────────────────────────────────────────────────────────

/// How the simulated arm responds to a move command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimResponse {
    /// Jump straight to the commanded pose.
    Arrive,
    /// Cover this fraction of the remaining distance and stop.
    Partial(f64),
    /// Accept the command but never move.
    Frozen,
}

struct SimState {
    pose: Pose,
    response: SimResponse,
    moves_before_stall: Option<usize>,
    commands: Vec<String>,
    telemetry_fault: bool,
    command_fault: bool,
}

/// In-process simulated manipulator.
pub struct SimArm {
    state: Mutex<SimState>,
}

impl SimArm {
    pub fn new(pose: Pose) -> Self {
        Self {
            state: Mutex::new(SimState {
                pose,
                response: SimResponse::Arrive,
                moves_before_stall: None,
                commands: Vec::new(),
                telemetry_fault: false,
                command_fault: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pose(&self) -> Pose {
        self.state().pose
    }

    pub fn set_pose(&self, pose: Pose) {
        self.state().pose = pose;
    }

    pub fn set_response(&self, response: SimResponse) {
        self.state().response = response;
    }

    /// Stop responding to moves entirely.
    pub fn freeze(&self) {
        self.set_response(SimResponse::Frozen);
    }

    /// Execute `moves` more move commands normally, then freeze.
    pub fn stall_after(&self, moves: usize) {
        self.state().moves_before_stall = Some(moves);
    }

    /// Make every telemetry read fail with a connection error.
    pub fn fail_telemetry(&self, failing: bool) {
        self.state().telemetry_fault = failing;
    }

    /// Make every command fail with a connection error.
    pub fn fail_commands(&self, failing: bool) {
        self.state().command_fault = failing;
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Only the move commands received so far, decoded.
    pub fn moves(&self) -> Vec<Pose> {
        self.state()
            .commands
            .iter()
            .filter_map(|c| parse_move(c))
            .collect()
    }

    fn apply(&self, command: &str) {
        let mut state = self.state();
        state.commands.push(command.to_string());
        let Some(target) = parse_move(command) else {
            return;
        };

        match state.moves_before_stall {
            Some(0) => state.response = SimResponse::Frozen,
            Some(n) => state.moves_before_stall = Some(n - 1),
            None => {}
        }

        let p = state.pose;
        let next = match state.response {
            SimResponse::Arrive => target,
            SimResponse::Partial(f) => {
                Pose::new(
                    p.x + (target.x - p.x) * f,
                    p.y + (target.y - p.y) * f,
                    p.z + (target.z - p.z) * f,
                    target.rx,
                    target.ry,
                    target.rz,
                )
            }
            SimResponse::Frozen => p,
        };
        state.pose = next;
    }
}

fn sim_fault(details: &str) -> ArmError {
    ArmError::Connection {
        endpoint: "sim".to_string(),
        details: details.to_string(),
    }
}

#[async_trait]
impl TelemetrySource for SimArm {
    async fn read_pose(&self) -> Result<Pose, ArmError> {
        let state = self.state();
        if state.telemetry_fault {
            return Err(sim_fault("telemetry unavailable"));
        }
        Ok(state.pose)
    }
}

#[async_trait]
impl CommandSink for SimArm {
    async fn send(&self, command: &str) -> Result<(), ArmError> {
        if self.state().command_fault {
            return Err(sim_fault("command port unavailable"));
        }
        self.apply(command);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TCP simulator
// ────────────────────────────────────────────────────────────────────────────

/// Serves a [`SimArm`] on two loopback ports: a telemetry port that writes
/// one frame per connection and a command port that reads one command per
/// connection.  Both servers stop when this value is dropped.
pub struct SimManipulator {
    arm: Arc<SimArm>,
    telemetry_addr: SocketAddr,
    command_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl SimManipulator {
    /// Bind both ports on ephemeral loopback addresses and start serving.
    pub async fn start(arm: Arc<SimArm>) -> std::io::Result<Self> {
        let telemetry = TcpListener::bind("127.0.0.1:0").await?;
        let command = TcpListener::bind("127.0.0.1:0").await?;
        let telemetry_addr = telemetry.local_addr()?;
        let command_addr = command.local_addr()?;

        let tasks = vec![
            tokio::spawn(serve_telemetry(telemetry, Arc::clone(&arm))),
            tokio::spawn(serve_commands(command, Arc::clone(&arm))),
        ];

        Ok(Self {
            arm,
            telemetry_addr,
            command_addr,
            tasks,
        })
    }

    pub fn arm(&self) -> &Arc<SimArm> {
        &self.arm
    }

    pub fn telemetry_addr(&self) -> SocketAddr {
        self.telemetry_addr
    }

    pub fn command_addr(&self) -> SocketAddr {
        self.command_addr
    }
}

impl Drop for SimManipulator {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn serve_telemetry(listener: TcpListener, arm: Arc<SimArm>) {
    loop {
        let Ok((mut sock, _)) = listener.accept().await else {
            continue;
        };
        let frame = encode_frame(&arm.pose());
        if let Err(e) = sock.write_all(&frame).await {
            warn!(error = %e, "sim telemetry write failed");
        }
    }
}

async fn serve_commands(listener: TcpListener, arm: Arc<SimArm>) {
    loop {
        let Ok((mut sock, _)) = listener.accept().await else {
            continue;
        };
        let mut buf = [0u8; 1024];
        match sock.read(&mut buf).await {
            Ok(n) if n > 0 => {
                let command = String::from_utf8_lossy(&buf[..n]).into_owned();
                debug!(command = command.trim_end(), "sim command received");
                arm.apply(&command);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "sim command read failed"),
        }
    }
}
