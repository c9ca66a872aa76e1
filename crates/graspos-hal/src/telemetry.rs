//! Manipulator telemetry: decoding the real-time state frame into a [`Pose`].
//!
//! The controller streams fixed-layout binary frames on its real-time port.
//! Only the actual tool pose is of interest here: six big-endian `f64`
//! values (x, y, z in metres, rx, ry, rz axis-angle in radians) starting at
//! byte [`POSE_OFFSET`].
//!
//! Every [`TelemetryDecoder::read_pose`] call opens a fresh connection, reads
//! a single frame and closes it again.  There are no retries at this layer;
//! callers that poll (the motion supervisor) decide how to tolerate failures.
//!
//! # Example
//!
//! ```rust
//! use graspos_hal::telemetry::{decode_pose, encode_frame};
//! use graspos_types::Pose;
//!
//! let pose = Pose::new(0.5, 0.4, 0.1, -2.8246, -1.3081, -0.0257);
//! let frame = encode_frame(&pose);
//! assert_eq!(decode_pose(&frame).unwrap(), pose);
//! ```

use std::time::Duration;

use async_trait::async_trait;
use graspos_types::{ArmError, Pose};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, instrument};

/// Minimum size of one telemetry frame in bytes.
pub const FRAME_LEN: usize = 1060;

/// Byte offset of the actual tool pose inside a frame.
pub const POSE_OFFSET: usize = 444;

const POSE_FIELDS: usize = 6;

// ────────────────────────────────────────────────────────────────────────────
// Source trait
// ────────────────────────────────────────────────────────────────────────────

/// Anything that can report the manipulator's current tool pose.
///
/// The motion supervisor only ever talks to this trait so that tests can
/// substitute an in-process double for the network decoder.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Read one fresh pose sample.
    async fn read_pose(&self) -> Result<Pose, ArmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Frame codec
// ────────────────────────────────────────────────────────────────────────────

/// Decode the tool pose from a raw telemetry frame.
///
/// # Errors
///
/// Returns [`ArmError::Protocol`] when `frame` is shorter than [`FRAME_LEN`].
pub fn decode_pose(frame: &[u8]) -> Result<Pose, ArmError> {
    if frame.len() < FRAME_LEN {
        return Err(ArmError::Protocol {
            details: format!(
                "telemetry frame too short: {} bytes, expected at least {FRAME_LEN}",
                frame.len()
            ),
        });
    }

    let mut fields = [0.0_f64; POSE_FIELDS];
    for (i, field) in fields.iter_mut().enumerate() {
        let start = POSE_OFFSET + i * 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&frame[start..start + 8]);
        *field = f64::from_be_bytes(raw);
    }

    let [x, y, z, rx, ry, rz] = fields;
    Ok(Pose::new(x, y, z, rx, ry, rz))
}

/// Build a zero-filled frame of [`FRAME_LEN`] bytes carrying `pose`.
///
/// The leading four bytes hold the frame length, as the controller sends it.
pub fn encode_frame(pose: &Pose) -> Vec<u8> {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..4].copy_from_slice(&(FRAME_LEN as u32).to_be_bytes());
    let fields = [pose.x, pose.y, pose.z, pose.rx, pose.ry, pose.rz];
    for (i, value) in fields.iter().enumerate() {
        let start = POSE_OFFSET + i * 8;
        frame[start..start + 8].copy_from_slice(&value.to_be_bytes());
    }
    frame
}

// ────────────────────────────────────────────────────────────────────────────
// Network decoder
// ────────────────────────────────────────────────────────────────────────────

/// Reads the tool pose from the controller's real-time telemetry port.
#[derive(Debug, Clone)]
pub struct TelemetryDecoder {
    endpoint: String,
    timeout: Duration,
}

impl TelemetryDecoder {
    /// Create a decoder for `endpoint` (`"host:port"`), bounding each read by
    /// `timeout`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn read_frame(&self) -> Result<Vec<u8>, ArmError> {
        let mut stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| connection_error(&self.endpoint, e))?;

        let mut frame = Vec::with_capacity(FRAME_LEN);
        let mut buf = [0u8; FRAME_LEN];
        while frame.len() < FRAME_LEN {
            let n = stream
                .read(&mut buf[..FRAME_LEN - frame.len()])
                .await
                .map_err(|e| connection_error(&self.endpoint, e))?;
            if n == 0 {
                break;
            }
            frame.extend_from_slice(&buf[..n]);
        }
        Ok(frame)
    }
}

#[async_trait]
impl TelemetrySource for TelemetryDecoder {
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    async fn read_pose(&self) -> Result<Pose, ArmError> {
        let frame = tokio::time::timeout(self.timeout, self.read_frame())
            .await
            .map_err(|_| ArmError::Connection {
                endpoint: self.endpoint.clone(),
                details: format!("no telemetry frame within {} ms", self.timeout.as_millis()),
            })??;
        debug!(bytes = frame.len(), "telemetry frame received");
        decode_pose(&frame)
    }
}

pub(crate) fn connection_error(endpoint: &str, err: impl std::fmt::Display) -> ArmError {
    ArmError::Connection {
        endpoint: endpoint.to_string(),
        details: err.to_string(),
    }
}
