use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Actuation space
// ────────────────────────────────────────────────────────────────────────────

/// Tool orientation as an axis-angle rotation vector (radians).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl Orientation {
    pub fn new(rx: f64, ry: f64, rz: f64) -> Self {
        Self { rx, ry, rz }
    }
}

/// Manipulator tool pose: position in metres, orientation in radians.
///
/// A `Pose` is always handled as a whole value.  Caches replace it
/// atomically; there is no API to patch individual fields of a cached pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Self { x, y, z, rx, ry, rz }
    }

    /// Build a pose from a position and an orientation.
    pub fn from_parts(x: f64, y: f64, z: f64, orientation: Orientation) -> Self {
        Self::new(x, y, z, orientation.rx, orientation.ry, orientation.rz)
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::new(self.rx, self.ry, self.rz)
    }

    /// Planar position in millimetres.
    pub fn xy_mm(&self) -> WorkspacePoint {
        WorkspacePoint::new(self.x * 1000.0, self.y * 1000.0)
    }

    /// Straight-line distance in metres between this pose's position and
    /// `(x, y, z)`.
    pub fn distance_to(&self, x: f64, y: f64, z: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2) + (self.z - z).powi(2)).sqrt()
    }

    /// Distance in metres between the XY projections of two poses.
    pub fn planar_distance(&self, other: &Pose) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// `true` when every field is exactly zero, which is what an
    /// unresponsive controller reports.
    pub fn is_zero(&self) -> bool {
        [self.x, self.y, self.z, self.rx, self.ry, self.rz]
            .iter()
            .all(|v| *v == 0.0)
    }
}

/// A planar point in actuation space, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkspacePoint {
    pub x_mm: f64,
    pub y_mm: f64,
}

impl WorkspacePoint {
    pub fn new(x_mm: f64, y_mm: f64) -> Self {
        Self { x_mm, y_mm }
    }

    pub fn distance_to(&self, other: &WorkspacePoint) -> f64 {
        ((self.x_mm - other.x_mm).powi(2) + (self.y_mm - other.y_mm).powi(2)).sqrt()
    }
}

/// Cartesian motion goal.  Derived per command and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionTarget {
    /// Position in metres.
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// When `None` the supervisor's default tool orientation is used.
    pub orientation: Option<Orientation>,
}

impl MotionTarget {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            orientation: None,
        }
    }

    /// Target built from a planar millimetre point at height `z` (metres).
    pub fn from_workspace(point: WorkspacePoint, z: f64) -> Self {
        Self::new(point.x_mm / 1000.0, point.y_mm / 1000.0, z)
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = Some(orientation);
        self
    }

    /// Resolve to a full pose, falling back to `default` orientation.
    pub fn resolve(&self, default: Orientation) -> Pose {
        Pose::from_parts(self.x, self.y, self.z, self.orientation.unwrap_or(default))
    }
}

impl From<Pose> for MotionTarget {
    fn from(pose: Pose) -> Self {
        Self::new(pose.x, pose.y, pose.z).with_orientation(pose.orientation())
    }
}

/// Interpolation mode requested from the manipulator's own controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Straight line in tool space (`movel`).
    Linear,
    /// Joint-space interpolation (`movej`).
    Joint,
}

/// How a single move is executed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Motion {
    pub interpolation: Interpolation,
    pub acceleration: f64,
    pub velocity: f64,
}

impl Motion {
    pub fn linear(acceleration: f64, velocity: f64) -> Self {
        Self {
            interpolation: Interpolation::Linear,
            acceleration,
            velocity,
        }
    }

    pub fn joint(acceleration: f64, velocity: f64) -> Self {
        Self {
            interpolation: Interpolation::Joint,
            acceleration,
            velocity,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Perception space
// ────────────────────────────────────────────────────────────────────────────

/// A point in the camera frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned pixel bounding box (`x1, y1` top-left, `x2, y2` bottom-right).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn center(&self) -> PixelPoint {
        PixelPoint::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// One object reported by the external perception subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Class label, e.g. `"remote"`.
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub centroid: PixelPoint,
}

impl Detection {
    /// Build a detection whose centroid is the centre of `bbox`.
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            centroid: bbox.center(),
            bbox,
        }
    }
}

/// Camera-to-gripper calibration.
///
/// The inversion defaults were found empirically for one camera mount and
/// must be re-derived for any other mounting orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationProfile {
    /// Object to the right in the image means the arm moves toward -X.
    pub invert_x: bool,
    /// Object lower in the image means the arm moves toward -Y.
    pub invert_y: bool,
    /// Planar distance covered by one pixel at inspection height.
    pub mm_per_pixel: f64,
    /// Offset of the gripper fingers from the image centre, in pixels.
    pub sensor_offset_x_px: f64,
    pub sensor_offset_y_px: f64,
    /// Maximum pixel offset per axis considered aligned for a grasp.
    pub centering_tolerance_px: f64,
    pub frame_width_px: u32,
    pub frame_height_px: u32,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            invert_x: true,
            invert_y: false,
            mm_per_pixel: 0.35,
            sensor_offset_x_px: 0.0,
            sensor_offset_y_px: 80.0,
            centering_tolerance_px: 80.0,
            frame_width_px: 1280,
            frame_height_px: 720,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Sequences and search
// ────────────────────────────────────────────────────────────────────────────

/// The manipulation sequences the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceKind {
    Pick,
    Place,
    Home,
    ReturnAndRelease,
}

impl std::fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceKind::Pick => write!(f, "pick"),
            SequenceKind::Place => write!(f, "place"),
            SequenceKind::Home => write!(f, "home"),
            SequenceKind::ReturnAndRelease => write!(f, "return-and-release"),
        }
    }
}

/// Progress of the single active sequence instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequenceState {
    Idle,
    Approaching,
    Descending,
    Gripping,
    Lifting,
    Retreating,
    Releasing,
    Failed,
    Done,
}

/// Lifecycle of a background search traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SearchState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

/// A fixed search position in actuation space (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Waypoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn target(&self) -> MotionTarget {
        MotionTarget::new(self.x, self.y, self.z)
    }
}

/// Ordered coverage sweep over the table.  Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointGrid {
    pub waypoints: Vec<Waypoint>,
}

impl WaypointGrid {
    pub fn new(waypoints: Vec<Waypoint>) -> Self {
        Self { waypoints }
    }

    /// Row-major sweep of every `(x, y)` combination at height `z`.
    pub fn rows(xs: &[f64], ys: &[f64], z: f64) -> Self {
        let waypoints = ys
            .iter()
            .flat_map(|y| xs.iter().map(move |x| Waypoint::new(*x, *y, z)))
            .collect();
        Self { waypoints }
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Waypoint> {
        self.waypoints.iter()
    }
}

impl Default for WaypointGrid {
    /// 3×3 sweep at inspection height, front row first.
    fn default() -> Self {
        Self::rows(&[0.3, 0.5, 0.7], &[0.6, 0.4, 0.2], 0.100)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Status events
// ────────────────────────────────────────────────────────────────────────────

/// Unified status event routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "graspos-runtime::sequence"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a payload with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of status that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A freshly confirmed manipulator pose.
    PoseUpdate(Pose),
    Sequence {
        kind: SequenceKind,
        state: SequenceState,
    },
    Search(SearchState),
    ObjectProcessed {
        label: String,
    },
    Fault {
        component: String,
        message: String,
    },
    /// Raw text received on the auxiliary command intake.
    OperatorSignal(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning socket failures, malformed frames, unconfirmed
/// motion, and aborted sequences.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArmError {
    #[error("Connection Error on {endpoint}: {details}")]
    Connection { endpoint: String, details: String },

    #[error("Protocol Error: {details}")]
    Protocol { details: String },

    #[error("Target Not Reached: {distance_mm:.1} mm away after {timeout_ms} ms")]
    NotReached { distance_mm: f64, timeout_ms: u64 },

    #[error("Actuator Fault on {component}: {details}")]
    ActuatorFault { component: String, details: String },

    #[error("Sequence Aborted: {sequence} failed while {state:?}: {reason}")]
    SequenceAbort {
        sequence: SequenceKind,
        state: SequenceState,
        reason: String,
    },

    #[error("Sequence Busy: another sequence is already active")]
    SequenceBusy,

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Channel Error: {0}")]
    Channel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_serialization_roundtrip() {
        let pose = Pose::new(0.7289, 0.5731, 0.1988, -2.8246, -1.3081, -0.0257);
        let json = serde_json::to_string(&pose).unwrap();
        let back: Pose = serde_json::from_str(&json).unwrap();
        assert_eq!(pose, back);
    }

    #[test]
    fn pose_xy_mm_scales_metres() {
        let pose = Pose::new(0.5, -0.25, 0.1, 0.0, 0.0, 0.0);
        let p = pose.xy_mm();
        assert!((p.x_mm - 500.0).abs() < 1e-9);
        assert!((p.y_mm + 250.0).abs() < 1e-9);
    }

    #[test]
    fn zero_pose_is_detected() {
        assert!(Pose::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0).is_zero());
        assert!(!Pose::new(0.0, 0.0, 0.001, 0.0, 0.0, 0.0).is_zero());
    }

    #[test]
    fn motion_target_resolves_default_orientation() {
        let default = Orientation::new(-2.8246, -1.3081, -0.0257);
        let pose = MotionTarget::new(0.3, 0.6, 0.1).resolve(default);
        assert_eq!(pose.orientation(), default);

        let custom = Orientation::new(0.0, 3.14, 0.0);
        let pose = MotionTarget::new(0.3, 0.6, 0.1)
            .with_orientation(custom)
            .resolve(default);
        assert_eq!(pose.orientation(), custom);
    }

    #[test]
    fn motion_target_from_workspace_converts_to_metres() {
        let t = MotionTarget::from_workspace(WorkspacePoint::new(482.5, 500.0), 0.2);
        assert!((t.x - 0.4825).abs() < 1e-12);
        assert!((t.y - 0.5).abs() < 1e-12);
        assert!((t.z - 0.2).abs() < 1e-12);
    }

    #[test]
    fn detection_centroid_is_bbox_centre() {
        let det = Detection::new("mouse", 0.9, BoundingBox::new(100.0, 200.0, 300.0, 260.0));
        assert_eq!(det.centroid, PixelPoint::new(200.0, 230.0));
        assert!((det.bbox.area() - 12_000.0).abs() < 1e-9);
    }

    #[test]
    fn default_grid_is_three_by_three_front_row_first() {
        let grid = WaypointGrid::default();
        assert_eq!(grid.len(), 9);
        assert_eq!(grid.waypoints[0], Waypoint::new(0.3, 0.6, 0.1));
        assert_eq!(grid.waypoints[2], Waypoint::new(0.7, 0.6, 0.1));
        assert_eq!(grid.waypoints[8], Waypoint::new(0.7, 0.2, 0.1));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "graspos-runtime::sequence",
            EventPayload::Sequence {
                kind: SequenceKind::Pick,
                state: SequenceState::Gripping,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
    }

    #[test]
    fn arm_error_display() {
        let err = ArmError::NotReached {
            distance_mm: 12.34,
            timeout_ms: 5000,
        };
        assert!(err.to_string().contains("12.3 mm"));

        let err2 = ArmError::SequenceAbort {
            sequence: SequenceKind::Pick,
            state: SequenceState::Descending,
            reason: "stalled".to_string(),
        };
        assert!(err2.to_string().contains("pick"));
        assert!(err2.to_string().contains("Descending"));
    }
}
