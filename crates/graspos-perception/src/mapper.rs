//! Camera-to-actuation coordinate mapping.
//!
//! The camera rides on the tool and looks straight down, so an object's pixel
//! offset from the gripper reference point translates directly into a planar
//! correction of the tool position.  The mapping is a signed, optionally
//! inverted, linear scale:
//!
//! ```text
//! reference = frame_centre + sensor_offset
//! offset    = centroid − reference            (per axis, sign-flipped if inverted)
//! target    = current_xy + offset · mm_per_pixel
//! ```
//!
//! All functions here are pure; the caller supplies the calibration snapshot.
//!
//! # Example
//!
//! ```rust
//! use graspos_perception::mapper::{map, reference_point};
//! use graspos_types::{CalibrationProfile, PixelPoint, WorkspacePoint};
//!
//! let cal = CalibrationProfile::default();
//! let r = reference_point(&cal);
//! let target = map(PixelPoint::new(r.x + 50.0, r.y), WorkspacePoint::new(500.0, 500.0), &cal);
//! assert!((target.x_mm - 482.5).abs() < 1e-9);
//! assert!((target.y_mm - 500.0).abs() < 1e-9);
//! ```

use graspos_types::{CalibrationProfile, PixelPoint, WorkspacePoint};
use tracing::debug;

/// Pixel position the gripper fingers project onto.
pub fn reference_point(cal: &CalibrationProfile) -> PixelPoint {
    PixelPoint::new(
        f64::from(cal.frame_width_px / 2) + cal.sensor_offset_x_px,
        f64::from(cal.frame_height_px / 2) + cal.sensor_offset_y_px,
    )
}

/// Raw signed offset of `centroid` from the reference point, before any
/// inversion.
pub fn pixel_offset(centroid: PixelPoint, cal: &CalibrationProfile) -> (f64, f64) {
    let r = reference_point(cal);
    (centroid.x - r.x, centroid.y - r.y)
}

/// Map a pixel centroid to the planar tool position that would sit over it.
pub fn map(
    centroid: PixelPoint,
    current: WorkspacePoint,
    cal: &CalibrationProfile,
) -> WorkspacePoint {
    let (dx, dy) = pixel_offset(centroid, cal);
    let dx = if cal.invert_x { -dx } else { dx };
    let dy = if cal.invert_y { -dy } else { dy };

    let target = WorkspacePoint::new(
        current.x_mm + dx * cal.mm_per_pixel,
        current.y_mm + dy * cal.mm_per_pixel,
    );
    debug!(
        offset_x_px = dx,
        offset_y_px = dy,
        target_x_mm = target.x_mm,
        target_y_mm = target.y_mm,
        "mapped centroid"
    );
    target
}

/// `true` when both axis offsets are strictly inside the centering tolerance.
pub fn is_centered(centroid: PixelPoint, cal: &CalibrationProfile) -> bool {
    let (dx, dy) = pixel_offset(centroid, cal);
    dx.abs() < cal.centering_tolerance_px && dy.abs() < cal.centering_tolerance_px
}

/// Euclidean pixel distance between `centroid` and the reference point.
pub fn pixel_distance(centroid: PixelPoint, cal: &CalibrationProfile) -> f64 {
    let (dx, dy) = pixel_offset(centroid, cal);
    dx.hypot(dy)
}
