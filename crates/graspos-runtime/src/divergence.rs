//! [`DivergenceGuard`] – detects centering steps that move away from the
//! target.
//!
//! While the servo loop is centering an object under the gripper, each step
//! should bring the object's image closer to the reference point.  If the
//! pixel distance instead grows by more than a threshold between two cycles,
//! the calibration is most likely wrong for the current mount (an inverted
//! axis) and continuing would only push the arm further off.  The caller
//! abandons the target and falls back to searching.
//!
//! # Example
//!
//! ```rust
//! use graspos_runtime::divergence::DivergenceGuard;
//!
//! let mut guard = DivergenceGuard::new(20.0);
//!
//! assert!(!guard.record(100.0, false)); // first sighting, nothing to compare
//! assert!(!guard.record(90.0, true));   // getting closer
//! assert!(guard.record(115.0, true));   // 25 px further away → diverged
//!
//! guard.reset();
//! assert!(!guard.record(115.0, true));
//! ```

// ─────────────────────────────────────────────────────────────────────────────
// DivergenceGuard
// ─────────────────────────────────────────────────────────────────────────────

/// Tracks the target's pixel distance across cycles.
#[derive(Debug, Clone)]
pub struct DivergenceGuard {
    /// Growth in pixels between consecutive cycles that counts as diverging.
    threshold_px: f64,
    last_distance_px: Option<f64>,
}

impl DivergenceGuard {
    pub fn new(threshold_px: f64) -> Self {
        Self {
            threshold_px,
            last_distance_px: None,
        }
    }

    /// Record this cycle's pixel distance.
    ///
    /// Returns `true` when `centering` is active and the distance grew by more
    /// than the threshold since the previous record.  The new distance
    /// becomes the baseline either way.
    pub fn record(&mut self, distance_px: f64, centering: bool) -> bool {
        let diverged = match self.last_distance_px {
            Some(last) if centering => distance_px - last > self.threshold_px,
            _ => false,
        };
        self.last_distance_px = Some(distance_px);
        diverged
    }

    /// Forget the baseline.
    pub fn reset(&mut self) {
        self.last_distance_px = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_never_diverges() {
        let mut guard = DivergenceGuard::new(20.0);
        assert!(!guard.record(500.0, true));
    }

    #[test]
    fn growth_at_threshold_is_tolerated() {
        let mut guard = DivergenceGuard::new(20.0);
        guard.record(100.0, true);
        assert!(!guard.record(120.0, true));
        assert!(guard.record(140.5, true));
    }

    #[test]
    fn growth_outside_centering_is_ignored() {
        let mut guard = DivergenceGuard::new(20.0);
        guard.record(100.0, false);
        assert!(!guard.record(300.0, false));
    }

    #[test]
    fn baseline_slides_every_cycle() {
        let mut guard = DivergenceGuard::new(20.0);
        guard.record(100.0, true);
        assert!(!guard.record(115.0, true));
        assert!(!guard.record(130.0, true)); // 15 px over the previous cycle
    }

    #[test]
    fn reset_clears_baseline() {
        let mut guard = DivergenceGuard::new(20.0);
        guard.record(100.0, true);
        guard.reset();
        assert!(!guard.record(400.0, true));
    }
}
