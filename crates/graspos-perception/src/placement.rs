//! Per-class drop-off destinations and grip forces.

use std::collections::BTreeMap;

use graspos_types::WorkspacePoint;
use serde::{Deserialize, Serialize};

/// Class label → planar drop-off position in millimetres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementMap {
    /// Destination for any class without an entry.
    pub fallback: [f64; 2],
    pub destinations: BTreeMap<String, [f64; 2]>,
}

impl Default for PlacementMap {
    fn default() -> Self {
        let destinations = [
            ("remote", [400.0, -400.0]),
            ("scissors", [400.0, 400.0]),
            ("mouse", [-400.0, 400.0]),
            ("cell phone", [-400.0, -400.0]),
            ("bottle", [0.0, 500.0]),
            ("can", [0.0, -500.0]),
            ("apple", [200.0, 200.0]),
        ]
        .into_iter()
        .map(|(label, xy)| (label.to_string(), xy))
        .collect();
        Self {
            fallback: [0.0, 400.0],
            destinations,
        }
    }
}

impl PlacementMap {
    pub fn destination(&self, label: &str) -> WorkspacePoint {
        let [x, y] = self
            .destinations
            .get(&label.to_lowercase())
            .copied()
            .unwrap_or(self.fallback);
        WorkspacePoint::new(x, y)
    }
}

/// Class label → gripper closing force on a `0..=100` scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GripForceTable {
    pub default_force: u8,
    pub forces: BTreeMap<String, u8>,
}

impl Default for GripForceTable {
    fn default() -> Self {
        Self {
            default_force: 20,
            forces: BTreeMap::from([
                ("remote".to_string(), 15),
                ("mouse".to_string(), 18),
                ("scissors".to_string(), 25),
            ]),
        }
    }
}

impl GripForceTable {
    pub fn force_for(&self, label: &str) -> u8 {
        self.forces
            .get(&label.to_lowercase())
            .copied()
            .unwrap_or(self.default_force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_class_has_its_own_destination() {
        let map = PlacementMap::default();
        assert_eq!(map.destination("remote"), WorkspacePoint::new(400.0, -400.0));
        assert_eq!(map.destination("Cell Phone"), WorkspacePoint::new(-400.0, -400.0));
    }

    #[test]
    fn unknown_class_uses_fallback() {
        assert_eq!(
            PlacementMap::default().destination("banana"),
            WorkspacePoint::new(0.0, 400.0)
        );
    }

    #[test]
    fn grip_forces() {
        let table = GripForceTable::default();
        assert_eq!(table.force_for("remote"), 15);
        assert_eq!(table.force_for("mouse"), 18);
        assert_eq!(table.force_for("scissors"), 25);
        assert_eq!(table.force_for("apple"), 20);
    }
}
