//! Detection gating and class-alias remapping.
//!
//! The detector's vocabulary does not always contain the classes the cell
//! handles (there is no "can" class, for instance), so some targets are
//! recognised through aliases.  An alias is only remapped when it is not a
//! target in its own right: with `can ⇐ [cup, bottle]` and `bottle` also a
//! target, a cup becomes a can while a bottle stays a bottle.

use std::collections::{BTreeMap, HashMap};

use graspos_types::Detection;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Default classes handled by the cell.
pub const DEFAULT_TARGETS: [&str; 7] = [
    "remote",
    "scissors",
    "mouse",
    "cell phone",
    "bottle",
    "can",
    "apple",
];

/// Thresholds and vocabulary for accepting detections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub targets: Vec<String>,
    /// target class → detector classes that stand in for it.
    pub aliases: BTreeMap<String, Vec<String>>,
    pub min_confidence: f32,
    pub min_area_px: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            targets: DEFAULT_TARGETS.iter().map(|s| s.to_string()).collect(),
            aliases: BTreeMap::from([(
                "can".to_string(),
                vec!["cup".to_string(), "bottle".to_string()],
            )]),
            min_confidence: 0.35,
            min_area_px: 5000.0,
        }
    }
}

/// Applies [`FilterSettings`] to each perception cycle.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    targets: Vec<String>,
    /// detector class → target class.
    remap: HashMap<String, String>,
    min_confidence: f32,
    min_area_px: f64,
}

impl DetectionFilter {
    pub fn new(settings: &FilterSettings) -> Self {
        let targets: Vec<String> = settings.targets.iter().map(|t| t.to_lowercase()).collect();
        let mut remap = HashMap::new();
        for (target, aliases) in &settings.aliases {
            for alias in aliases {
                let alias = alias.to_lowercase();
                if !targets.contains(&alias) {
                    remap.insert(alias, target.to_lowercase());
                }
            }
        }
        Self {
            targets,
            remap,
            min_confidence: settings.min_confidence,
            min_area_px: settings.min_area_px,
        }
    }

    /// Keep the detections that pass every gate, relabelled to target
    /// classes, in their original order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections
            .into_iter()
            .filter_map(|mut det| {
                let label = det.label.to_lowercase();
                det.label = self.remap.get(&label).cloned().unwrap_or(label);

                if !self.targets.contains(&det.label) {
                    return None;
                }
                if det.confidence < self.min_confidence || det.bbox.area() < self.min_area_px {
                    trace!(label = %det.label, confidence = det.confidence, area = det.bbox.area(), "detection below thresholds");
                    return None;
                }
                Some(det)
            })
            .collect()
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self::new(&FilterSettings::default())
    }
}
