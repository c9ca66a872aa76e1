//! `graspos-perception` – from detections to actuation targets.
//!
//! The object detector itself runs elsewhere; this crate only interprets its
//! per-cycle output.
//!
//! # Modules
//!
//! - [`mapper`] – pure pixel-to-workspace mapping
//!   ([`map`][mapper::map], [`is_centered`][mapper::is_centered]) driven by
//!   a [`CalibrationProfile`][graspos_types::CalibrationProfile] snapshot.
//! - [`filter`] – [`DetectionFilter`][filter::DetectionFilter]: target-class
//!   selection, alias remapping and confidence/area gating.
//! - [`placement`] – [`PlacementMap`][placement::PlacementMap] drop-off
//!   destinations and [`GripForceTable`][placement::GripForceTable] grip
//!   forces per class.

pub mod filter;
pub mod mapper;
pub mod placement;

pub use filter::{DetectionFilter, FilterSettings};
pub use placement::{GripForceTable, PlacementMap};
