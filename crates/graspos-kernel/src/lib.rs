//! `graspos-kernel` – Motion supervision
//!
//! The single owner of the manipulator's motion.  It does not decide where to
//! go; it makes sure that whatever is commanded actually happens, one move at
//! a time.
//!
//! # Modules
//!
//! - [`supervisor`] – [`MotionSupervisor`][supervisor::MotionSupervisor]:
//!   sends each move through the HAL command channel, polls telemetry until
//!   the arm is confirmed at (or visibly heading to) the target, and keeps
//!   the cached last-confirmed pose.  Its motion claim serialises every
//!   command in the process.

pub mod supervisor;

pub use supervisor::{CONNECT_PROBE, MotionConfig, MotionSupervisor};
