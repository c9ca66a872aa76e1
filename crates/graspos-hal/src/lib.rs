//! `graspos-hal` – Hardware Abstraction Layer
//!
//! Everything that touches the manipulator's sockets or the gripper lives
//! here, behind small async traits so the layers above can be tested against
//! in-process doubles.
//!
//! # Modules
//!
//! - [`telemetry`] – [`TelemetryDecoder`]: reads one real-time state frame
//!   per call and decodes the tool pose; [`TelemetrySource`] is the trait the
//!   motion supervisor consumes.
//! - [`command`] – [`CommandChannel`]: connection-per-command script channel
//!   with bounded connect retries; [`CommandSink`] is its trait.
//! - [`backoff`] – [`Backoff`]: exponential retry schedule for connects.
//! - [`gripper`] – [`Gripper`] trait plus script, disabled and simulated
//!   drivers.
//! - [`sim`] – [`SimArm`] (in-process) and [`SimManipulator`] (TCP) doubles
//!   for headless testing.

pub mod backoff;
pub mod command;
pub mod gripper;
pub mod sim;
pub mod telemetry;

pub use backoff::Backoff;
pub use command::{CommandChannel, CommandSink, encode_move, encode_text_message};
pub use gripper::{DisabledGripper, Gripper, GripperCall, ScriptGripper, SimGripper};
pub use sim::{SimArm, SimManipulator, SimResponse};
pub use telemetry::{TelemetryDecoder, TelemetrySource, decode_pose, encode_frame};
