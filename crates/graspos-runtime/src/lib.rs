//! `graspos-runtime` – The Control Loop
//!
//! Everything that decides *when* the arm moves.
//!
//! # Modules
//!
//! - [`sequence`] – [`SequenceEngine`][sequence::SequenceEngine]: pick,
//!   place, home and return-and-release as ordered verified moves with
//!   settling pauses, plus the slow incremental approach used for centering.
//!   One sequence at a time; any unconfirmed move aborts the sequence.
//! - [`search`] – [`SearchScheduler`][search::SearchScheduler] and
//!   [`SearchControl`][search::SearchControl]: the cancellable background
//!   sweep over the table's inspection waypoints.
//! - [`servo_loop`] – [`ServoLoop`][servo_loop::ServoLoop]: the per-frame
//!   controller tying detections, calibration, centering, sequences and
//!   search together.
//! - [`divergence`] – [`DivergenceGuard`][divergence::DivergenceGuard]:
//!   notices when centering steps push the object further away.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP span export.

pub mod divergence;
pub mod search;
pub mod sequence;
pub mod servo_loop;
pub mod telemetry;

pub use divergence::DivergenceGuard;
pub use search::{SearchConfig, SearchControl, SearchHandle, SearchOutcome, SearchScheduler};
pub use sequence::{ApproachOutcome, SequenceConfig, SequenceEngine};
pub use servo_loop::{CycleOutcome, OperatorSignal, ServoConfig, ServoLoop, SessionStats};
pub use telemetry::{TracerProviderGuard, init_tracing};
