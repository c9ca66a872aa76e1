//! `graspos-middleware` – The Nervous System
//!
//! Routes asynchronous data between the control loop and the outside world
//! without caring about the data's meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels, carrying structured status events.
//! - [`intake`] – Loopback TCP listener that queues operator text signals.
//! - [`feed`] – [`PerceptionSource`] trait and the JSON-lines detection feed.

pub mod bus;
pub mod feed;
pub mod intake;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use feed::{JsonLinesFeed, PerceptionSource, ScriptedFeed};
pub use intake::CommandIntake;
