//! Per-cycle perception input.
//!
//! The detector runs out of process.  Each perception cycle arrives as one
//! line of JSON: an array of [`Detection`] objects, possibly empty.
//!
//! ```text
//! [{"label":"remote","confidence":0.82,"bbox":{"x1":600,"y1":380,"x2":700,"y2":480},"centroid":{"x":650,"y":430}}]
//! ```

use std::collections::VecDeque;

use async_trait::async_trait;
use graspos_types::Detection;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::warn;

/// A stream of perception cycles.
#[async_trait]
pub trait PerceptionSource: Send {
    /// The next cycle's detections, or `None` once the source is exhausted.
    async fn next_cycle(&mut self) -> Option<Vec<Detection>>;
}

/// Reads one JSON array of detections per line.
pub struct JsonLinesFeed<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesFeed<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> PerceptionSource for JsonLinesFeed<R> {
    async fn next_cycle(&mut self) -> Option<Vec<Detection>> {
        match self.lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => Some(Vec::new()),
            Ok(Some(line)) => Some(serde_json::from_str(&line).unwrap_or_else(|e| {
                warn!(error = %e, "malformed perception line, treating as empty cycle");
                Vec::new()
            })),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "perception feed read failed");
                None
            }
        }
    }
}

/// A fixed list of cycles, replayed in order.
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    cycles: VecDeque<Vec<Detection>>,
}

impl ScriptedFeed {
    pub fn new(cycles: impl IntoIterator<Item = Vec<Detection>>) -> Self {
        Self {
            cycles: cycles.into_iter().collect(),
        }
    }
}

#[async_trait]
impl PerceptionSource for ScriptedFeed {
    async fn next_cycle(&mut self) -> Option<Vec<Detection>> {
        self.cycles.pop_front()
    }
}
