//! Command channel to the manipulator's script interpreter.
//!
//! Each command is a single newline-terminated line of controller script
//! sent on its own short-lived connection: connect, write, briefly wait for
//! whatever the controller sends back, close.  Connects are retried through a
//! [`Backoff`]; a failed write is surfaced immediately because the controller
//! may already have acted on a partial line.

use std::time::Duration;

use async_trait::async_trait;
use graspos_types::{ArmError, Interpolation, Motion, Pose};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::backoff::Backoff;
use crate::telemetry::connection_error;

/// Anything that accepts controller script commands.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver one complete command (including its trailing newline).
    async fn send(&self, command: &str) -> Result<(), ArmError>;
}

/// Encode a move command for `pose`.
///
/// ```rust
/// use graspos_hal::command::encode_move;
/// use graspos_types::{Motion, Pose};
///
/// let cmd = encode_move(&Pose::new(0.5, 0.4, 0.1, 0.0, 3.14, 0.0), &Motion::linear(0.3, 0.1));
/// assert_eq!(cmd, "movel(p[0.50000, 0.40000, 0.10000, 0.00000, 3.14000, 0.00000], a=0.3, v=0.1)\n");
/// ```
pub fn encode_move(pose: &Pose, motion: &Motion) -> String {
    let verb = match motion.interpolation {
        Interpolation::Linear => "movel",
        Interpolation::Joint => "movej",
    };
    format!(
        "{verb}(p[{:.5}, {:.5}, {:.5}, {:.5}, {:.5}, {:.5}], a={}, v={})\n",
        pose.x, pose.y, pose.z, pose.rx, pose.ry, pose.rz, motion.acceleration, motion.velocity
    )
}

/// Encode a pop-up text message, used as a connectivity probe.
pub fn encode_text_message(text: &str) -> String {
    format!("textmsg(\"{}\")\n", text.replace('"', "'"))
}

/// Connection-per-command TCP channel to the controller's script port.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    endpoint: String,
    connect_timeout: Duration,
    ack_timeout: Duration,
    backoff: Backoff,
}

impl CommandChannel {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            ack_timeout: Duration::from_millis(500),
            backoff: Backoff::default(),
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect_once(&self) -> Result<TcpStream, ArmError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(connection_error(&self.endpoint, e)),
            Err(_) => Err(connection_error(
                &self.endpoint,
                format!("connect timed out after {} ms", self.connect_timeout.as_millis()),
            )),
        }
    }
}

#[async_trait]
impl CommandSink for CommandChannel {
    #[instrument(skip(self, command), fields(endpoint = %self.endpoint))]
    async fn send(&self, command: &str) -> Result<(), ArmError> {
        let mut stream = self.backoff.retry(|| self.connect_once()).await?;

        stream
            .write_all(command.as_bytes())
            .await
            .map_err(|e| connection_error(&self.endpoint, e))?;
        debug!(command = command.trim_end(), "command sent");

        let mut ack = [0u8; 1024];
        match tokio::time::timeout(self.ack_timeout, stream.read(&mut ack)).await {
            Ok(Ok(n)) if n > 0 => debug!(bytes = n, "controller replied"),
            _ => debug!("no controller reply"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn joint_moves_use_movej() {
        let cmd = encode_move(
            &Pose::new(0.7289, 0.5731, 0.1988, -2.8246, -1.3081, -0.0257),
            &Motion::joint(0.3, 0.1),
        );
        assert!(cmd.starts_with("movej(p[0.72890, 0.57310, 0.19880, -2.82460, -1.30810, -0.02570]"));
        assert!(cmd.ends_with(", a=0.3, v=0.1)\n"));
    }

    #[test]
    fn coordinates_are_rounded_to_five_decimals() {
        let cmd = encode_move(
            &Pose::new(0.123456789, 0.0, 0.00001, 0.0, 0.0, 0.0),
            &Motion::linear(0.3, 0.05),
        );
        assert!(cmd.contains("p[0.12346, 0.00000, 0.00001,"));
        assert!(cmd.contains("v=0.05"));
    }

    #[test]
    fn text_message_is_quoted() {
        assert_eq!(
            encode_text_message("Robot connected - remote control active"),
            "textmsg(\"Robot connected - remote control active\")\n"
        );
        assert_eq!(encode_text_message("say \"hi\""), "textmsg(\"say 'hi'\")\n");
    }

    #[tokio::test]
    async fn send_delivers_one_command_per_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut received = Vec::new();
            for _ in 0..2 {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = Vec::new();
                sock.read_to_end(&mut buf).await.unwrap();
                received.push(String::from_utf8(buf).unwrap());
            }
            received
        });

        let channel = CommandChannel::new(addr.to_string(), Duration::from_secs(1))
            .with_ack_timeout(Duration::from_millis(20));
        channel.send("textmsg(\"a\")\n").await.unwrap();
        channel.send("textmsg(\"b\")\n").await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, vec!["textmsg(\"a\")\n", "textmsg(\"b\")\n"]);
    }

    #[tokio::test]
    async fn unreachable_controller_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let channel = CommandChannel::new(addr.to_string(), Duration::from_millis(200))
            .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 2));
        let err = channel.send("textmsg(\"x\")\n").await.unwrap_err();
        assert!(matches!(err, ArmError::Connection { .. }));
    }
}
