//! Auxiliary command intake: a loopback TCP socket for operator signals.
//!
//! External tools (a keyboard helper, a BCI classifier, a test script)
//! connect, write one short text message and disconnect.  Connections are
//! handled strictly one at a time; each contributes exactly one read of at
//! most [`READ_LEN`] bytes.  A client that stays silent past the read
//! timeout is dropped so the next connection can be served.  Messages are
//! queued for the servo loop, which drains the queue at the top of every cycle.
//!
//! # Example
//!
//! ```rust,no_run
//! use graspos_middleware::intake::CommandIntake;
//!
//! # async fn demo() -> Result<(), graspos_types::ArmError> {
//! let intake = CommandIntake::bind("127.0.0.1:65432").await?;
//! let (mut signals, _task) = intake.spawn(32);
//! while let Some(text) = signals.recv().await {
//!     println!("operator: {text}");
//! }
//! # Ok(()) }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use graspos_types::ArmError;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default listening address.
pub const DEFAULT_INTAKE_ADDR: &str = "127.0.0.1:65432";

/// Maximum bytes read per connection.
pub const READ_LEN: usize = 1024;

/// Default time a connected client has to deliver its message.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Listener for operator text messages.
pub struct CommandIntake {
    listener: TcpListener,
    read_timeout: Duration,
}

impl CommandIntake {
    /// Bind the intake socket.
    ///
    /// # Errors
    ///
    /// Returns [`ArmError::Connection`] if the address cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self, ArmError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ArmError::Connection {
                endpoint: addr.to_string(),
                details: format!("bind failed: {e}"),
            })?;
        Ok(Self {
            listener,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// Override how long a connected client may stay silent.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ArmError> {
        self.listener.local_addr().map_err(|e| ArmError::Connection {
            endpoint: "intake".to_string(),
            details: e.to_string(),
        })
    }

    /// Serve in a background task, queueing at most `capacity` pending
    /// messages.  The task ends when the returned receiver is dropped.
    pub fn spawn(self, capacity: usize) -> (mpsc::Receiver<String>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(self.run(tx));
        (rx, task)
    }

    /// Accept connections one at a time and forward each message to `tx`.
    pub async fn run(self, tx: mpsc::Sender<String>) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "command intake listening");
        }

        loop {
            let (mut stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "intake accept failed");
                    continue;
                }
            };

            let mut buf = [0u8; READ_LEN];
            let n = match tokio::time::timeout(self.read_timeout, stream.read(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!(%peer, error = %e, "intake read failed");
                    continue;
                }
                Err(_) => {
                    warn!(
                        %peer,
                        timeout_ms = self.read_timeout.as_millis() as u64,
                        "intake client sent nothing, dropping it"
                    );
                    continue;
                }
            };

            let text = match std::str::from_utf8(&buf[..n]) {
                Ok(text) => text.trim(),
                Err(_) => {
                    warn!(%peer, bytes = n, "dropping non-UTF-8 intake message");
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }

            debug!(%peer, message = text, "intake message");
            match tx.try_send(text.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(message = text, "intake queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    async fn send(addr: SocketAddr, payload: &[u8]) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(payload).await.unwrap();
        stream.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn messages_are_queued_in_order() {
        let intake = CommandIntake::bind("127.0.0.1:0").await.unwrap();
        let addr = intake.local_addr().unwrap();
        let (mut rx, task) = intake.spawn(8);

        send(addr, b"invert_x\n").await;
        send(addr, b"auto off").await;

        assert_eq!(rx.recv().await.unwrap(), "invert_x");
        assert_eq!(rx.recv().await.unwrap(), "auto off");
        task.abort();
    }

    #[tokio::test]
    async fn non_utf8_payloads_are_dropped() {
        let intake = CommandIntake::bind("127.0.0.1:0").await.unwrap();
        let addr = intake.local_addr().unwrap();
        let (mut rx, task) = intake.spawn(8);

        send(addr, &[0xff, 0xfe, 0xfd]).await;
        send(addr, b"home").await;

        assert_eq!(rx.recv().await.unwrap(), "home");
        task.abort();
    }

    #[tokio::test]
    async fn silent_client_does_not_block_later_messages() {
        let intake = CommandIntake::bind("127.0.0.1:0")
            .await
            .unwrap()
            .with_read_timeout(Duration::from_millis(200));
        let addr = intake.local_addr().unwrap();
        let (mut rx, task) = intake.spawn(8);

        let _silent = TcpStream::connect(addr).await.unwrap();
        send(addr, b"home").await;

        let text = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("message behind a silent client was never delivered");
        assert_eq!(text.unwrap(), "home");
        task.abort();
    }

    #[tokio::test]
    async fn bind_conflict_is_a_connection_error() {
        let first = CommandIntake::bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();
        let err = CommandIntake::bind(&addr).await.err().unwrap();
        assert!(matches!(err, ArmError::Connection { .. }));
    }
}
