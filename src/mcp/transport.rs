use actix_web::web::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::mcp::{
    errors::{MCPResult, TransportError},
    protocol::{MCPMessage, MessageParser},
};

/// Server-to-client push channel bound to one session.
///
/// Writes are serialized by the transport's own lock, never the session
/// table's. Closing is idempotent; `close` reports `true` only to the caller
/// that actually closed it, and that caller is responsible for unbinding the
/// transport from its session (close first, then compare-and-clear).
pub struct SseTransport {
    id: String,
    session_id: String,
    writer: Mutex<mpsc::Sender<Bytes>>,
    /// Unlocked handle used only to observe the receiver going away
    disconnect_watch: mpsc::Sender<Bytes>,
    closed: AtomicBool,
    closed_notify: Notify,
    write_timeout: Duration,
}

impl std::fmt::Debug for SseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseTransport")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SseTransport {
    /// Create a transport and the receiving half that feeds the HTTP body
    pub fn open(
        session_id: &str,
        buffer: usize,
        write_timeout: Duration,
    ) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let transport = Arc::new(Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            writer: Mutex::new(sender.clone()),
            disconnect_watch: sender,
            closed: AtomicBool::new(false),
            closed_notify: Notify::new(),
            write_timeout,
        });
        (transport, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Keep-alive / comment frame
    pub async fn send_comment(&self, text: &str) -> Result<(), TransportError> {
        self.write(format_comment(text)).await
    }

    /// Event frame with a payload
    pub async fn send_event(&self, event: &str, data: &str) -> Result<(), TransportError> {
        self.write(format_event(event, data)).await
    }

    /// Push a JSON-RPC message as a `message` event
    pub async fn send_message(&self, message: &MCPMessage) -> MCPResult<()> {
        let payload = MessageParser::serialize_message(message)?;
        let data = String::from_utf8_lossy(&payload);
        self.send_event("message", &data).await?;
        Ok(())
    }

    async fn write(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let writer = self.writer.lock().await;
        // Closed while we waited for the lock
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(self.write_timeout, writer.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                drop(writer);
                debug!("SSE receiver gone for transport {}", self.id);
                self.close();
                Err(TransportError::ConnectionLost(
                    "SSE stream receiver dropped".to_string(),
                ))
            }
            Err(_) => {
                drop(writer);
                warn!(
                    "SSE write timed out after {:?} on transport {}",
                    self.write_timeout, self.id
                );
                self.close();
                Err(TransportError::WriteTimeout(self.write_timeout))
            }
        }
    }

    /// Flip the closed flag. Returns `true` only for the call that closed it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!(
            "Transport {} for session {} closed",
            self.id, self.session_id
        );
        self.closed_notify.notify_waiters();
        true
    }

    /// Resolves once the transport has been closed
    pub async fn wait_closed(&self) {
        loop {
            let notified = self.closed_notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once the stream's receiving half has been dropped
    pub async fn disconnected(&self) {
        self.disconnect_watch.closed().await
    }
}

fn format_comment(text: &str) -> Bytes {
    Bytes::from(format!(": {}\n\n", text))
}

fn format_event(event: &str, data: &str) -> Bytes {
    let mut frame = format!("event: {}\n", event);
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    if data.is_empty() {
        frame.push_str("data: \n");
    }
    frame.push('\n');
    Bytes::from(frame)
}
