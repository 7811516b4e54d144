use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::mcp::{
    errors::{BrokerError, MCPResult},
    protocol::MCPMessage,
};

/// Notification method used to deliver commands to the editor
pub const COMMAND_METHOD: &str = "bridge/command";

/// The editor's answer to a dispatched command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(rename = "commandId")]
    pub command_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "ackedAt", default, skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
}

/// Push path to the editor. The broker never sees sessions or transports
/// directly, only this seam.
#[async_trait]
pub trait CommandNotifier: Send + Sync {
    /// Whether a live push channel is currently bound to the session
    fn has_push_path(&self, session_id: &str) -> bool;

    /// Deliver a server-initiated message to the session
    async fn push(&self, session_id: &str, message: &MCPMessage) -> MCPResult<()>;
}

struct PendingCommand {
    session_id: String,
    command: String,
    sender: oneshot::Sender<CommandAck>,
}

/// Drops a pending entry when its waiter goes away without an outcome,
/// such as a cancelled request handler. Removal is a no-op once the ack,
/// timeout or push failure path has already claimed the entry.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingCommand>,
    command_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.pending.remove(&self.command_id).is_some() {
            debug!("Command {} abandoned by its waiter", self.command_id);
        }
    }
}

/// Correlates outbound editor commands with their acknowledgements.
///
/// Each pending entry is removed exactly once, by whichever of ack, timeout,
/// push failure or waiter cancellation gets there first; the other paths
/// then find nothing.
pub struct CommandBroker {
    pending: DashMap<String, PendingCommand>,
    notifier: Arc<dyn CommandNotifier>,
    default_timeout: Duration,
    sequence: AtomicU64,
}

impl CommandBroker {
    pub fn new(notifier: Arc<dyn CommandNotifier>, default_timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            notifier,
            default_timeout,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_command_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        format!("cmd-{}-{}", nanos, seq)
    }

    /// Push `command` to the editor bound to `session_id` and wait for its ack.
    ///
    /// A zero `timeout` falls back to the broker's default.
    pub async fn dispatch_and_wait(
        &self,
        session_id: &str,
        command: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<CommandAck, BrokerError> {
        if session_id.trim().is_empty() || command.trim().is_empty() {
            return Err(BrokerError::InvalidRequest);
        }
        if !self.notifier.has_push_path(session_id) {
            return Err(BrokerError::TransportUnavailable(session_id.to_string()));
        }

        let timeout = if timeout.is_zero() {
            self.default_timeout
        } else {
            timeout
        };

        let command_id = self.next_command_id();
        let (sender, mut receiver) = oneshot::channel();

        // Register before pushing so an immediate ack always finds its entry
        self.pending.insert(
            command_id.clone(),
            PendingCommand {
                session_id: session_id.to_string(),
                command: command.to_string(),
                sender,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            command_id: command_id.clone(),
        };

        let notification = MCPMessage::notification(
            COMMAND_METHOD,
            Some(json!({
                "commandId": command_id,
                "command": command,
                "args": args,
            })),
        );

        if let Err(e) = self.notifier.push(session_id, &notification).await {
            self.pending.remove(&command_id);
            warn!(
                "Failed to push command {} ({}) to session {}: {}",
                command_id, command, session_id, e
            );
            return Err(BrokerError::TransportUnavailable(session_id.to_string()));
        }

        debug!(
            "Command {} ({}) dispatched to session {}, waiting up to {:?}",
            command_id, command, session_id, timeout
        );

        match tokio::time::timeout(timeout, &mut receiver).await {
            Ok(Ok(ack)) => Ok(ack),
            // Sender dropped without a value: the entry was discarded
            Ok(Err(_)) => Err(BrokerError::UnknownCommand(command_id)),
            Err(_) => {
                if self.pending.remove(&command_id).is_some() {
                    info!(
                        "Command {} ({}) timed out after {:?}",
                        command_id, command, timeout
                    );
                    return Err(BrokerError::AckTimeout(timeout));
                }
                // The ack claimed the entry first; its value is already in flight
                receiver
                    .await
                    .map_err(|_| BrokerError::UnknownCommand(command_id))
            }
        }
    }

    /// Resolve a pending command. Only the session the command was pushed to
    /// may acknowledge it; a mismatched ack leaves the entry pending.
    pub fn ack(&self, session_id: &str, ack: &CommandAck) -> Result<(), BrokerError> {
        let removed = self
            .pending
            .remove_if(&ack.command_id, |_, pending| pending.session_id == session_id);

        let Some((command_id, pending)) = removed else {
            return if self.pending.contains_key(&ack.command_id) {
                warn!(
                    "Session {} tried to ack command {} owned by another session",
                    session_id, ack.command_id
                );
                Err(BrokerError::SessionMismatch(ack.command_id.clone()))
            } else {
                Err(BrokerError::UnknownCommand(ack.command_id.clone()))
            };
        };

        let mut resolved = ack.clone();
        resolved.acked_at.get_or_insert_with(Utc::now);

        debug!(
            "Command {} ({}) acked by session {} (success: {})",
            command_id, pending.command, session_id, resolved.success
        );

        if pending.sender.send(resolved).is_err() {
            debug!("Waiter for command {} already gone", command_id);
        }
        Ok(())
    }
}
