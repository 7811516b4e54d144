use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::mcp::{
    PREFERRED_PROTOCOL_VERSION,
    broker::CommandNotifier,
    errors::{MCPResult, SessionError, TransportError},
    is_supported_protocol_version,
    protocol::MCPMessage,
    snapshot::SnapshotStore,
    transport::SseTransport,
};

/// Session identifier type
pub type SessionId = String;

/// Individual session state
#[derive(Debug)]
struct Session {
    created_at: DateTime<Utc>,
    last_seen: Instant,
    initialized: bool,
    protocol_version: Option<String>,
    transport: Option<Arc<SseTransport>>,
}

impl Session {
    fn new() -> Self {
        Self {
            created_at: Utc::now(),
            last_seen: Instant::now(),
            initialized: false,
            protocol_version: None,
            transport: None,
        }
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "idleMs")]
    pub idle_ms: u128,
    pub initialized: bool,
    #[serde(rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(rename = "hasTransport")]
    pub has_transport: bool,
}

/// Owns session lifecycle, protocol negotiation and transport binding.
///
/// All state sits behind one lock that is only ever held briefly; it is
/// never held across a network write and never nested with the broker's or
/// the snapshot store's locks.
pub struct SessionManager {
    sessions: Mutex<HashMap<SessionId, Session>>,
    snapshots: Arc<SnapshotStore>,
}

impl SessionManager {
    pub fn new(snapshots: Arc<SnapshotStore>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            snapshots,
        }
    }

    /// Generate a fresh, unguessable session id
    pub fn generate_session_id() -> SessionId {
        Uuid::new_v4().to_string()
    }

    /// Create a session, or refresh it if it already exists
    pub fn create_session(&self, session_id: &str) {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(session_id) {
            Some(session) => session.last_seen = Instant::now(),
            None => {
                sessions.insert(session_id.to_string(), Session::new());
                info!("Session created: {}", session_id);
            }
        }
    }

    pub fn touch_session(&self, session_id: &str) -> bool {
        match self.sessions.lock().get_mut(session_id) {
            Some(session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    pub fn set_protocol_version(&self, session_id: &str, version: &str) -> bool {
        match self.sessions.lock().get_mut(session_id) {
            Some(session) => {
                session.protocol_version = Some(version.to_string());
                true
            }
            None => false,
        }
    }

    pub fn protocol_version(&self, session_id: &str) -> Option<String> {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(|session| session.protocol_version.clone())
    }

    /// Pick the version for a handshake: the client's request when it is on
    /// the allow-list, the preferred version otherwise. Records and returns it.
    pub fn negotiate_protocol_version(
        &self,
        session_id: &str,
        requested: Option<&str>,
    ) -> Option<String> {
        let version = match requested {
            Some(requested) if is_supported_protocol_version(requested) => requested,
            Some(requested) => {
                debug!(
                    "Client requested unsupported protocol version {}, offering {}",
                    requested, PREFERRED_PROTOCOL_VERSION
                );
                PREFERRED_PROTOCOL_VERSION
            }
            None => PREFERRED_PROTOCOL_VERSION,
        };

        self.set_protocol_version(session_id, version)
            .then(|| version.to_string())
    }

    /// Check the protocol-version header of a non-handshake request.
    ///
    /// After negotiation the header may be omitted, but when present it must
    /// equal the negotiated value. Before negotiation it is mandatory.
    pub fn check_protocol_version(
        &self,
        session_id: &str,
        header: Option<&str>,
    ) -> Result<(), SessionError> {
        let negotiated = {
            let sessions = self.sessions.lock();
            let session = sessions
                .get(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            session.protocol_version.clone()
        };

        match (negotiated, header) {
            (Some(_), None) => Ok(()),
            (Some(negotiated), Some(received)) if negotiated == received => Ok(()),
            (Some(negotiated), Some(received)) => Err(SessionError::ProtocolVersionMismatch {
                negotiated,
                received: received.to_string(),
            }),
            (None, None) => Err(SessionError::MissingProtocolVersion),
            (None, Some(received)) if is_supported_protocol_version(received) => Ok(()),
            (None, Some(received)) => {
                Err(SessionError::UnsupportedProtocolVersion(received.to_string()))
            }
        }
    }

    pub fn mark_initialized(&self, session_id: &str) -> bool {
        match self.sessions.lock().get_mut(session_id) {
            Some(session) => {
                session.initialized = true;
                true
            }
            None => false,
        }
    }

    pub fn is_initialized(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .map(|session| session.initialized)
            .unwrap_or(false)
    }

    /// Bind a transport, closing whatever the session held before unless it
    /// is the very same handle. Fails if the session is unknown.
    pub fn set_transport(&self, session_id: &str, transport: Arc<SseTransport>) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            warn!("Cannot bind transport: unknown session {}", session_id);
            return false;
        };

        if let Some(previous) = session.transport.take() {
            if !Arc::ptr_eq(&previous, &transport) {
                // close() only flips a flag and wakes waiters; safe under the lock
                previous.close();
                debug!(
                    "Transport {} replaced by {} for session {}",
                    previous.id(),
                    transport.id(),
                    session_id
                );
            }
        }
        session.transport = Some(transport);
        session.last_seen = Instant::now();
        true
    }

    /// Compare-and-clear: unbinds only if `transport` is still the bound one
    pub fn clear_transport_if_match(&self, session_id: &str, transport: &Arc<SseTransport>) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };

        match &session.transport {
            Some(current) if Arc::ptr_eq(current, transport) => {
                session.transport = None;
                debug!("Transport {} unbound from session {}", transport.id(), session_id);
                true
            }
            _ => false,
        }
    }

    pub fn transport(&self, session_id: &str) -> Option<Arc<SseTransport>> {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(|session| session.transport.clone())
    }

    /// Terminate a session: close its transport and evict its snapshot
    pub fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.lock().remove(session_id);
        let Some(session) = removed else {
            return false;
        };

        if let Some(transport) = session.transport {
            transport.close();
        }
        self.snapshots.remove_session(session_id);

        info!("Session removed: {}", session_id);
        true
    }

    /// Remove every session idle for longer than `timeout`
    pub fn cleanup_sessions(&self, timeout: Duration) -> usize {
        let expired: Vec<(SessionId, Session)> = {
            let mut sessions = self.sessions.lock();
            let expired_ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, session)| session.last_seen.elapsed() > timeout)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|session| (id, session)))
                .collect()
        };

        for (id, session) in &expired {
            if let Some(transport) = &session.transport {
                transport.close();
            }
            self.snapshots.remove_session(id);
            debug!("Session {} expired", id);
        }

        expired.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.lock().get(session_id).map(|session| SessionInfo {
            id: session_id.to_string(),
            created_at: session.created_at,
            idle_ms: session.last_seen.elapsed().as_millis(),
            initialized: session.initialized,
            protocol_version: session.protocol_version.clone(),
            has_transport: session.transport.is_some(),
        })
    }
}

#[async_trait]
impl CommandNotifier for SessionManager {
    fn has_push_path(&self, session_id: &str) -> bool {
        self.transport(session_id)
            .map(|transport| !transport.is_closed())
            .unwrap_or(false)
    }

    async fn push(&self, session_id: &str, message: &MCPMessage) -> MCPResult<()> {
        // Clone the handle out so the write never holds the session lock
        let transport = self
            .transport(session_id)
            .ok_or(TransportError::Closed)?;
        transport.send_message(message).await
    }
}

/// Session cleanup service
pub struct SessionCleanupService {
    manager: Arc<SessionManager>,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionCleanupService {
    pub fn new(
        manager: Arc<SessionManager>,
        session_timeout: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            manager,
            session_timeout,
            cleanup_interval,
        }
    }

    /// Start the cleanup service
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut cleanup_timer = tokio::time::interval(self.cleanup_interval);

            loop {
                cleanup_timer.tick().await;

                let cleaned_count = self.manager.cleanup_sessions(self.session_timeout);
                if cleaned_count > 0 {
                    info!("Cleaned up {} idle sessions", cleaned_count);
                }
            }
        })
    }
}
