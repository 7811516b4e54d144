//! Session-scoped cache of the editor state pushed by the plugin
//!
//! Every entry carries the time it was last refreshed. Reads only succeed
//! while the entry is fresh; stale data is reported as unavailable and is
//! never served.
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::mcp::errors::SnapshotError;

/// Editor state as pushed by the plugin. Contents are opaque to the bridge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "sceneSummary", default)]
    pub scene_summary: Value,
    #[serde(rename = "nodeTree", default)]
    pub node_tree: Value,
    /// Node details keyed by node path
    #[serde(rename = "nodeDetails", default)]
    pub node_details: Value,
}

/// A snapshot together with its owner and refresh time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSnapshot {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub snapshot: Snapshot,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SnapshotState {
    entries: HashMap<String, StoredSnapshot>,
    /// Most recently updated session, for single-client deployments
    latest: Option<String>,
}

pub struct SnapshotStore {
    state: RwLock<SnapshotState>,
    stale_after: Duration,
}

impl SnapshotStore {
    pub fn new(stale_after: std::time::Duration) -> Self {
        Self {
            state: RwLock::new(SnapshotState::default()),
            stale_after: Duration::from_std(stale_after).unwrap_or(Duration::MAX),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Replace the content for a session and mark it as the latest
    pub fn upsert(
        &self,
        session_id: &str,
        snapshot: Snapshot,
        now: DateTime<Utc>,
    ) -> Result<StoredSnapshot, SnapshotError> {
        if session_id.trim().is_empty() {
            return Err(SnapshotError::InvalidSession);
        }

        let stored = StoredSnapshot {
            session_id: session_id.to_string(),
            snapshot,
            updated_at: now,
        };

        let mut state = self.state.write();
        state.entries.insert(session_id.to_string(), stored.clone());
        state.latest = Some(session_id.to_string());

        debug!("Snapshot updated for session {}", session_id);
        Ok(stored)
    }

    /// Refresh only the timestamp. Fails without creating an entry when the
    /// session has never synced.
    pub fn touch(&self, session_id: &str, now: DateTime<Utc>) -> Result<(), SnapshotError> {
        let mut state = self.state.write();
        let entry = state.entries.get_mut(session_id).ok_or(SnapshotError::NotFound)?;
        entry.updated_at = now;
        Ok(())
    }

    /// The process-wide latest snapshot, if fresh
    pub fn latest_fresh(&self, now: DateTime<Utc>) -> Result<StoredSnapshot, SnapshotError> {
        let state = self.state.read();
        let entry = state
            .latest
            .as_ref()
            .and_then(|id| state.entries.get(id))
            .ok_or(SnapshotError::NotFound)?;
        self.check_fresh(entry, now)
    }

    /// The snapshot owned by `session_id`, if fresh
    pub fn fresh_for_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<StoredSnapshot, SnapshotError> {
        let state = self.state.read();
        let entry = state
            .entries
            .get(session_id)
            .ok_or(SnapshotError::NotFound)?;
        self.check_fresh(entry, now)
    }

    /// Evict a session's entry, re-electing the latest pointer if needed
    pub fn remove_session(&self, session_id: &str) -> bool {
        let mut state = self.state.write();
        if state.entries.remove(session_id).is_none() {
            return false;
        }

        if state.latest.as_deref() == Some(session_id) {
            // Linear rescan; ties between equal timestamps resolve arbitrarily
            state.latest = state
                .entries
                .values()
                .max_by_key(|entry| entry.updated_at)
                .map(|entry| entry.session_id.clone());
        }

        debug!("Snapshot evicted for session {}", session_id);
        true
    }

    /// Session owning the latest snapshot, regardless of freshness
    pub fn latest_session_id(&self) -> Option<String> {
        self.state.read().latest.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_fresh(
        &self,
        entry: &StoredSnapshot,
        now: DateTime<Utc>,
    ) -> Result<StoredSnapshot, SnapshotError> {
        let age = now.signed_duration_since(entry.updated_at);
        if age <= self.stale_after {
            Ok(entry.clone())
        } else {
            Err(SnapshotError::Stale {
                session_id: entry.session_id.clone(),
                age_ms: age.num_milliseconds(),
            })
        }
    }
}
