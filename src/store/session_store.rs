// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jid::BareJid;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// How long a stream-management session stays resumable. Matches the
/// resumption window we request from the server.
pub const SESSION_STATE_MAX_AGE: Duration = Duration::from_secs(600);

/// The state we persist per account so that a restarted process can resume
/// the previous stream or at least rejoin its rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub sm_id: Option<String>,
    pub sm_inbound: u32,
    pub resource: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub joined_rooms: Vec<BareJid>,
}

impl SessionState {
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        let Ok(max_age) = chrono::Duration::from_std(SESSION_STATE_MAX_AGE) else {
            return true;
        };
        now.signed_duration_since(self.timestamp) > max_age
    }
}

/// Persistence port for session state. The host application typically backs
/// this with its local database; the core only reads and writes through the
/// trait.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session_state(&self, jid: &BareJid) -> Option<SessionState>;
    async fn set_session_state(&self, jid: &BareJid, state: SessionState);
    async fn clear_session_state(&self, jid: &BareJid);
}

/// Keeps session state for the lifetime of the process. Useful as a default
/// and in tests; a real deployment persists across restarts.
#[derive(Default)]
pub struct InMemorySessionStore {
    states: RwLock<HashMap<BareJid, SessionState>>,
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_session_state(&self, jid: &BareJid) -> Option<SessionState> {
        self.states.read().get(jid).cloned()
    }

    async fn set_session_state(&self, jid: &BareJid, state: SessionState) {
        self.states.write().insert(jid.clone(), state);
    }

    async fn clear_session_state(&self, jid: &BareJid) {
        self.states.write().remove(jid);
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_staleness() {
        let now = Utc::now();
        let state = SessionState {
            sm_id: Some("sm-1".to_string()),
            sm_inbound: 5,
            resource: None,
            timestamp: now - chrono::Duration::seconds(599),
            joined_rooms: vec![BareJid::from_str("room@conf.parlor.im").unwrap()],
        };

        assert!(!state.is_stale(now));
        assert!(state.is_stale(now + chrono::Duration::seconds(2)));
    }
}
