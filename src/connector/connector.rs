// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use anyhow::Result;
use async_trait::async_trait;
use jid::FullJid;
use minidom::Element;
use secrecy::SecretString;

use crate::util::PinnedFuture;

/// Error messages which indicate that the underlying socket is dead even
/// though no disconnect was reported. Observed across browsers and OS
/// network stacks when a machine wakes from sleep.
const DEAD_SOCKET_ERRORS: &[&str] = &[
    "WebSocket is already in CLOSING or CLOSED state",
    "Connection reset by peer",
    "Broken pipe",
    "Transport endpoint is not connected",
];

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Timed out")]
    TimedOut,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Resource conflict")]
    Conflict,
    #[error("The socket is dead: {msg}")]
    DeadSocket { msg: String },
    #[error("{msg}")]
    Generic { msg: String },
}

impl ConnectionError {
    /// Classifies a raw error message, recognizing silently dead sockets.
    pub fn from_message(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        if DEAD_SOCKET_ERRORS
            .iter()
            .any(|needle| msg.contains(needle))
        {
            return ConnectionError::DeadSocket { msg };
        }
        ConnectionError::Generic { msg }
    }

    pub fn is_dead_socket(&self) -> bool {
        matches!(self, ConnectionError::DeadSocket { .. })
    }
}

pub type ConnectionEventHandler =
    Box<dyn Fn(&dyn Connection, ConnectionEvent) -> PinnedFuture<()> + Send + Sync>;

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        jid: &FullJid,
        password: SecretString,
        event_handler: ConnectionEventHandler,
    ) -> Result<Box<dyn Connection>, ConnectionError>;
}

#[derive(Debug)]
pub enum ConnectionEvent {
    Disconnected { error: Option<ConnectionError> },
    Stanza(Element),
    TimeoutTimer,
    PingTimer,
}

pub trait Connection: Send + Sync {
    fn send_stanza(&self, stanza: Element) -> Result<()>;
    fn disconnect(&self);
}
