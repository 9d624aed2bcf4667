// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::any::TypeId;

use parking_lot::RwLock;

use crate::connector::{Connector, Endpoint};
use crate::mods::AnyModule;
use crate::util::PinnedFuture;

pub use builder::SessionBuilder;
pub use iq_callee::{IqCalleeRegistry, IqRequest, IqRequestType};
pub use module_context::{ModuleContext, OwnPresence};
pub(crate) use module_context::DISCO_REQUEST_TIMEOUT;
pub use reconnect::SystemState;
pub use session::{ConnectionStatus, Session, SessionConfig};
pub use stream_management::Event as SmEvent;

mod builder;
mod iq_callee;
mod module_context;
mod reconnect;
mod session;
mod stream_management;

pub type ConnectorProvider = Box<dyn Fn(&Endpoint) -> Box<dyn Connector> + Send + Sync>;
pub type EventHandler = Box<dyn Fn(Session, crate::Event) -> PinnedFuture<()> + Send + Sync>;
pub(crate) type ModuleLookup = Vec<(TypeId, RwLock<Box<dyn AnyModule>>)>;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The session has authenticated on a fresh stream.
    Connected,
    /// The stream went away; `error` is None for clean, user-initiated
    /// disconnects.
    Disconnected {
        error: Option<crate::connector::ConnectionError>,
    },
    /// The connection status changed. Mirrors every transition of the
    /// session state machine.
    StatusChanged { status: ConnectionStatus },
    /// A reconnect attempt has been scheduled.
    Reconnecting { attempt: u32, delay_ms: u64 },
    PingTimer,
}
