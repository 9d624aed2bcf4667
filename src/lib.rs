// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use jid as jid_crate;

pub use client::{
    ConnectionStatus, Session, SessionBuilder, SessionConfig, SystemState,
};
pub use connector::{Connection, ConnectionError, Connector, ServerTarget};
pub use deps::{IDProvider, SystemTimeProvider, TimeProvider, UUIDProvider};
pub use event::Event;
pub use stanza::ns;
pub use store::{InMemorySessionStore, SessionState, SessionStore};
pub use util::{parse_bool, ElementExt, ParseError, RequestError};

pub mod client;
pub mod connector;
mod deps;
mod event;
pub mod mods;
pub mod stanza;
pub mod store;
pub mod types;
mod util;

#[cfg(feature = "test")]
pub mod test;

#[macro_export]
macro_rules! jid {
    ($jid:expr) => {
        $jid.parse::<$crate::jid_crate::Jid>().unwrap()
    };
}

#[macro_export]
macro_rules! bare {
    ($jid:expr) => {
        $jid.parse::<$crate::jid_crate::BareJid>().unwrap()
    };
}

#[macro_export]
macro_rules! full {
    ($jid:expr) => {
        $jid.parse::<$crate::jid_crate::FullJid>().unwrap()
    };
}
