// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use connector::{
    Connection, ConnectionError, ConnectionEvent, ConnectionEventHandler, Connector,
};
pub use transport::{
    ConnectionMethod, Endpoint, HostMetaResolver, ProxyAdapter, ProxyHandle, ServerTarget,
    Transport, TransportError,
};

#[allow(clippy::module_inception)]
mod connector;
mod transport;
pub mod xmpp_rs;
