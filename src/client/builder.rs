// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::any::TypeId;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use jid::FullJid;
use minidom::Element;
use parking_lot::RwLock;
use secrecy::SecretString;

use crate::client::module_context::ModuleContextInner;
use crate::client::session::{ConnectionStatus, SessionInner};
use crate::client::{ConnectorProvider, EventHandler, ModuleContext, ModuleLookup};
use crate::connector::{
    Connection, ConnectionError, ConnectionEventHandler, Connector, HostMetaResolver,
    ProxyAdapter, Transport,
};
use crate::deps::{IDProvider, SystemTimeProvider, TimeProvider, UUIDProvider};
use crate::mods::{self, AnyModule};
use crate::store::{InMemorySessionStore, SessionStore};
use crate::{Event, Session};

pub struct UndefinedConnector {}
pub struct UndefinedConnection {}

pub struct SessionBuilder {
    connector_provider: ConnectorProvider,
    mods: ModuleLookup,
    id_provider: Box<dyn IDProvider>,
    time_provider: Box<dyn TimeProvider>,
    event_handler: EventHandler,
    session_store: Arc<dyn SessionStore>,
    proxy_adapter: Option<Arc<dyn ProxyAdapter>>,
    host_meta_resolver: Option<Arc<dyn HostMetaResolver>>,
}

impl SessionBuilder {
    pub(super) fn new() -> Self {
        let rooms = mods::muc::RoomRegistry::default();
        let conversations = mods::chat::ConversationRegistry::default();
        let contacts = mods::roster::ContactRegistry::default();
        let caps = Arc::new(mods::disco::Capabilities::default());

        SessionBuilder {
            connector_provider: Box::new(|_| Box::new(UndefinedConnector {})),
            mods: Default::default(),
            id_provider: Box::new(UUIDProvider::new()),
            time_provider: Box::new(SystemTimeProvider::default()),
            event_handler: Box::new(|_, _| Box::pin(async {})),
            session_store: Arc::new(InMemorySessionStore::default()),
            proxy_adapter: None,
            host_meta_resolver: None,
        }
        // Order matters: modules that gate on specific extensions claim
        // their stanzas before the general-purpose ones see them.
        .add_mod(mods::MUC::new(rooms.clone()))
        .add_mod(mods::Chat::new(
            rooms.clone(),
            conversations.clone(),
            contacts.clone(),
        ))
        .add_mod(mods::MAM::new(rooms.clone(), conversations))
        .add_mod(mods::Roster::new(contacts, caps.clone(), rooms))
        .add_mod(mods::Profile::default())
        .add_mod(mods::Disco::new(caps))
        .add_mod(mods::PubSub::default())
    }

    pub fn set_connector_provider(mut self, connector_provider: ConnectorProvider) -> Self {
        self.connector_provider = connector_provider;
        self
    }

    pub fn set_event_handler<T>(
        mut self,
        handler: impl Fn(Session, Event) -> T + Send + Sync + 'static,
    ) -> Self
    where
        T: Future<Output = ()> + Send + 'static,
    {
        self.event_handler = Box::new(move |session, event| {
            let fut = handler(session, event);
            Box::pin(async move { fut.await })
        });
        self
    }

    pub fn set_id_provider<P: IDProvider + 'static>(mut self, id_provider: P) -> Self {
        self.id_provider = Box::new(id_provider);
        self
    }

    pub fn set_time_provider<T: TimeProvider + 'static>(mut self, time_provider: T) -> Self {
        self.time_provider = Box::new(time_provider);
        self
    }

    pub fn set_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = store;
        self
    }

    pub fn set_proxy_adapter(mut self, adapter: Arc<dyn ProxyAdapter>) -> Self {
        self.proxy_adapter = Some(adapter);
        self
    }

    pub fn set_host_meta_resolver(mut self, resolver: Arc<dyn HostMetaResolver>) -> Self {
        self.host_meta_resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Session {
        let mut mods = self.mods;
        mods.push((
            TypeId::of::<mods::Ping>(),
            RwLock::new(Box::new(mods::Ping::default())),
        ));

        let mods = Arc::new(mods);

        let context_inner = Arc::new(ModuleContextInner {
            jid: RwLock::new(None),
            config: RwLock::new(None),
            own_presence: Default::default(),
            connector_provider: self.connector_provider,
            connection: Default::default(),
            event_handler: self.event_handler,
            mods: Arc::downgrade(&mods),
            mod_futures: Default::default(),
            iq_callees: Default::default(),
            id_provider: self.id_provider,
            time_provider: self.time_provider,
            stream_manager: Default::default(),
            reconnect: Default::default(),
            transport: Transport::new(self.proxy_adapter, self.host_meta_resolver),
            session_store: self.session_store,
            status: RwLock::new(ConnectionStatus::Offline),
        });

        for (_, m) in mods.iter() {
            m.write().register_with(ModuleContext {
                inner: context_inner.clone(),
            });
        }

        Session {
            inner: Arc::new(SessionInner {
                mods: mods.clone(),
                context: context_inner,
            }),
        }
    }
}

impl SessionBuilder {
    fn add_mod<M: AnyModule + Clone + 'static>(mut self, m: M) -> Self {
        self.mods
            .push((TypeId::of::<M>(), RwLock::new(Box::new(m))));
        self
    }
}

#[async_trait]
impl Connector for UndefinedConnector {
    async fn connect(
        &self,
        _jid: &FullJid,
        _password: SecretString,
        _event_handler: ConnectionEventHandler,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        panic!("Session doesn't have a connector. Provide one before calling connect()")
    }
}

impl Connection for UndefinedConnection {
    fn send_stanza(&self, _stanza: Element) -> Result<()> {
        panic!("Calling send_stanza on UndefinedConnection is illegal.")
    }

    fn disconnect(&self) {
        panic!("Calling disconnect on UndefinedConnection is illegal.")
    }
}
