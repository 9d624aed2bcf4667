// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use jid::{BareJid, DomainPart, FullJid, Jid, NodePart, ResourcePart};
use minidom::Element;
use parking_lot::{Mutex, RwLock};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::pubsub;

use crate::client::iq_callee::{IqCalleeHandler, IqCalleeRegistry, IqRequestType};
use crate::client::reconnect::ReconnectController;
use crate::client::session::SessionConfig;
use crate::client::stream_management::{self, StreamManager};
use crate::client::{ConnectionStatus, ConnectorProvider, EventHandler, ModuleLookup};
use crate::connector::{Connection, Transport};
use crate::deps::{IDProvider, TimeProvider};
use crate::store::SessionStore;
use crate::util::{PendingFutureState, RequestError, RequestFuture};
use crate::Event;

/// The default deadline for IQ round-trips issued by feature discovery.
pub(crate) const DISCO_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Default)]
pub struct ModuleContext {
    pub(crate) inner: Arc<ModuleContextInner>,
}

impl ModuleContext {
    /// Sends an IQ and awaits the matching result or error. No deadline is
    /// applied unless the caller asks for one.
    pub(crate) fn send_iq(
        &self,
        iq: Iq,
    ) -> impl Future<Output = Result<Option<Element>, RequestError>> {
        let future = RequestFuture::new_iq_request(&iq.id);
        self.send_stanza_with_future(iq, future, None)
    }

    pub(crate) fn send_iq_with_timeout(
        &self,
        iq: Iq,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Element>, RequestError>> {
        let future = RequestFuture::new_iq_request(&iq.id);
        self.send_stanza_with_future(iq, future, Some(timeout))
    }

    pub(crate) fn send_stanza_with_future<T: Send + 'static, U: 'static>(
        &self,
        stanza: impl Into<Element>,
        future: RequestFuture<T, U>,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<U, RequestError>> {
        self.inner.mod_futures.lock().push(ModFutureStateEntry {
            state: future.state.clone(),
            deadline: timeout.map(|timeout| SystemTime::from(self.inner.time_provider.now()) + timeout),
        });

        if let Err(err) = self.send_stanza(stanza) {
            return RequestFuture::failed(RequestError::Generic {
                msg: err.to_string(),
            });
        }

        future
    }

    pub(crate) fn send_stanza(&self, stanza: impl Into<Element>) -> Result<()> {
        self.inner.send_stanza(stanza.into())
    }

    pub(crate) fn register_iq_callee(
        &self,
        xmlns: impl Into<String>,
        name: impl Into<String>,
        r#type: IqRequestType,
        handler: IqCalleeHandler,
    ) {
        self.inner.iq_callees.register(xmlns, name, r#type, handler)
    }

    /// Fetches items from a PubSub/PEP node. `from` defaults to our own
    /// PEP service, `item_ids` narrows the fetch to specific items and
    /// `max_items` to the newest n.
    pub(crate) fn query_pubsub_node(
        &self,
        from: Option<BareJid>,
        node: impl Into<String>,
        item_ids: Vec<String>,
        max_items: Option<u32>,
    ) -> impl Future<Output = Result<Option<Vec<pubsub::Item>>, RequestError>> {
        let items = pubsub::pubsub::Items {
            max_items,
            node: pubsub::NodeName(node.into()),
            subid: None,
            items: item_ids
                .into_iter()
                .map(|id| {
                    pubsub::pubsub::Item(pubsub::Item {
                        id: Some(pubsub::ItemId(id)),
                        publisher: None,
                        payload: None,
                    })
                })
                .collect(),
        };

        let mut iq = Iq::from_get(self.generate_id(), pubsub::PubSub::Items(items));
        if let Some(from) = from {
            iq = iq.with_to(Jid::Bare(from));
        }

        let future = self.send_iq(iq);
        async move {
            let response = future.await?;
            let Some(response) = response else {
                return Ok(None);
            };
            let pubsub::PubSub::Items(items) = pubsub::PubSub::try_from(response)
                .map_err(|err| RequestError::Generic {
                    msg: err.to_string(),
                })?
            else {
                return Err(RequestError::UnexpectedResponse);
            };
            Ok(Some(items.items.into_iter().map(|item| item.0).collect()))
        }
    }

    pub(crate) fn full_jid(&self) -> FullJid {
        self.inner.jid.read().as_ref().cloned().unwrap_or_else(|| {
            FullJid::from_parts(
                Some(&NodePart::new("placeholder").unwrap()),
                &DomainPart::new("parlor.im").unwrap(),
                &ResourcePart::new("lib").unwrap(),
            )
        })
    }

    pub(crate) fn bare_jid(&self) -> BareJid {
        Jid::Full(self.full_jid()).into_bare()
    }

    pub(crate) fn server_jid(&self) -> BareJid {
        BareJid::from_parts(None, &self.full_jid().domain())
    }

    pub(crate) fn generate_id(&self) -> String {
        self.inner.id_provider.new_id()
    }

    pub(crate) fn now(&self) -> DateTime<FixedOffset> {
        self.inner.time_provider.now()
    }

    pub(crate) fn schedule_event(&self, event: Event) {
        self.inner.clone().schedule_event(event)
    }

    pub(crate) fn session(&self) -> Option<crate::Session> {
        crate::Session::try_from(self.inner.clone()).ok()
    }

    pub(crate) fn own_presence(&self) -> OwnPresence {
        self.inner.own_presence.read().clone()
    }

    pub(crate) fn set_own_presence(&self, presence: OwnPresence) {
        *self.inner.own_presence.write() = presence;
    }
}

/// The availability we last broadcast, mirrored into MUC join presences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnPresence {
    pub show: Option<xmpp_parsers::presence::Show>,
    pub status: Option<String>,
}

pub(crate) struct ModuleContextInner {
    pub jid: RwLock<Option<FullJid>>,
    pub config: RwLock<Option<SessionConfig>>,
    pub own_presence: RwLock<OwnPresence>,
    pub connector_provider: ConnectorProvider,
    pub connection: RwLock<Option<Box<dyn Connection>>>,
    pub event_handler: EventHandler,
    pub mods: Weak<ModuleLookup>,
    pub mod_futures: Mutex<Vec<ModFutureStateEntry>>,
    pub iq_callees: IqCalleeRegistry,
    pub id_provider: Box<dyn IDProvider>,
    pub time_provider: Box<dyn TimeProvider>,
    pub stream_manager: StreamManager,
    pub reconnect: ReconnectController,
    pub transport: Transport,
    pub session_store: Arc<dyn SessionStore>,
    pub status: RwLock<ConnectionStatus>,
}

impl ModuleContextInner {
    #[cfg(not(feature = "test"))]
    pub(crate) fn schedule_event(self: Arc<Self>, event: Event) {
        let Ok(session) = crate::Session::try_from(self.clone()) else {
            return;
        };
        let fut = (self.event_handler)(session, event);
        crate::util::spawn(fut);
    }

    // Delivers events synchronously so tests can assert on them right after
    // feeding stanzas.
    #[cfg(feature = "test")]
    pub(crate) fn schedule_event(self: Arc<Self>, event: Event) {
        use futures::FutureExt;

        let Ok(session) = crate::Session::try_from(self.clone()) else {
            return;
        };
        if (self.event_handler)(session, event).now_or_never().is_none() {
            panic!("Event handlers must not suspend under the test feature.");
        }
    }

    /// Sends a stanza over the live connection, enqueueing it into the SM
    /// outbound queue first. Send failures after a completed resume surface
    /// as `StanzaSendFailed`.
    pub(crate) fn send_stanza(self: &Arc<Self>, stanza: Element) -> Result<()> {
        if self.stream_manager.is_enabled() {
            self.stream_manager.enqueue_outbound(stanza.clone());
        }

        let Some(conn) = &*self.connection.read() else {
            return Ok(());
        };

        if let Err(err) = conn.send_stanza(stanza.clone()) {
            if self.stream_manager.resume_completed() {
                self.clone()
                    .schedule_event(Event::SM(stream_management::Event::StanzaSendFailed {
                        stanza,
                    }));
            }
            return Err(err);
        }

        Ok(())
    }

    /// Sends a raw element, bypassing the SM outbound queue. Used for
    /// nonzas, which are not acked.
    pub(crate) fn send_element(&self, element: Element) -> Result<()> {
        let Some(conn) = &*self.connection.read() else {
            return Ok(());
        };
        conn.send_stanza(element)
    }

    pub(crate) fn disconnect(&self) {
        if let Some(conn) = self.connection.write().take() {
            conn.disconnect()
        }
    }

    pub(crate) fn set_status(self: &Arc<Self>, status: ConnectionStatus) {
        {
            let mut current = self.status.write();
            if *current == status {
                return;
            }
            *current = status.clone();
        }
        self.clone()
            .schedule_event(Event::Client(crate::client::Event::StatusChanged { status }));
    }

    /// Persists the current SM mirror through the session store.
    pub(crate) fn persist_session_state(self: &Arc<Self>, joined_rooms: Vec<BareJid>) {
        let Some(jid) = self.jid.read().clone() else {
            return;
        };
        let state = crate::store::SessionState {
            sm_id: self.stream_manager.session_info().map(|info| info.id),
            sm_inbound: self.stream_manager.inbound(),
            resource: Some(jid.resource_str().to_string()),
            timestamp: chrono::Utc::now(),
            joined_rooms,
        };

        let store = self.session_store.clone();
        let bare = jid.to_bare();
        crate::util::spawn(async move {
            store.set_session_state(&bare, state).await;
        });
    }
}

impl Default for ModuleContextInner {
    fn default() -> Self {
        ModuleContextInner {
            jid: RwLock::new(None),
            config: RwLock::new(None),
            own_presence: RwLock::new(OwnPresence::default()),
            connector_provider: Box::new(|_| Box::new(crate::client::builder::UndefinedConnector {})),
            connection: Default::default(),
            event_handler: Box::new(|_, _| Box::pin(async {})),
            mods: Default::default(),
            mod_futures: Default::default(),
            iq_callees: Default::default(),
            id_provider: Box::new(crate::deps::UUIDProvider::new()),
            time_provider: Box::new(crate::deps::SystemTimeProvider::default()),
            stream_manager: Default::default(),
            reconnect: Default::default(),
            transport: Transport::new(None, None),
            session_store: Arc::new(crate::store::InMemorySessionStore::default()),
            status: RwLock::new(ConnectionStatus::Offline),
        }
    }
}

pub(crate) struct ModFutureStateEntry {
    pub state: Arc<Mutex<dyn PendingFutureState>>,
    pub deadline: Option<SystemTime>,
}
