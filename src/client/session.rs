// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::any::TypeId;
use std::fmt::{Debug, Formatter};
use std::mem;
use std::sync::Arc;
use std::task::Waker;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use jid::{BareJid, FullJid};
use minidom::Element;
use secrecy::SecretString;
use tokio::time::timeout;
use tracing::{error, info, warn};
use xmpp_parsers::iq::IqType;

use crate::client::builder::SessionBuilder;
use crate::client::module_context::ModuleContextInner;
use crate::client::reconnect::{
    ReconnectController, SystemState, SLEEP_VERIFICATION_BYPASS, VERIFICATION_DEADLINE,
};
use crate::client::stream_management::{self, SmSessionInfo, ACK_DEBOUNCE, RESUME_MAX};
use crate::client::{Event, ModuleLookup};
use crate::connector::{ConnectionError, ConnectionEvent, ConnectionMethod, ServerTarget};
use crate::mods::{self, AnyModule};
use crate::stanza::sm::{self, Nonza};
use crate::store::SessionState;
use crate::util::{PendingFuturePoll, RequestError, XMPPElement};
use crate::Event as SessionEvent;

const RESUME_NEGOTIATION_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Online,
    Reconnecting { attempt: u32 },
    Verifying,
    Offline,
    Error { message: String },
}

#[derive(Clone)]
pub struct SessionConfig {
    pub jid: BareJid,
    pub password: SecretString,
    pub server: ServerTarget,
    pub resource: Option<String>,
    pub lang: Option<String>,
    pub skip_discovery: bool,
    pub disable_sm_keepalive: bool,
}

impl SessionConfig {
    pub fn new(jid: BareJid, password: impl Into<String>, server: ServerTarget) -> Self {
        SessionConfig {
            jid,
            password: SecretString::new(password.into()),
            server,
            resource: None,
            lang: None,
            skip_discovery: false,
            disable_sm_keepalive: false,
        }
    }
}

impl Debug for SessionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("jid", &self.jid)
            .field("server", &self.server)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish()
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Connects with the given configuration. This resets the
    /// ever-connected latch, so a failure here is surfaced as an initial
    /// connection failure and does not trigger automatic reconnects.
    pub async fn connect(&self, config: SessionConfig) -> Result<(), ConnectionError> {
        self.inner.context.reconnect.will_connect();
        *self.inner.context.config.write() = Some(config);
        self.inner.clone().connect_internal().await
    }

    /// User-initiated disconnect. Persists the SM state and suppresses
    /// automatic reconnects.
    pub fn disconnect(&self) {
        self.inner.disconnect()
    }

    pub fn connected_jid(&self) -> Option<FullJid> {
        self.inner.context.jid.read().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.context.status.read().clone()
    }

    pub fn get_mod<M: AnyModule + Clone>(&self) -> M {
        self.inner.get_mod()
    }

    pub fn send_raw_stanza(&self, stanza: impl Into<Element>) -> Result<()> {
        self.inner.context.send_stanza(stanza.into())
    }

    /// Feeds OS-level power and visibility transitions into the reconnect
    /// machinery.
    pub async fn notify_system_state(&self, state: SystemState, sleep_duration: Option<Duration>) {
        self.inner.clone().notify_system_state(state, sleep_duration).await
    }
}

#[cfg(feature = "test")]
impl Session {
    pub fn sm_is_enabled(&self) -> bool {
        self.inner.context.stream_manager.is_enabled()
    }

    pub fn sm_inbound_counter(&self) -> u32 {
        self.inner.context.stream_manager.inbound()
    }

    pub fn sm_drain_outbound_queue(&self) -> Vec<Element> {
        self.inner.context.stream_manager.drain_queue()
    }
}

pub(crate) struct SessionInner {
    pub context: Arc<ModuleContextInner>,
    pub mods: Arc<ModuleLookup>,
}

impl SessionInner {
    async fn connect_internal(self: Arc<Self>) -> Result<(), ConnectionError> {
        let ctx = &self.context;

        let config = ctx
            .config
            .read()
            .clone()
            .ok_or(ConnectionError::Generic {
                msg: "Missing session configuration".to_string(),
            })?;

        ctx.set_status(ConnectionStatus::Connecting);

        let bare_jid = config.jid.clone();
        let domain = bare_jid.domain().to_string();

        let prior_state = ctx.session_store.get_session_state(&bare_jid).await;
        let now = chrono::Utc::now();
        let (resumable_state, prior_joined_rooms) = match prior_state {
            Some(state) if !state.is_stale(now) => {
                let rooms = state.joined_rooms.clone();
                (state.sm_id.is_some().then_some(state), rooms)
            }
            Some(state) => (None, state.joined_rooms),
            None => (None, vec![]),
        };

        let resource = config
            .resource
            .clone()
            .or_else(|| {
                resumable_state
                    .as_ref()
                    .and_then(|state| state.resource.clone())
            })
            .unwrap_or_else(|| ctx.id_provider.new_id());

        let full_jid: FullJid = format!("{bare_jid}/{resource}")
            .parse()
            .map_err(|err: jid::Error| ConnectionError::Generic {
                msg: err.to_string(),
            })?;

        // A reconnect forces a fresh physical connection; the first connect
        // can reuse a cached endpoint.
        let endpoint = if ctx.reconnect.is_reconnecting() {
            ctx.transport
                .restart(&config.server, &domain, config.skip_discovery)
                .await
        } else {
            ctx.transport
                .ensure(&config.server, &domain, config.skip_discovery)
                .await
        }
        .map_err(|err| ConnectionError::Generic {
            msg: err.to_string(),
        });

        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(err) => {
                self.fail_connect(err.clone());
                return Err(err);
            }
        };

        *ctx.jid.write() = Some(full_jid.clone());

        let inner = self.clone();
        let connection_result = (ctx.connector_provider)(&endpoint)
            .connect(
                &full_jid,
                config.password.clone(),
                Box::new(move |_, event| {
                    let inner = inner.clone();
                    Box::pin(async move { inner.handle_event(event).await })
                }),
            )
            .await;

        let connection = match connection_result {
            Ok(connection) => connection,
            Err(err) => {
                let err = self.decorate_initial_error(err, endpoint.method);
                self.fail_connect(err.clone());
                return Err(err);
            }
        };

        ctx.connection.write().replace(connection);

        // XEP-0198: resume first when we hold a non-stale prior session,
        // fall through to fresh enablement otherwise.
        let resumed = match &resumable_state {
            Some(state) => self.try_resume(state).await,
            None => false,
        };

        if !resumed {
            self.enable_stream_management().await;
        }

        for (_, m) in self.mods.iter() {
            if let Err(err) = m.read().handle_connect() {
                error!("Encountered error in module: {err}");
            }
        }

        ctx.reconnect.did_connect();
        ctx.set_status(ConnectionStatus::Online);

        if !resumed {
            ctx.clone()
                .schedule_event(SessionEvent::Client(Event::Connected));
        }

        self.spawn_post_connect_tasks(resumed, prior_joined_rooms);

        Ok(())
    }

    /// Sends `<resume/>` and waits for the verdict. Returns true when the
    /// previous session is live again.
    async fn try_resume(self: &Arc<Self>, state: &SessionState) -> bool {
        let ctx = &self.context;
        let Some(sm_id) = &state.sm_id else {
            return false;
        };

        let negotiation = ctx.stream_manager.begin_negotiation();
        if ctx
            .send_element(
                sm::Resume {
                    h: state.sm_inbound,
                    previd: sm_id.clone(),
                }
                .into(),
            )
            .is_err()
        {
            return false;
        }

        let nonza = match timeout(RESUME_NEGOTIATION_DEADLINE, negotiation).await {
            Ok(Ok(nonza)) => nonza,
            Ok(Err(_)) | Err(_) => {
                warn!("Timed out waiting for SM resume response");
                return false;
            }
        };

        match nonza {
            Nonza::Resumed(resumed) => {
                ctx.stream_manager.start_session(
                    SmSessionInfo {
                        id: sm_id.clone(),
                        resume: true,
                    },
                    state.sm_inbound,
                );

                // The server tells us how much of our queue it saw; resend
                // the rest.
                for acked in ctx.stream_manager.ack_queue(resumed.h).into_iter().flatten() {
                    ctx.clone().schedule_event(SessionEvent::SM(
                        stream_management::Event::StanzaAcked { stanza: acked },
                    ));
                }
                for stanza in ctx.stream_manager.drain_queue() {
                    _ = ctx.send_stanza(stanza);
                }

                ctx.stream_manager.mark_resume_completed();
                self.persist_session_state();
                ctx.clone()
                    .schedule_event(SessionEvent::SM(stream_management::Event::Resumed));
                info!("Resumed stream management session {sm_id}");
                true
            }
            Nonza::Failed(_) => {
                // Anything still queued from the previous session is lost.
                for stanza in ctx.stream_manager.drain_queue() {
                    ctx.clone().schedule_event(SessionEvent::SM(
                        stream_management::Event::StanzaLostOnResume { stanza },
                    ));
                }
                false
            }
            other => {
                warn!("Unexpected SM negotiation response {other:?}");
                false
            }
        }
    }

    async fn enable_stream_management(self: &Arc<Self>) {
        let ctx = &self.context;

        let negotiation = ctx.stream_manager.begin_negotiation();
        if ctx
            .send_element(
                sm::Enable {
                    resume: true,
                    max: Some(RESUME_MAX),
                }
                .into(),
            )
            .is_err()
        {
            return;
        }

        let nonza = match timeout(RESUME_NEGOTIATION_DEADLINE, negotiation).await {
            Ok(Ok(nonza)) => nonza,
            Ok(Err(_)) | Err(_) => {
                warn!("Timed out waiting for SM enable response");
                return;
            }
        };

        match nonza {
            Nonza::Enabled(enabled) => {
                let Some(id) = enabled.id else {
                    warn!("Server enabled SM without a session id; resumption unavailable");
                    return;
                };
                ctx.stream_manager.start_session(
                    SmSessionInfo {
                        id,
                        resume: enabled.resume,
                    },
                    0,
                );
                self.persist_session_state();
                ctx.clone()
                    .schedule_event(SessionEvent::SM(stream_management::Event::Enabled));
            }
            Nonza::Failed(_) => {
                warn!("Server refused to enable stream management");
            }
            other => {
                warn!("Unexpected SM negotiation response {other:?}");
            }
        }
    }

    fn spawn_post_connect_tasks(self: &Arc<Self>, resumed: bool, prior_joined_rooms: Vec<BareJid>) {
        // A resumed stream replays everything we missed; rooms are still
        // joined and the archive holds nothing new for us.
        if resumed {
            return;
        }

        let session = Session {
            inner: self.clone(),
        };

        crate::util::spawn(async move {
            let chat = session.get_mod::<mods::Chat>();
            if let Err(err) = chat.set_message_carbons_enabled(true).await {
                warn!("Failed to enable message carbons. {err}");
            }

            let disco = session.get_mod::<mods::Disco>();
            if let Err(err) = disco.load_server_info().await {
                warn!("Failed to load server info. {err}");
            }

            let muc = session.get_mod::<mods::MUC>();
            if let Err(err) = muc.autojoin_rooms(prior_joined_rooms).await {
                warn!("Failed to autojoin rooms. {err}");
            }

            let mam = session.get_mod::<mods::MAM>();
            if let Err(err) = mam.catch_up_missed_messages().await {
                warn!("Failed to catch up missed messages. {err}");
            }
        });
    }

    fn decorate_initial_error(
        &self,
        err: ConnectionError,
        method: ConnectionMethod,
    ) -> ConnectionError {
        let ConnectionError::Generic { msg } = &err else {
            return err;
        };
        // Close code 1006 through the proxy is almost always a firewall
        // that silently eats the TCP connection.
        if method == ConnectionMethod::Proxy && msg.contains("1006") {
            return ConnectionError::Generic {
                msg: format!(
                    "{msg} (the connection was closed abnormally; a firewall may be blocking the proxy)"
                ),
            };
        }
        err
    }

    fn fail_connect(self: &Arc<Self>, err: ConnectionError) {
        let message = match &err {
            ConnectionError::InvalidCredentials => "Invalid credentials".to_string(),
            err => err.to_string(),
        };
        self.context
            .set_status(ConnectionStatus::Error { message });
    }

    fn disconnect(self: &Arc<Self>) {
        self.context.reconnect.will_disconnect_manually();
        self.persist_session_state();
        Self::cancel_pending_futures(&self.context);
        self.context.disconnect();
        self.context.set_status(ConnectionStatus::Offline);
    }

    fn get_mod<M: AnyModule + Clone>(&self) -> M {
        let Some(entry) = self.mods.iter().find(|(k, _)| k == &TypeId::of::<M>()) else {
            panic!("Could not find requested module.")
        };
        entry.1.read().as_any().downcast_ref::<M>().unwrap().clone()
    }

    pub(crate) fn persist_session_state(self: &Arc<Self>) {
        let joined_rooms = self.get_mod::<mods::MUC>().joined_room_jids();
        self.context.persist_session_state(joined_rooms);
    }

    async fn handle_event(self: Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Disconnected { error } => self.handle_disconnect(error),
            ConnectionEvent::Stanza(stanza) => self.handle_element(stanza),
            ConnectionEvent::TimeoutTimer => Self::purge_expired_futures(&self.context),
            ConnectionEvent::PingTimer => self.handle_ping_timer().await,
        }
    }

    fn handle_disconnect(self: &Arc<Self>, error: Option<ConnectionError>) {
        let ctx = &self.context;

        // The cleanup performed while scheduling a reconnect triggers a
        // disconnect event of its own; it must not re-enter scheduling.
        if ctx.reconnect.is_reconnecting() {
            return;
        }

        Self::cancel_pending_futures(ctx);
        self.persist_session_state();
        ctx.stream_manager.reset();

        if ctx.reconnect.should_reconnect(error.as_ref()) {
            ctx.clone()
                .schedule_event(SessionEvent::Client(Event::Disconnected {
                    error: error.clone(),
                }));
            self.schedule_reconnect(false);
            return;
        }

        let status = match &error {
            None => ConnectionStatus::Offline,
            Some(ConnectionError::InvalidCredentials) => ConnectionStatus::Error {
                message: "Invalid credentials".to_string(),
            },
            Some(ConnectionError::Conflict) => ConnectionStatus::Error {
                message: "Another device took over this session".to_string(),
            },
            Some(err) => ConnectionStatus::Error {
                message: err.to_string(),
            },
        };

        ctx.clone()
            .schedule_event(SessionEvent::Client(Event::Disconnected { error }));
        ctx.set_status(status);
    }

    fn schedule_reconnect(self: &Arc<Self>, immediate: bool) {
        let ctx = &self.context;

        // begin_attempt flips is_reconnecting before any cleanup below.
        let Some(attempt) = ctx.reconnect.begin_attempt() else {
            ctx.set_status(ConnectionStatus::Error {
                message: "Failed to reconnect. Please check your connection and try again."
                    .to_string(),
            });
            return;
        };

        // Null the connection synchronously so a late event from the old
        // client cannot clobber the status while we're reconnecting.
        let old_connection = ctx.connection.write().take();
        if let Some(connection) = old_connection {
            connection.disconnect();
        }

        // Whatever was still waiting for a reply won't get one.
        Self::cancel_pending_futures(ctx);

        let delay = if immediate {
            Duration::ZERO
        } else {
            ReconnectController::delay_for_attempt(attempt)
        };

        ctx.set_status(ConnectionStatus::Reconnecting { attempt });
        ctx.clone()
            .schedule_event(SessionEvent::Client(Event::Reconnecting {
                attempt,
                delay_ms: delay.as_millis() as u64,
            }));

        info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

        let this = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.attempt_reconnect().await;
        });
        ctx.reconnect.set_pending_attempt(handle);
    }

    async fn attempt_reconnect(self: Arc<Self>) {
        match self.clone().connect_internal().await {
            Ok(()) => (),
            Err(err) => {
                if self.context.reconnect.should_reconnect(Some(&err)) {
                    self.schedule_reconnect(false);
                } else {
                    self.context.reconnect.stop_reconnecting();
                    self.fail_connect(err);
                }
            }
        }
    }

    async fn notify_system_state(
        self: Arc<Self>,
        state: SystemState,
        sleep_duration: Option<Duration>,
    ) {
        let ctx = &self.context;

        match state {
            SystemState::Sleeping | SystemState::Hidden => {
                info!(?state, "System state changed");
            }
            SystemState::Visible => {
                // OS timers are suspended in background tabs; if a delay is
                // pending, skip it and try right away.
                if ctx.reconnect.cancel_pending_delay() {
                    let this = self.clone();
                    crate::util::spawn(async move {
                        this.attempt_reconnect().await;
                    });
                }
            }
            SystemState::Awake => {
                if !ctx.reconnect.should_reconnect(None) {
                    return;
                }

                if sleep_duration.unwrap_or_default() > SLEEP_VERIFICATION_BYPASS {
                    // The resumption window has long passed; don't bother
                    // probing a session the server already dropped.
                    self.schedule_reconnect(true);
                    return;
                }

                self.verify_stream().await;
            }
        }
    }

    /// Probes the stream after a wake-up: an SM `<r/>` when available, a
    /// ping otherwise. No answer within the deadline means the socket is
    /// silently dead.
    async fn verify_stream(self: &Arc<Self>) {
        let ctx = &self.context;
        ctx.set_status(ConnectionStatus::Verifying);

        if ctx.stream_manager.is_enabled() {
            let verification = ctx.stream_manager.begin_verification();
            if ctx.send_element(sm::R.into()).is_err() {
                self.schedule_reconnect(true);
                return;
            }
            match timeout(VERIFICATION_DEADLINE, verification).await {
                Ok(Ok(_)) => ctx.set_status(ConnectionStatus::Online),
                Ok(Err(_)) | Err(_) => self.schedule_reconnect(true),
            }
            return;
        }

        let ping = self.get_mod::<mods::Ping>();
        match ping.send_ping_to_server(VERIFICATION_DEADLINE).await {
            Ok(()) => ctx.set_status(ConnectionStatus::Online),
            Err(RequestError::TimedOut) | Err(RequestError::Disconnected) => {
                self.schedule_reconnect(true)
            }
            Err(err) => {
                warn!("Stream verification ping failed. {err}");
                ctx.set_status(ConnectionStatus::Online);
            }
        }
    }

    async fn handle_ping_timer(self: &Arc<Self>) {
        let ctx = &self.context;

        if *ctx.status.read() != ConnectionStatus::Online {
            return;
        }

        let disable_sm_keepalive = ctx
            .config
            .read()
            .as_ref()
            .map(|config| config.disable_sm_keepalive)
            .unwrap_or_default();

        if ctx.stream_manager.is_enabled() && !disable_sm_keepalive {
            if ctx.send_element(sm::R.into()).is_err() {
                self.schedule_reconnect(true);
            }
        } else {
            let ping = self.get_mod::<mods::Ping>();
            match ping.send_ping_to_server(VERIFICATION_DEADLINE).await {
                Ok(()) => (),
                Err(RequestError::TimedOut) => {
                    info!("Ping timed out; treating the socket as dead");
                    self.schedule_reconnect(true);
                }
                Err(err) => warn!("Failed to send ping. {err}"),
            }
        }

        ctx.clone()
            .schedule_event(SessionEvent::Client(Event::PingTimer));
    }

    fn handle_element(self: &Arc<Self>, element: Element) {
        let ctx = &self.context;

        match Nonza::try_from_element(&element) {
            Ok(Some(nonza)) => {
                self.handle_nonza(nonza);
                return;
            }
            Ok(None) => (),
            Err(err) => {
                error!("Failed to parse SM element. {err}");
                return;
            }
        }

        let element = match XMPPElement::try_from_element(element) {
            Ok(None) => return,
            Ok(Some(element)) => element,
            Err(err) => {
                error!("Failed to parse stanza. {err}");
                return;
            }
        };

        if ctx.stream_manager.is_enabled() {
            ctx.stream_manager.record_inbound();
            self.persist_session_state();
        }

        // Inbound get/set queries go straight to the registered callee;
        // exactly one response is produced either way.
        if let XMPPElement::IQ(iq) = &element {
            if matches!(iq.payload, IqType::Get(_) | IqType::Set(_)) {
                if let Some(response) = ctx.iq_callees.dispatch(iq) {
                    if let Err(err) = ctx.send_stanza(response.into()) {
                        error!("Failed to send IQ response. {err}");
                    }
                    return;
                }
            }
        }

        let Some(element) = Self::visit_futures_with_element(ctx, element) else {
            return;
        };

        for (_, m) in self.mods.iter() {
            match m.read().handle_element(&element) {
                Ok(true) => break,
                Ok(false) => (),
                Err(err) => error!("Encountered error in module: {err}"),
            }
        }
    }

    fn handle_nonza(self: &Arc<Self>, nonza: Nonza) {
        let ctx = &self.context;

        match nonza {
            Nonza::R(_) => {
                // Coalesce acks; the flush reads the counter at flush time.
                if !ctx.stream_manager.schedule_ack() {
                    return;
                }
                let this = self.clone();
                crate::util::spawn(async move {
                    tokio::time::sleep(ACK_DEBOUNCE).await;
                    let h = this.context.stream_manager.take_scheduled_ack();
                    if let Err(err) = this.context.send_element(sm::A { h }.into()) {
                        warn!("Failed to send SM ack. {err}");
                    }
                });
            }
            Nonza::A(a) => {
                ctx.stream_manager.complete_verification(a.h);
                // Slots past the queue tail yield no stanza; those acks are
                // suppressed rather than surfaced with a null payload.
                for stanza in ctx.stream_manager.ack_queue(a.h).into_iter().flatten() {
                    ctx.clone().schedule_event(SessionEvent::SM(
                        stream_management::Event::StanzaAcked { stanza },
                    ));
                }
            }
            nonza @ (Nonza::Enabled(_) | Nonza::Resumed(_) | Nonza::Failed(_)) => {
                if let Some(nonza) = ctx.stream_manager.complete_negotiation(nonza) {
                    warn!("Received unsolicited SM negotiation element {nonza:?}");
                }
            }
        }
    }

    fn visit_futures_with_element(
        ctx: &ModuleContextInner,
        mut element: XMPPElement,
    ) -> Option<XMPPElement> {
        let mut idx = 0;
        let mut pending_futures = ctx.mod_futures.lock();

        while idx < pending_futures.len() {
            let poll = pending_futures[idx].state.lock().handle_element(element);

            match poll {
                PendingFuturePoll::Pending(Some(e)) => {
                    idx += 1;
                    element = e;
                }
                PendingFuturePoll::Pending(None) => return None,
                PendingFuturePoll::Ready(waker) => {
                    pending_futures.remove(idx);

                    if let Some(waker) = waker {
                        waker.wake()
                    }

                    return None;
                }
            }
        }

        Some(element)
    }

    fn purge_expired_futures(ctx: &ModuleContextInner) {
        let mut pending_futures = ctx.mod_futures.lock();

        let now: SystemTime = ctx.time_provider.now().into();
        let mut wakers = Vec::<Waker>::new();
        let mut idx = 0;

        while idx < pending_futures.len() {
            let expired = match pending_futures[idx].deadline {
                Some(deadline) => now >= deadline,
                None => false,
            };

            if !expired {
                idx += 1
            } else {
                if let Some(waker) = pending_futures[idx].state.lock().fail_with_timeout() {
                    wakers.push(waker);
                }
                pending_futures.remove(idx);
            }
        }
        drop(pending_futures);

        for waker in wakers {
            waker.wake()
        }
    }

    fn cancel_pending_futures(ctx: &ModuleContextInner) {
        let pending_futures = {
            let mut guard = ctx.mod_futures.lock();
            mem::take(&mut *guard)
        };

        for fut in pending_futures {
            if let Some(waker) = fut.state.lock().fail_with_disconnect() {
                waker.wake()
            }
        }
    }
}

impl TryFrom<Arc<ModuleContextInner>> for Session {
    type Error = anyhow::Error;

    fn try_from(value: Arc<ModuleContextInner>) -> std::result::Result<Self, Self::Error> {
        let mods = value.mods.upgrade().ok_or(anyhow::format_err!(
            "Used module after session was released."
        ))?;

        Ok(Session {
            inner: Arc::new(SessionInner {
                context: value,
                mods,
            }),
        })
    }
}
