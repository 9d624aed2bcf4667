// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use jid::BareJid;
use minidom::Element;
use parking_lot::RwLock;

use crate::test::{Connection, Connector, IncrementingIDProvider};
use crate::{Event, IDProvider, ServerTarget, Session, SessionConfig};

#[async_trait(?Send)]
pub trait SessionTestAdditions {
    async fn connected_session() -> Result<ConnectedSession>;
    async fn connected_session_with_sm(sm_id: &str) -> Result<ConnectedSession>;
}

pub struct ConnectedSession {
    pub session: Session,
    pub connection: Connection,
    pub id_provider: Arc<IncrementingIDProvider>,
    pub sent_events: Arc<RwLock<Vec<Event>>>,
}

impl ConnectedSession {
    pub fn sent_events(&self) -> Vec<Event> {
        self.sent_events.read().clone()
    }

    pub fn clear_sent_events(&self) {
        self.sent_events.write().clear()
    }

    pub fn our_jid() -> BareJid {
        BareJid::from_str("test@parlor.im").unwrap()
    }

    pub fn test_config() -> SessionConfig {
        let mut config = SessionConfig::new(
            Self::our_jid(),
            "",
            ServerTarget::from_str("parlor.im").unwrap(),
        );
        config.resource = Some("test".to_string());
        config.skip_discovery = true;
        config
    }

    async fn connect(
        sm_response: impl Fn(&Element) -> Option<Element> + Send + 'static,
    ) -> Result<ConnectedSession> {
        let connection = Connection::default();
        let id_provider = Arc::new(IncrementingIDProvider::new("id"));
        let sent_events = Arc::new(RwLock::new(vec![]));

        // Answer the stream-management negotiation so connect() doesn't
        // wait for its deadline, and give every post-connect query an empty
        // result so those tasks finish before the test takes over.
        connection.set_stanza_handler(move |element| {
            if let Some(response) = sm_response(element) {
                return vec![response];
            }
            if element.name() == "iq"
                && matches!(element.attr("type"), Some("get") | Some("set"))
            {
                if let Some(id) = element.attr("id") {
                    return vec![Element::builder("iq", crate::ns::JABBER_CLIENT)
                        .attr("id", id)
                        .attr("type", "result")
                        .build()];
                }
            }
            vec![]
        });

        let handler_events = sent_events.clone();
        let session = Session::builder()
            .set_connector_provider(Connector::provider(connection.clone()))
            .set_id_provider(id_provider.clone() as Arc<dyn IDProvider>)
            .set_event_handler(move |_, event| {
                let handler_events = handler_events.clone();
                async move {
                    handler_events.write().push(event);
                }
            })
            .build();

        session.connect(ConnectedSession::test_config()).await?;

        // Let the post-connect tasks settle before handing control to the
        // test.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        connection.reset();
        id_provider.reset();
        sent_events.write().clear();

        Ok(ConnectedSession {
            session,
            connection,
            id_provider,
            sent_events,
        })
    }
}

#[async_trait(?Send)]
impl SessionTestAdditions for Session {
    /// A session connected without stream management; the server refuses
    /// the enable request.
    async fn connected_session() -> Result<ConnectedSession> {
        ConnectedSession::connect(|element| {
            element
                .is("enable", crate::ns::SM)
                .then(|| Element::builder("failed", crate::ns::SM).build())
        })
        .await
    }

    /// A session with an established SM session named by `sm_id`.
    async fn connected_session_with_sm(sm_id: &str) -> Result<ConnectedSession> {
        let sm_id = sm_id.to_string();
        ConnectedSession::connect(move |element| {
            element.is("enable", crate::ns::SM).then(|| {
                Element::builder("enabled", crate::ns::SM)
                    .attr("id", sm_id.clone())
                    .attr("resume", "true")
                    .attr("max", "600")
                    .build()
            })
        })
        .await
    }
}
