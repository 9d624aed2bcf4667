// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use jid::FullJid;
use minidom::Element;
use parking_lot::{Mutex, RwLock};
use secrecy::SecretString;

use crate::client::ConnectorProvider;
use crate::connector::{
    Connection as ConnectionTrait, ConnectionError, ConnectionEvent, ConnectionEventHandler,
    Connector as ConnectorTrait,
};

pub struct Connector {
    connection: Connection,
}

impl Connector {
    pub fn provider(connection: Connection) -> ConnectorProvider {
        Box::new(move |_endpoint| {
            Box::new(Connector {
                connection: connection.clone(),
            })
        })
    }
}

#[async_trait]
impl ConnectorTrait for Connector {
    async fn connect(
        &self,
        _jid: &FullJid,
        _password: SecretString,
        event_handler: ConnectionEventHandler,
    ) -> Result<Box<dyn ConnectionTrait>, ConnectionError> {
        if let Some(error) = self.connection.inner.connect_error.lock().take() {
            return Err(error);
        }
        *self.connection.inner.event_handler.write() = Some(event_handler);
        Ok(Box::new(self.connection.clone()))
    }
}

pub type SentStanzaHandler = dyn FnMut(&Element) -> Vec<Element> + Send;

/// A scriptable connection: a handler turns every sent element into zero or
/// more inbound responses, and tests can push arbitrary stanzas inbound.
#[derive(Default, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

#[derive(Default)]
struct ConnectionInner {
    sent_stanzas: Mutex<Vec<Element>>,
    stanza_handler: Mutex<Option<Box<SentStanzaHandler>>>,
    event_handler: RwLock<Option<ConnectionEventHandler>>,
    connect_error: Mutex<Option<ConnectionError>>,
}

impl Connection {
    pub fn set_stanza_handler<F>(&self, handler: F)
    where
        F: FnMut(&Element) -> Vec<Element> + Send + 'static,
    {
        *self.inner.stanza_handler.lock() = Some(Box::new(handler))
    }

    /// Makes the next connect attempt fail with the given error.
    pub fn fail_next_connect(&self, error: ConnectionError) {
        *self.inner.connect_error.lock() = Some(error);
    }

    pub fn sent_stanzas(&self) -> Vec<Element> {
        self.inner.sent_stanzas.lock().clone()
    }

    pub fn sent_stanza_strings(&self) -> Vec<String> {
        self.inner
            .sent_stanzas
            .lock()
            .iter()
            .map(String::from)
            .collect()
    }

    pub fn connector(&self) -> ConnectorProvider {
        Connector::provider(self.clone())
    }

    pub fn reset(&self) {
        self.inner.sent_stanzas.lock().clear()
    }

    pub async fn receive_stanza(&self, stanza: impl Into<Element>) {
        let fut = {
            let guard = self.inner.event_handler.read();
            let event_handler = guard.as_ref().expect("No event handler registered");
            let conn = Connection {
                inner: self.inner.clone(),
            };
            (event_handler)(&conn, ConnectionEvent::Stanza(stanza.into()))
        };
        fut.await
    }

    pub async fn disconnect_with_error(&self, error: Option<ConnectionError>) {
        let fut = {
            let guard = self.inner.event_handler.read();
            let event_handler = guard.as_ref().expect("No event handler registered");
            let conn = Connection {
                inner: self.inner.clone(),
            };
            (event_handler)(&conn, ConnectionEvent::Disconnected { error })
        };
        fut.await
    }
}

impl ConnectionTrait for Connection {
    fn send_stanza(&self, stanza: Element) -> Result<()> {
        let responses = if let Some(handler) = self.inner.stanza_handler.lock().as_mut() {
            (handler)(&stanza)
        } else {
            vec![]
        };

        if let Some(event_handler) = &*self.inner.event_handler.read() {
            for response in responses {
                let conn = Connection {
                    inner: self.inner.clone(),
                };
                let fut = (event_handler)(&conn, ConnectionEvent::Stanza(response));

                tokio::spawn(async move { fut.await });
            }
        }

        self.inner.sent_stanzas.lock().push(stanza);
        Ok(())
    }

    fn disconnect(&self) {}
}
