// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::HashMap;

use jid::Jid;
use minidom::Element;
use parking_lot::RwLock;
use xmpp_parsers::iq::{Iq, IqType};
use xmpp_parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};

/// An inbound `<iq type="get"|"set"/>` handed to a registered callee.
#[derive(Debug, Clone)]
pub struct IqRequest {
    pub from: Option<Jid>,
    pub id: String,
    pub r#type: IqRequestType,
    pub payload: Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IqRequestType {
    Get,
    Set,
}

pub type IqCalleeHandler =
    Box<dyn Fn(&IqRequest) -> Result<Option<Element>, StanzaError> + Send + Sync>;

type HandlerKey = (String, String, IqRequestType);

/// Dispatch table for inbound IQ queries, keyed by the payload's namespace,
/// element name and request type. Exactly one handler may exist per key and
/// exactly one response is produced per request.
#[derive(Default)]
pub struct IqCalleeRegistry {
    handlers: RwLock<HashMap<HandlerKey, IqCalleeHandler>>,
}

impl IqCalleeRegistry {
    pub fn register(
        &self,
        xmlns: impl Into<String>,
        name: impl Into<String>,
        r#type: IqRequestType,
        handler: IqCalleeHandler,
    ) {
        let key = (xmlns.into(), name.into(), r#type);
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&key) {
            panic!(
                "Duplicate IQ callee registration for ({}, {}, {:?})",
                key.0, key.1, key.2
            );
        }
        handlers.insert(key, handler);
    }

    /// Builds the single response for an inbound get/set IQ. Requests with
    /// no matching handler receive `service-unavailable`.
    pub fn dispatch(&self, iq: &Iq) -> Option<Iq> {
        let (payload, r#type) = match &iq.payload {
            IqType::Get(payload) => (payload, IqRequestType::Get),
            IqType::Set(payload) => (payload, IqRequestType::Set),
            IqType::Result(_) | IqType::Error(_) => return None,
        };

        let key = (
            payload.ns().to_string(),
            payload.name().to_string(),
            r#type,
        );

        let request = IqRequest {
            from: iq.from.clone(),
            id: iq.id.clone(),
            r#type,
            payload: payload.clone(),
        };

        let response = match self.handlers.read().get(&key) {
            Some(handler) => handler(&request),
            None => Err(StanzaError::new(
                ErrorType::Cancel,
                DefinedCondition::ServiceUnavailable,
                "en",
                "No handler registered for this query",
            )),
        };

        let response_iq = match response {
            Ok(Some(mut element)) => {
                // The request's node attribute is echoed back verbatim,
                // notably for disco#info caps queries.
                if let (Some(node), None) = (request.payload.attr("node"), element.attr("node")) {
                    element.set_attr("node", node);
                }
                Iq {
                    from: None,
                    to: iq.from.clone(),
                    id: iq.id.clone(),
                    payload: IqType::Result(Some(element)),
                }
            }
            Ok(None) => Iq {
                from: None,
                to: iq.from.clone(),
                id: iq.id.clone(),
                payload: IqType::Result(None),
            },
            Err(err) => Iq {
                from: None,
                to: iq.from.clone(),
                id: iq.id.clone(),
                payload: IqType::Error(err),
            },
        };

        Some(response_iq)
    }
}
