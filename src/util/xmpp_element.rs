// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::message::MessageType;
use xmpp_parsers::presence::Presence;

use crate::ns;
use crate::stanza::{Message, PubSubMessage};

#[derive(Debug)]
pub enum XMPPElement {
    Presence(Presence),
    Message(Message),
    IQ(Iq),
    PubSubMessage(PubSubMessage),
}

impl XMPPElement {
    /// Returns `Ok(None)` for elements that are not stanzas (e.g. nonzas).
    pub fn try_from_element(value: Element) -> Result<Option<Self>, anyhow::Error> {
        if value.is("iq", ns::JABBER_CLIENT) {
            Ok(Some(Self::IQ(Iq::try_from(value)?)))
        } else if value.is("message", ns::JABBER_CLIENT) {
            let message = xmpp_parsers::message::Message::try_from(value)?;

            if message.type_ != MessageType::Headline {
                return Ok(Some(Self::Message(message.try_into()?)));
            }

            Ok(Some(Self::PubSubMessage(message.try_into()?)))
        } else if value.is("presence", ns::JABBER_CLIENT) {
            Ok(Some(Self::Presence(value.try_into()?)))
        } else {
            Ok(None)
        }
    }
}

impl From<Iq> for XMPPElement {
    fn from(value: Iq) -> Self {
        Self::IQ(value)
    }
}

impl From<Message> for XMPPElement {
    fn from(value: Message) -> Self {
        Self::Message(value)
    }
}

impl From<Presence> for XMPPElement {
    fn from(value: Presence) -> Self {
        Self::Presence(value)
    }
}

impl From<PubSubMessage> for XMPPElement {
    fn from(value: PubSubMessage) -> Self {
        Self::PubSubMessage(value)
    }
}
