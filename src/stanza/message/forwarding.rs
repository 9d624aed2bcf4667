// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::delay::Delay;

use crate::ns;
use crate::stanza::message::Message;
use crate::util::ElementExt;

/// XEP-0297: Stanza Forwarding
#[derive(Debug, PartialEq, Clone)]
pub struct Forwarded {
    pub delay: Option<Delay>,
    pub stanza: Option<Box<Message>>,
}

impl TryFrom<Element> for Forwarded {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("forwarded", ns::FORWARD)?;

        let mut forwarded = Forwarded {
            delay: None,
            stanza: None,
        };

        for child in value.children() {
            match child {
                _ if child.is("delay", ns::DELAY) => {
                    forwarded.delay = Some(Delay::try_from(child.clone())?)
                }
                _ if child.is("message", ns::JABBER_CLIENT) => {
                    forwarded.stanza = Some(Box::new(Message::try_from(child.clone())?))
                }
                _ => (),
            }
        }

        Ok(forwarded)
    }
}

impl From<Forwarded> for Element {
    fn from(value: Forwarded) -> Self {
        Element::builder("forwarded", ns::FORWARD)
            .append_all(value.delay.map(Element::from))
            .append_all(value.stanza.map(|message| Element::from(*message)))
            .build()
    }
}
