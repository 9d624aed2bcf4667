// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::stanza::message::Forwarded;
use crate::util::ElementExt;

// XEP-0280: Message Carbons

#[derive(Debug, PartialEq, Clone)]
pub struct Received {
    pub forwarded: Forwarded,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Sent {
    pub forwarded: Forwarded,
}

impl TryFrom<Element> for Received {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("received", ns::CARBONS)?;

        Ok(Received {
            forwarded: value
                .get_child("forwarded", ns::FORWARD)
                .ok_or(anyhow::format_err!("Missing forwarded in received carbon"))?
                .clone()
                .try_into()?,
        })
    }
}

impl From<Received> for Element {
    fn from(value: Received) -> Self {
        Element::builder("received", ns::CARBONS)
            .append(Element::from(value.forwarded))
            .build()
    }
}

impl TryFrom<Element> for Sent {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("sent", ns::CARBONS)?;

        Ok(Sent {
            forwarded: value
                .get_child("forwarded", ns::FORWARD)
                .ok_or(anyhow::format_err!("Missing forwarded in sent carbon"))?
                .clone()
                .try_into()?,
        })
    }
}

impl From<Sent> for Element {
    fn from(value: Sent) -> Self {
        Element::builder("sent", ns::CARBONS)
            .append(Element::from(value.forwarded))
            .build()
    }
}

impl MessagePayload for Received {}
impl MessagePayload for Sent {}
