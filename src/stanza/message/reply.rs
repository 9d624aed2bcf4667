// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;

use jid::Jid;
use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::stanza::message;
use crate::util::ElementExt;

/// XEP-0461: Message Replies
#[derive(Debug, PartialEq, Clone)]
pub struct Reply {
    pub id: message::Id,
    pub to: Option<Jid>,
}

impl TryFrom<Element> for Reply {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("reply", ns::REPLY)?;

        Ok(Reply {
            id: value.attr_req("id")?.into(),
            to: value.attr("to").map(Jid::from_str).transpose()?,
        })
    }
}

impl From<Reply> for Element {
    fn from(value: Reply) -> Self {
        Element::builder("reply", ns::REPLY)
            .attr("id", value.id)
            .attr("to", value.to)
            .build()
    }
}

impl MessagePayload for Reply {}
