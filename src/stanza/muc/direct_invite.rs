// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;

use jid::BareJid;
use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::util::ElementExt;

/// XEP-0249: Direct MUC Invitations
#[derive(Debug, PartialEq, Clone)]
pub struct DirectInvite {
    pub jid: BareJid,
    pub password: Option<String>,
    pub reason: Option<String>,
}

impl TryFrom<Element> for DirectInvite {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("x", ns::DIRECT_MUC_INVITATIONS)?;

        Ok(DirectInvite {
            jid: BareJid::from_str(value.attr_req("jid")?)?,
            password: value.attr("password").map(ToString::to_string),
            reason: value.attr("reason").map(ToString::to_string),
        })
    }
}

impl From<DirectInvite> for Element {
    fn from(value: DirectInvite) -> Self {
        Element::builder("x", ns::DIRECT_MUC_INVITATIONS)
            .attr("jid", value.jid)
            .attr("password", value.password)
            .attr("reason", value.reason)
            .build()
    }
}

impl MessagePayload for DirectInvite {}
