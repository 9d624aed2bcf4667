// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;

use jid::Jid;
use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::util::ElementExt;

/// https://xmpp.org/extensions/xep-0045.html#invite-mediated
#[derive(Debug, PartialEq, Clone)]
pub struct MediatedInvite {
    pub invites: Vec<Invite>,
    pub password: Option<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Invite {
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub reason: Option<String>,
    /// The quick-chat marker sits inside the invite so that MUC services
    /// forward it along with the rest of the element.
    pub quick_chat: bool,
}

impl From<MediatedInvite> for Element {
    fn from(value: MediatedInvite) -> Self {
        Element::builder("x", ns::MUC_USER)
            .append_all(value.invites)
            .append_all(
                value
                    .password
                    .map(|password| Element::builder("password", ns::MUC_USER).append(password)),
            )
            .build()
    }
}

impl TryFrom<Element> for MediatedInvite {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("x", ns::MUC_USER)?;

        let mut password = None;
        let mut invites = vec![];

        for child in value.children() {
            match child {
                _ if child.is("invite", ns::MUC_USER) => {
                    invites.push(Invite::try_from(child.clone())?)
                }
                _ if child.is("password", ns::MUC_USER) => password = Some(child.text()),
                _ => (),
            }
        }

        Ok(MediatedInvite { invites, password })
    }
}

impl MessagePayload for MediatedInvite {}

impl From<Invite> for Element {
    fn from(value: Invite) -> Self {
        Element::builder("invite", ns::MUC_USER)
            .attr("from", value.from)
            .attr("to", value.to)
            .append_all(
                value
                    .reason
                    .map(|reason| Element::builder("reason", ns::MUC_USER).append(reason)),
            )
            .append_all(
                value
                    .quick_chat
                    .then(|| Element::builder("quickchat", ns::PARLOR_QUICK_CHAT).build()),
            )
            .build()
    }
}

impl TryFrom<Element> for Invite {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("invite", ns::MUC_USER)?;

        Ok(Invite {
            from: value.attr("from").map(FromStr::from_str).transpose()?,
            to: value.attr("to").map(FromStr::from_str).transpose()?,
            reason: value
                .get_child("reason", ns::MUC_USER)
                .map(|child| child.text()),
            quick_chat: value
                .get_child("quickchat", ns::PARLOR_QUICK_CHAT)
                .is_some(),
        })
    }
}
