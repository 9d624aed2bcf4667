// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;

use jid::BareJid;
use minidom::Element;
use xmpp_parsers::message::MessagePayload;
use xmpp_parsers::muc::user::{Item, Status};
use xmpp_parsers::presence::PresencePayload;
use xmpp_parsers::stanza_error::StanzaError;

use crate::ns;
use crate::util::ElementExt;

/// The `<x xmlns='…muc#user'/>` extension on presences and messages.
/// Unknown children are skipped; servers attach all kinds of extras here.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct MucUser {
    /// List of statuses applying to this item.
    pub status: Vec<Status>,

    /// List of items.
    pub items: Vec<Item>,

    /// Has the room been destroyed?
    pub destroy: Option<Destroy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Destroy {
    pub jid: Option<BareJid>,
    pub reason: Option<String>,
}

impl MucUser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: impl IntoIterator<Item = Status>) -> Self {
        self.status = status.into_iter().collect();
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    /// Status code 110, the occupant's own presence.
    pub fn is_self_presence(&self) -> bool {
        self.status.contains(&Status::SelfPresence)
    }
}

impl MessagePayload for MucUser {}
impl PresencePayload for MucUser {}

impl TryFrom<Element> for MucUser {
    type Error = anyhow::Error;

    fn try_from(root: Element) -> Result<Self, Self::Error> {
        root.expect_is("x", ns::MUC_USER)?;

        let mut user = MucUser::default();

        for child in root.children() {
            match child {
                _ if child.is("item", ns::MUC_USER) => {
                    user.items.push(Item::try_from(child.clone())?);
                }
                _ if child.is("status", ns::MUC_USER) => {
                    user.status.push(Status::try_from(child.clone())?);
                }
                _ if child.is("destroy", ns::MUC_USER) => {
                    user.destroy = Some(Destroy::try_from(child.clone())?);
                }
                _ => (),
            }
        }

        Ok(user)
    }
}

impl From<MucUser> for Element {
    fn from(value: MucUser) -> Self {
        Element::builder("x", ns::MUC_USER)
            .append_all(value.status)
            .append_all(value.items)
            .append_all(value.destroy)
            .build()
    }
}

impl TryFrom<Element> for Destroy {
    type Error = anyhow::Error;

    fn try_from(root: Element) -> Result<Self, Self::Error> {
        root.expect_is("destroy", ns::MUC_USER)?;

        Ok(Destroy {
            jid: root.attr("jid").map(BareJid::from_str).transpose()?,
            reason: root
                .get_child("reason", ns::MUC_USER)
                .map(|node| node.text()),
        })
    }
}

impl From<Destroy> for Element {
    fn from(value: Destroy) -> Self {
        Element::builder("destroy", ns::MUC_USER)
            .attr("jid", value.jid)
            .append_all(value.reason.map(|reason| {
                Element::builder("reason", ns::MUC_USER)
                    .append(reason)
                    .build()
            }))
            .build()
    }
}

/// Extracts the error child of a room presence of type `error`.
pub fn presence_error(presence: &xmpp_parsers::presence::Presence) -> Option<StanzaError> {
    presence
        .payloads
        .iter()
        .find(|p| p.name() == "error")
        .and_then(|p| StanzaError::try_from(p.clone()).ok())
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use anyhow::Result;
    use xmpp_parsers::muc::user::{Affiliation, Role};

    use super::*;

    #[test]
    fn test_deserialize_muc_user() -> Result<()> {
        let xml = r#"<x xmlns='http://jabber.org/protocol/muc#user'>
            <status code='110'/>
            <item affiliation='member' role='moderator'/>
        </x>
        "#;

        let elem = Element::from_str(xml)?;
        let user = MucUser::try_from(elem)?;

        assert!(user.is_self_presence());
        assert_eq!(
            user.items,
            vec![Item {
                affiliation: Affiliation::Member,
                jid: None,
                nick: None,
                role: Role::Moderator,
                actor: None,
                continue_: None,
                reason: None,
            }]
        );

        Ok(())
    }

    #[test]
    fn test_skips_unknown_children() -> Result<()> {
        let xml = r#"<x xmlns='http://jabber.org/protocol/muc#user'>
            <status code='110'/>
            <password>hunter2</password>
        </x>
        "#;

        let user = MucUser::try_from(Element::from_str(xml)?)?;
        assert_eq!(user.status, vec![Status::SelfPresence]);

        Ok(())
    }
}
