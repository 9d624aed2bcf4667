// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use jid::BareJid;
use xmpp_parsers::roster;

#[derive(Debug, PartialEq, Clone)]
pub struct Contact {
    pub jid: BareJid,
    pub name: String,
    pub groups: Vec<String>,
    pub subscription: Subscription,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Subscription {
    None,
    To,
    From,
    Both,
}

impl From<roster::Subscription> for Subscription {
    fn from(value: roster::Subscription) -> Self {
        match value {
            roster::Subscription::To => Subscription::To,
            roster::Subscription::From => Subscription::From,
            roster::Subscription::Both => Subscription::Both,
            _ => Subscription::None,
        }
    }
}

impl From<roster::Item> for Contact {
    fn from(value: roster::Item) -> Self {
        let name = value
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| {
                value
                    .jid
                    .node_str()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| value.jid.to_string())
            });

        Contact {
            jid: value.jid,
            name,
            groups: value.groups.into_iter().map(|group| group.0).collect(),
            subscription: value.subscription.into(),
        }
    }
}
