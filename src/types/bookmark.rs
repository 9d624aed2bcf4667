// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use jid::BareJid;
use minidom::Element;

use crate::stanza::conference_bookmark::{Conference, ConferenceBookmark};
use crate::stanza::ns;

/// A saved room, backed by a XEP-0402 bookmark.
#[derive(Debug, PartialEq, Clone)]
pub struct Bookmark {
    pub room_jid: BareJid,
    pub name: Option<String>,
    pub nick: Option<String>,
    pub autojoin: bool,
    pub password: Option<String>,
    pub notify_all: bool,
}

impl From<ConferenceBookmark> for Bookmark {
    fn from(value: ConferenceBookmark) -> Self {
        let notify_all = value
            .conference
            .extensions
            .iter()
            .any(|ext| ext.is("notify-all", ns::PARLOR_ROOM_SETTINGS));

        Bookmark {
            room_jid: value.jid,
            name: value.conference.name,
            nick: value.conference.nick,
            autojoin: value.conference.autojoin,
            password: value.conference.password,
            notify_all,
        }
    }
}

impl From<Bookmark> for ConferenceBookmark {
    fn from(value: Bookmark) -> Self {
        ConferenceBookmark {
            jid: value.room_jid,
            conference: Conference {
                autojoin: value.autojoin,
                name: value.name,
                nick: value.nick,
                password: value.password,
                extensions: value
                    .notify_all
                    .then(|| Element::builder("notify-all", ns::PARLOR_ROOM_SETTINGS).build())
                    .into_iter()
                    .collect(),
            },
        }
    }
}
