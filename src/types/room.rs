// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::{BTreeSet, HashMap};

use jid::{BareJid, FullJid};
use xmpp_parsers::muc::user::{Affiliation, Role};
use xmpp_parsers::presence::Show;

use crate::stanza::muc::Hat;
use crate::types::RoomMessage;

/// The join lifecycle of a room. `Joining` and `Joined` are mutually
/// exclusive by construction.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum RoomState {
    #[default]
    Idle,
    Joining,
    Joined,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Room {
    pub jid: BareJid,
    pub name: String,
    pub nickname: String,
    pub state: RoomState,
    pub is_bookmarked: bool,
    pub is_quick_chat: bool,
    pub autojoin: bool,
    pub password: Option<String>,
    pub supports_mam: bool,
    pub occupants: HashMap<String, Occupant>,
    pub self_occupant: Option<Occupant>,
    pub subject: Option<String>,
    pub messages: Vec<RoomMessage>,
    pub last_message: Option<RoomMessage>,
    pub unread_count: u32,
    pub mentions_count: u32,
    pub typing_users: BTreeSet<String>,
    pub notify_all: bool,
    pub avatar_hash: Option<String>,
}

impl Room {
    pub fn new(jid: BareJid, name: impl Into<String>, nickname: impl Into<String>) -> Self {
        Room {
            jid,
            name: name.into(),
            nickname: nickname.into(),
            state: RoomState::Idle,
            is_bookmarked: false,
            is_quick_chat: false,
            autojoin: false,
            password: None,
            supports_mam: false,
            occupants: HashMap::new(),
            self_occupant: None,
            subject: None,
            messages: vec![],
            last_message: None,
            unread_count: 0,
            mentions_count: 0,
            typing_users: BTreeSet::new(),
            notify_all: false,
            avatar_hash: None,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.state == RoomState::Joined
    }

    pub fn is_joining(&self) -> bool {
        self.state == RoomState::Joining
    }

    /// Occupant nicknames are matched case-insensitively; some servers
    /// normalize the case of the joining nickname.
    pub fn is_self_nickname(&self, nick: &str) -> bool {
        self.nickname.eq_ignore_ascii_case(nick)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Occupant {
    pub nick: String,
    pub jid: Option<FullJid>,
    pub affiliation: Affiliation,
    pub role: Role,
    pub show: Option<Show>,
    pub hats: Vec<Hat>,
    pub avatar_hash: Option<String>,
}
