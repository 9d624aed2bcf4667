// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset};
use jid::BareJid;

use crate::stanza::message;
use crate::stanza::message::fasten::LinkPreview;
use crate::stanza::message::reply::Reply;
use crate::stanza::message::stanza_id;
use crate::stanza::message::Emoji;

/// A displayable message in a 1:1 conversation. Reaction values are the bare
/// JIDs of the reacting users.
#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    pub id: message::Id,
    pub stanza_id: Option<stanza_id::Id>,
    pub conversation_id: BareJid,
    pub from: BareJid,
    pub body: String,
    pub timestamp: DateTime<FixedOffset>,
    pub is_outgoing: bool,
    pub is_delayed: bool,
    pub is_edited: bool,
    pub original_body: Option<String>,
    pub is_retracted: bool,
    pub retracted_at: Option<DateTime<FixedOffset>>,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<Reply>,
    pub reactions: BTreeMap<Emoji, Vec<BareJid>>,
    pub link_preview: Option<LinkPreview>,
    pub no_styling: bool,
}

/// A displayable message in a room. Occupants are identified by nickname for
/// the lifetime of the room, so reactions and sender are keyed accordingly.
#[derive(Debug, PartialEq, Clone)]
pub struct RoomMessage {
    pub id: message::Id,
    pub stanza_id: Option<stanza_id::Id>,
    pub room_jid: BareJid,
    pub nick: String,
    pub body: String,
    pub timestamp: DateTime<FixedOffset>,
    pub is_outgoing: bool,
    pub is_delayed: bool,
    pub is_edited: bool,
    pub original_body: Option<String>,
    pub is_retracted: bool,
    pub retracted_at: Option<DateTime<FixedOffset>>,
    pub is_mention: bool,
    pub is_mention_all: bool,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<Reply>,
    pub reactions: BTreeMap<Emoji, Vec<String>>,
    pub link_preview: Option<LinkPreview>,
    pub no_styling: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Attachment {
    pub url: String,
    pub description: Option<String>,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// An archived or live stanza that modifies an earlier message instead of
/// being displayable on its own.
#[derive(Debug, PartialEq, Clone)]
pub enum MessageModifier {
    Retraction {
        target: message::Id,
        sender: jid::Jid,
        timestamp: DateTime<FixedOffset>,
    },
    Correction {
        target: message::Id,
        sender: jid::Jid,
        body: String,
    },
    Fastening {
        target: message::Id,
        link_preview: LinkPreview,
    },
    Reaction {
        target: message::Id,
        sender: jid::Jid,
        emojis: Vec<Emoji>,
    },
}

impl Message {
    /// Replaces all reactions of `sender` on this message with `emojis`.
    /// Empty emoji sets are compacted away.
    pub fn apply_reactions(&mut self, sender: &BareJid, emojis: Vec<Emoji>) {
        for senders in self.reactions.values_mut() {
            senders.retain(|jid| jid != sender);
        }
        for emoji in emojis {
            self.reactions.entry(emoji).or_default().push(sender.clone());
        }
        self.reactions.retain(|_, senders| !senders.is_empty());
    }
}

impl RoomMessage {
    pub fn apply_reactions(&mut self, nick: &str, emojis: Vec<Emoji>) {
        for senders in self.reactions.values_mut() {
            senders.retain(|sender| !sender.eq_ignore_ascii_case(nick));
        }
        for emoji in emojis {
            self.reactions.entry(emoji).or_default().push(nick.to_string());
        }
        self.reactions.retain(|_, senders| !senders.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn message() -> Message {
        Message {
            id: "m1".into(),
            stanza_id: None,
            conversation_id: BareJid::from_str("a@parlor.im").unwrap(),
            from: BareJid::from_str("a@parlor.im").unwrap(),
            body: "hello".to_string(),
            timestamp: DateTime::parse_from_rfc3339("2025-06-01T10:00:00+00:00").unwrap(),
            is_outgoing: false,
            is_delayed: false,
            is_edited: false,
            original_body: None,
            is_retracted: false,
            retracted_at: None,
            attachment: None,
            reply_to: None,
            reactions: BTreeMap::new(),
            link_preview: None,
            no_styling: false,
        }
    }

    #[test]
    fn test_reactions_replace_prior_set() {
        let mut message = message();
        let alice = BareJid::from_str("alice@parlor.im").unwrap();

        message.apply_reactions(&alice, vec!["👍".into(), "🎉".into()]);
        message.apply_reactions(&alice, vec!["🎉".into()]);

        assert_eq!(
            message.reactions,
            BTreeMap::from([(Emoji::from("🎉"), vec![alice.clone()])])
        );

        message.apply_reactions(&alice, vec![]);
        assert!(message.reactions.is_empty());
    }
}
