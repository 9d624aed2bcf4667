// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use jid::BareJid;
use parking_lot::RwLock;

use crate::client::ModuleContext;
use crate::event::Event as SessionEvent;
use crate::mods::muc::{self, RoomRegistry};
use crate::mods::roster::ContactRegistry;
use crate::mods::Module;
use crate::stanza::message::fasten::{ApplyTo, LinkPreview};
use crate::stanza::message::retract::Retract;
use crate::stanza::message::file_metadata::FileMetadata;
use crate::stanza::message::oob::Oob;
use crate::stanza::message::reply::Reply;
use crate::stanza::message::stanza_id;
use crate::stanza::message::{self, ChatState, Emoji, Fallback, MessageType, Reactions};
use crate::stanza::ns;
use crate::types::{Attachment, Message, RoomMessage};

/// 1:1 and room messaging: outbound operations and the inbound
/// classification ladder.
#[derive(Default, Clone)]
pub struct Chat {
    ctx: ModuleContext,
    rooms: RoomRegistry,
    conversations: ConversationRegistry,
    contacts: ContactRegistry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A new 1:1 conversation appeared (first message with this peer).
    ConversationAdded { conversation_id: BareJid },
    Message { message: Message },
    /// The first message from someone outside the roster.
    StrangerMessage { message: Message },
    MessageSent { message: Message },
    MessageUpdated { message: Message },
    Reactions {
        conversation_id: BareJid,
        message_id: message::Id,
        sender: BareJid,
        emojis: Vec<Emoji>,
    },
    Typing {
        conversation_id: BareJid,
        is_typing: bool,
    },
    Animation {
        conversation_id: BareJid,
        animation: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CarbonContext {
    None,
    Received,
    Sent,
}

#[derive(Debug, Clone, Default)]
pub struct SendMessageOptions {
    pub reply_to: Option<ReplyTo>,
    pub attachment: Option<OutgoingAttachment>,
    pub no_styling: bool,
    pub chat_state: Option<ChatState>,
}

#[derive(Debug, Clone)]
pub struct ReplyTo {
    pub id: message::Id,
    pub to: Option<jid::Jid>,
    pub quoted_body: String,
}

#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub url: String,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub description: Option<String>,
}

impl Chat {
    pub fn new(
        rooms: RoomRegistry,
        conversations: ConversationRegistry,
        contacts: ContactRegistry,
    ) -> Self {
        Chat {
            ctx: ModuleContext::default(),
            rooms,
            conversations,
            contacts,
        }
    }

    pub fn conversations(&self) -> ConversationRegistry {
        self.conversations.clone()
    }
}

impl Module for Chat {
    fn register_with(&mut self, context: ModuleContext) {
        self.ctx = context
    }

    fn handle_message_stanza(&self, stanza: &message::Message) -> Result<bool> {
        // Tagged archive results are consumed by their query's collector;
        // one without a live collector is stale and dropped here.
        if stanza.is_mam_message() {
            return Ok(true);
        }

        self.classify(stanza.clone(), CarbonContext::None)
    }
}

impl Chat {
    fn classify(&self, mut stanza: message::Message, carbon: CarbonContext) -> Result<bool> {
        if carbon == CarbonContext::None {
            if let Some(handled) = self.unwrap_carbon(&stanza)? {
                return Ok(handled);
            }
        }

        // Some servers deliver groupchat PMs and reflections with a muc#user
        // extension but type "chat".
        if stanza.muc_user.is_some() && stanza.r#type == MessageType::Chat {
            stanza.r#type = MessageType::Groupchat;
        }

        let is_groupchat = stanza.r#type == MessageType::Groupchat;

        let mut saw_chat_state = false;
        if let Some(chat_state) = &stanza.chat_state {
            saw_chat_state = true;
            self.handle_chat_state(&stanza, chat_state, is_groupchat);
        }

        if let Some(reactions) = &stanza.reactions {
            self.handle_reactions(&stanza, reactions, is_groupchat);
            return Ok(true);
        }

        if let Some(fastening) = &stanza.fastening {
            if fastening.retract() {
                self.handle_retraction(&stanza, fastening.id.clone(), is_groupchat);
                return Ok(true);
            }
            if let Some(preview) = fastening.link_preview() {
                self.handle_link_preview(&stanza, fastening.id.clone(), preview, is_groupchat);
                return Ok(true);
            }
        }

        if let (Some(replace_id), Some(body)) = (&stanza.replace, &stanza.body) {
            self.handle_correction(&stanza, replace_id.clone(), body.clone(), is_groupchat);
            return Ok(true);
        }

        if let Some(retraction) = &stanza.retraction {
            self.handle_retraction(&stanza, retraction.id.clone(), is_groupchat);
            return Ok(true);
        }

        if let Some(easter_egg) = &stanza.easter_egg {
            let Some(from) = &stanza.from else {
                return Ok(true);
            };
            let conversation_id = from.to_bare();
            let animation = easter_egg.animation.clone();
            if is_groupchat {
                self.ctx.schedule_event(SessionEvent::MUC(muc::Event::Animation {
                    jid: conversation_id,
                    animation,
                }));
            } else {
                self.ctx.schedule_event(SessionEvent::Chat(Event::Animation {
                    conversation_id,
                    animation,
                }));
            }
            return Ok(true);
        }

        if is_groupchat && stanza.subject.is_some() && stanza.body.is_none() {
            self.handle_subject(&stanza);
            return Ok(true);
        }

        if stanza.body.is_none() && stanza.oob.is_none() {
            // Chat-state-only and otherwise empty messages produce no
            // message event.
            return Ok(saw_chat_state || stanza.is_ephemeral());
        }

        if is_groupchat {
            self.handle_room_message(stanza)?;
        } else {
            self.handle_chat_message(stanza, carbon)?;
        }

        Ok(true)
    }

    /// Unwraps carbon copies, guarding against forged carbons
    /// (CVE-2017-5589): only our own bare JID may send them.
    fn unwrap_carbon(&self, stanza: &message::Message) -> Result<Option<bool>> {
        let carbon = if let Some(received) = &stanza.received_carbon {
            Some((CarbonContext::Received, received.forwarded.clone()))
        } else if let Some(sent) = &stanza.sent_carbon {
            Some((CarbonContext::Sent, sent.forwarded.clone()))
        } else {
            None
        };

        let Some((context, forwarded)) = carbon else {
            return Ok(None);
        };

        if stanza.from.as_ref().map(|from| from.to_bare()) != Some(self.ctx.bare_jid()) {
            return Ok(Some(true));
        }

        let Some(inner) = forwarded.stanza else {
            return Ok(Some(true));
        };

        if inner.private_carbon {
            return Ok(Some(true));
        }

        Ok(Some(self.classify(*inner, context)?))
    }

    fn handle_chat_state(
        &self,
        stanza: &message::Message,
        chat_state: &ChatState,
        is_groupchat: bool,
    ) {
        let Some(from) = &stanza.from else {
            return;
        };
        let is_typing = chat_state == &ChatState::Composing;

        if is_groupchat {
            let room_jid = from.to_bare();
            let Some(nick) = from.resource_str().map(ToString::to_string) else {
                return;
            };
            let known = self
                .rooms
                .with_room_mut(&room_jid, |room| {
                    if room.is_self_nickname(&nick) {
                        return false;
                    }
                    if is_typing {
                        room.typing_users.insert(nick.clone());
                    } else {
                        room.typing_users.remove(&nick);
                    }
                    true
                })
                .unwrap_or(false);

            if known {
                self.ctx.schedule_event(SessionEvent::MUC(muc::Event::Typing {
                    jid: room_jid,
                    nick,
                    is_typing,
                }));
            }
        } else {
            self.ctx.schedule_event(SessionEvent::Chat(Event::Typing {
                conversation_id: from.to_bare(),
                is_typing,
            }));
        }
    }

    fn handle_reactions(
        &self,
        stanza: &message::Message,
        reactions: &Reactions,
        is_groupchat: bool,
    ) {
        let Some(from) = &stanza.from else {
            return;
        };

        if is_groupchat {
            let room_jid = from.to_bare();
            let Some(nick) = from.resource_str().map(ToString::to_string) else {
                return;
            };
            let updated = self.rooms.with_room_mut(&room_jid, |room| {
                let mut updated = None;
                for message in room.messages.iter_mut() {
                    if message.id == reactions.id {
                        message.apply_reactions(&nick, reactions.reactions.clone());
                        updated = Some(message.clone());
                        break;
                    }
                }
                if let Some(updated) = &updated {
                    if room.last_message.as_ref().map(|m| &m.id) == Some(&updated.id) {
                        room.last_message = Some(updated.clone());
                    }
                }
                updated
            });

            if updated.is_some() || self.rooms.contains(&room_jid) {
                self.ctx.schedule_event(SessionEvent::MUC(muc::Event::Reactions {
                    jid: room_jid,
                    message_id: reactions.id.clone(),
                    nick,
                    emojis: reactions.reactions.clone(),
                }));
            }
        } else {
            let sender = from.to_bare();
            let conversation_id = self.conversation_id(stanza, &sender);
            self.conversations.update_message(&conversation_id, &reactions.id, |message| {
                message.apply_reactions(&sender, reactions.reactions.clone());
            });
            self.ctx.schedule_event(SessionEvent::Chat(Event::Reactions {
                conversation_id,
                message_id: reactions.id.clone(),
                sender,
                emojis: reactions.reactions.clone(),
            }));
        }
    }

    fn handle_link_preview(
        &self,
        stanza: &message::Message,
        target: message::Id,
        preview: LinkPreview,
        is_groupchat: bool,
    ) {
        let Some(from) = &stanza.from else {
            return;
        };

        if is_groupchat {
            let room_jid = from.to_bare();
            let updated = self.rooms.with_room_mut(&room_jid, |room| {
                for message in room.messages.iter_mut() {
                    if message.id == target {
                        message.link_preview = Some(preview.clone());
                        return Some(message.clone());
                    }
                }
                None
            });
            if let Some(Some(message)) = updated {
                self.ctx
                    .schedule_event(SessionEvent::MUC(muc::Event::MessageUpdated { message }));
            }
        } else {
            let conversation_id = self.conversation_id(stanza, &from.to_bare());
            let updated = self.conversations.update_message(&conversation_id, &target, |message| {
                message.link_preview = Some(preview.clone());
            });
            if let Some(message) = updated {
                self.ctx
                    .schedule_event(SessionEvent::Chat(Event::MessageUpdated { message }));
            }
        }
    }

    /// Corrections only apply when the sender matches the original sender.
    /// In rooms the full occupant address counts, for 1:1 the bare JID.
    fn handle_correction(
        &self,
        stanza: &message::Message,
        target: message::Id,
        body: String,
        is_groupchat: bool,
    ) {
        let Some(from) = &stanza.from else {
            return;
        };

        if is_groupchat {
            let room_jid = from.to_bare();
            let Some(nick) = from.resource_str().map(ToString::to_string) else {
                return;
            };
            let updated = self.rooms.with_room_mut(&room_jid, |room| {
                for message in room.messages.iter_mut() {
                    if message.id == target {
                        if message.nick != nick {
                            return None;
                        }
                        if message.original_body.is_none() {
                            message.original_body = Some(message.body.clone());
                        }
                        message.body = body.clone();
                        message.is_edited = true;
                        let updated = message.clone();
                        if room.last_message.as_ref().map(|m| &m.id) == Some(&updated.id) {
                            room.last_message = Some(updated.clone());
                        }
                        return Some(updated);
                    }
                }
                None
            });
            if let Some(Some(message)) = updated {
                self.ctx
                    .schedule_event(SessionEvent::MUC(muc::Event::MessageUpdated { message }));
            }
        } else {
            let sender = from.to_bare();
            let conversation_id = self.conversation_id(stanza, &sender);
            let updated = self.conversations.update_message_checked(
                &conversation_id,
                &target,
                |message| message.from == sender,
                |message| {
                    if message.original_body.is_none() {
                        message.original_body = Some(message.body.clone());
                    }
                    message.body = body.clone();
                    message.is_edited = true;
                },
            );
            if let Some(message) = updated {
                self.ctx
                    .schedule_event(SessionEvent::Chat(Event::MessageUpdated { message }));
            }
        }
    }

    fn handle_retraction(&self, stanza: &message::Message, target: message::Id, is_groupchat: bool) {
        let Some(from) = &stanza.from else {
            return;
        };
        let now = self.ctx.now();

        if is_groupchat {
            let room_jid = from.to_bare();
            let Some(nick) = from.resource_str().map(ToString::to_string) else {
                return;
            };
            let updated = self.rooms.with_room_mut(&room_jid, |room| {
                for message in room.messages.iter_mut() {
                    if message.id == target {
                        if message.nick != nick {
                            return None;
                        }
                        message.is_retracted = true;
                        message.retracted_at = Some(now);
                        return Some(message.clone());
                    }
                }
                None
            });
            if let Some(Some(message)) = updated {
                self.ctx
                    .schedule_event(SessionEvent::MUC(muc::Event::MessageUpdated { message }));
            }
        } else {
            let sender = from.to_bare();
            let conversation_id = self.conversation_id(stanza, &sender);
            let updated = self.conversations.update_message_checked(
                &conversation_id,
                &target,
                |message| message.from == sender,
                |message| {
                    message.is_retracted = true;
                    message.retracted_at = Some(now);
                },
            );
            if let Some(message) = updated {
                self.ctx
                    .schedule_event(SessionEvent::Chat(Event::MessageUpdated { message }));
            }
        }
    }

    fn handle_subject(&self, stanza: &message::Message) {
        let Some(from) = &stanza.from else {
            return;
        };
        let room_jid = from.to_bare();
        let subject = stanza
            .subject
            .clone()
            .filter(|subject| !subject.is_empty());

        let known = self
            .rooms
            .with_room_mut(&room_jid, |room| {
                room.subject = subject.clone();
            })
            .is_some();

        if known {
            self.ctx.schedule_event(SessionEvent::MUC(muc::Event::Subject {
                jid: room_jid,
                subject,
            }));
        }
    }

    fn handle_room_message(&self, stanza: message::Message) -> Result<()> {
        let Some(from) = &stanza.from else {
            return Ok(());
        };
        let room_jid = from.to_bare();
        let Some(nick) = from.resource_str().map(ToString::to_string) else {
            return Ok(());
        };

        // A groupchat message from a room we don't know produces nothing.
        if !self.rooms.contains(&room_jid) {
            return Ok(());
        }

        let message = self.parse_room_message(&stanza, &room_jid, &nick);

        self.rooms.with_room_mut(&room_jid, |room| {
            if !message.is_outgoing {
                room.unread_count += 1;
                if message.is_mention || message.is_mention_all {
                    room.mentions_count += 1;
                }
            }
            room.typing_users.remove(&nick);
            room.messages.push(message.clone());
            room.last_message = Some(message.clone());
        });

        self.ctx
            .schedule_event(SessionEvent::MUC(muc::Event::Message { message }));
        Ok(())
    }

    fn handle_chat_message(&self, stanza: message::Message, carbon: CarbonContext) -> Result<()> {
        let Some(from) = &stanza.from else {
            return Ok(());
        };

        let our_jid = self.ctx.bare_jid();
        let sender = from.to_bare();
        let is_outgoing = sender == our_jid || carbon == CarbonContext::Sent;

        let conversation_id = if is_outgoing {
            let Some(to) = &stanza.to else {
                return Ok(());
            };
            to.to_bare()
        } else {
            sender.clone()
        };

        let message = self.parse_chat_message(&stanza, &conversation_id, &sender, is_outgoing);
        let is_new_conversation = self.conversations.append(&conversation_id, message.clone());

        if is_new_conversation {
            self.ctx
                .schedule_event(SessionEvent::Chat(Event::ConversationAdded {
                    conversation_id: conversation_id.clone(),
                }));
        }

        // Sent carbons are echoes of our own messages from another device;
        // they're recorded but never surface as inbound messages.
        if carbon == CarbonContext::Sent {
            return Ok(());
        }

        if !is_outgoing && is_new_conversation && !self.contacts.contains(&sender) {
            self.ctx
                .schedule_event(SessionEvent::Chat(Event::StrangerMessage {
                    message: message.clone(),
                }));
        }

        self.ctx
            .schedule_event(SessionEvent::Chat(Event::Message { message }));
        Ok(())
    }

    fn conversation_id(&self, stanza: &message::Message, sender: &BareJid) -> BareJid {
        if sender == &self.ctx.bare_jid() {
            stanza
                .to
                .as_ref()
                .map(|to| to.to_bare())
                .unwrap_or_else(|| sender.clone())
        } else {
            sender.clone()
        }
    }

    fn parse_chat_message(
        &self,
        stanza: &message::Message,
        conversation_id: &BareJid,
        sender: &BareJid,
        is_outgoing: bool,
    ) -> Message {
        Message {
            id: stanza
                .id
                .clone()
                .unwrap_or_else(|| self.ctx.generate_id().into()),
            stanza_id: stanza.stanza_id.as_ref().map(|sid| sid.id.clone()),
            conversation_id: conversation_id.clone(),
            from: sender.clone(),
            body: body_with_oob(stanza),
            timestamp: message_timestamp(stanza, self.ctx.now()),
            is_outgoing,
            is_delayed: stanza.delay.is_some(),
            is_edited: false,
            original_body: None,
            is_retracted: false,
            retracted_at: None,
            attachment: attachment_from_stanza(stanza),
            reply_to: stanza.reply.clone(),
            reactions: BTreeMap::new(),
            link_preview: None,
            no_styling: stanza.no_styling,
        }
    }

    fn parse_room_message(
        &self,
        stanza: &message::Message,
        room_jid: &BareJid,
        nick: &str,
    ) -> RoomMessage {
        let is_outgoing = self
            .rooms
            .with_room(room_jid, |room| {
                room.self_occupant
                    .as_ref()
                    .map(|occupant| occupant.nick.eq_ignore_ascii_case(nick))
                    .unwrap_or_else(|| room.is_self_nickname(nick))
            })
            .unwrap_or(false);

        let our_jid = self.ctx.bare_jid();
        let body = body_with_oob(stanza);

        let mentions_us = !is_outgoing
            && stanza.references.iter().any(|reference| {
                reference.uri == format!("xmpp:{our_jid}")
            });
        let mentions_all =
            !is_outgoing && (stanza.mention_all || body_mentions_all(&body));

        RoomMessage {
            id: stanza
                .id
                .clone()
                .unwrap_or_else(|| self.ctx.generate_id().into()),
            stanza_id: stanza.stanza_id.as_ref().map(|sid| sid.id.clone()),
            room_jid: room_jid.clone(),
            nick: nick.to_string(),
            body,
            timestamp: message_timestamp(stanza, self.ctx.now()),
            is_outgoing,
            is_delayed: stanza.delay.is_some(),
            is_edited: false,
            original_body: None,
            is_retracted: false,
            retracted_at: None,
            is_mention: mentions_us,
            is_mention_all: mentions_all,
            attachment: attachment_from_stanza(stanza),
            reply_to: stanza.reply.clone(),
            reactions: BTreeMap::new(),
            link_preview: None,
            no_styling: stanza.no_styling,
        }
    }
}

// Outbound operations.
impl Chat {
    pub fn send_message(
        &self,
        to: &BareJid,
        body: impl Into<String>,
        options: SendMessageOptions,
    ) -> Result<Message> {
        let stanza = self.build_message_stanza(
            jid::Jid::Bare(to.clone()),
            MessageType::Chat,
            body.into(),
            &options,
        );

        let message = self.parse_chat_message(&stanza, to, &self.ctx.bare_jid(), true);
        self.conversations.append(to, message.clone());

        self.ctx.send_stanza(stanza)?;
        self.ctx
            .schedule_event(SessionEvent::Chat(Event::MessageSent {
                message: message.clone(),
            }));
        Ok(message)
    }

    pub fn send_room_message(
        &self,
        room_jid: &BareJid,
        body: impl Into<String>,
        options: SendMessageOptions,
    ) -> Result<()> {
        // The room reflects the message back to us; no local echo.
        let stanza = self.build_message_stanza(
            jid::Jid::Bare(room_jid.clone()),
            MessageType::Groupchat,
            body.into(),
            &options,
        );
        self.ctx.send_stanza(stanza)
    }

    /// https://xmpp.org/extensions/xep-0444.html
    pub fn send_reactions(
        &self,
        to: &BareJid,
        message_id: message::Id,
        emojis: impl IntoIterator<Item = Emoji>,
        message_type: MessageType,
    ) -> Result<()> {
        let stanza = message::Message {
            id: Some(self.ctx.generate_id().into()),
            to: Some(jid::Jid::Bare(to.clone())),
            r#type: message_type,
            reactions: Some(Reactions {
                id: message_id,
                reactions: emojis.into_iter().collect(),
            }),
            store: Some(true),
            ..Default::default()
        };
        self.ctx.send_stanza(stanza)
    }

    /// https://xmpp.org/extensions/xep-0308.html
    pub fn send_correction(
        &self,
        to: &BareJid,
        message_id: message::Id,
        body: impl Into<String>,
        message_type: MessageType,
    ) -> Result<()> {
        let stanza = message::Message {
            id: Some(self.ctx.generate_id().into()),
            to: Some(jid::Jid::Bare(to.clone())),
            r#type: message_type,
            body: Some(body.into()),
            replace: Some(message_id),
            ..Default::default()
        };
        self.ctx.send_stanza(stanza)
    }

    /// https://xmpp.org/extensions/xep-0424.html
    pub fn send_retraction(
        &self,
        to: &BareJid,
        message_id: message::Id,
        message_type: MessageType,
    ) -> Result<()> {
        let stanza = message::Message {
            id: Some(self.ctx.generate_id().into()),
            to: Some(jid::Jid::Bare(to.clone())),
            r#type: message_type,
            body: Some(
                "This person attempted to retract a previous message, but it's unsupported by \
                 your client."
                    .to_string(),
            ),
            fastening: Some(ApplyTo::new(message_id).with_payload(Retract::default())),
            fallbacks: vec![Fallback::new()],
            ..Default::default()
        };
        self.ctx.send_stanza(stanza)
    }

    /// https://xmpp.org/extensions/xep-0280.html
    pub async fn set_message_carbons_enabled(&self, enabled: bool) -> Result<(), crate::RequestError> {
        let iq = if enabled {
            xmpp_parsers::iq::Iq::from_set(self.ctx.generate_id(), xmpp_parsers::carbons::Enable)
        } else {
            xmpp_parsers::iq::Iq::from_set(self.ctx.generate_id(), xmpp_parsers::carbons::Disable)
        };
        self.ctx.send_iq(iq).await?;
        Ok(())
    }

    /// https://xmpp.org/extensions/xep-0085.html
    pub fn send_chat_state(
        &self,
        to: &BareJid,
        chat_state: ChatState,
        message_type: MessageType,
    ) -> Result<()> {
        let stanza = message::Message {
            to: Some(jid::Jid::Bare(to.clone())),
            r#type: message_type,
            chat_state: Some(chat_state),
            ..Default::default()
        };
        self.ctx.send_stanza(stanza)
    }

    /// Fastens Open Graph metadata for a previously sent URL onto the
    /// original message.
    pub fn send_link_preview(
        &self,
        to: &BareJid,
        message_id: message::Id,
        preview: &LinkPreview,
        message_type: MessageType,
    ) -> Result<()> {
        let mut apply_to = ApplyTo::new(message_id);

        let mut push_meta = |property: &str, content: &Option<String>| {
            if let Some(content) = content {
                apply_to.payloads.push(
                    minidom::Element::builder("meta", "http://www.w3.org/1999/xhtml")
                        .attr("property", property)
                        .attr("content", content.clone())
                        .build(),
                );
            }
        };
        push_meta("og:url", &preview.url);
        push_meta("og:title", &preview.title);
        push_meta("og:description", &preview.description);
        push_meta("og:image", &preview.image);
        push_meta("og:site_name", &preview.site_name);

        let stanza = message::Message {
            id: Some(self.ctx.generate_id().into()),
            to: Some(jid::Jid::Bare(to.clone())),
            r#type: message_type,
            fastening: Some(apply_to),
            store: Some(true),
            ..Default::default()
        };
        self.ctx.send_stanza(stanza)
    }

    fn build_message_stanza(
        &self,
        to: jid::Jid,
        message_type: MessageType,
        body: String,
        options: &SendMessageOptions,
    ) -> message::Message {
        let mut stanza = message::Message {
            id: Some(self.ctx.generate_id().into()),
            to: Some(to),
            r#type: message_type,
            chat_state: options.chat_state.clone(),
            no_styling: options.no_styling,
            ..Default::default()
        };

        let mut body = body;

        if let Some(reply_to) = &options.reply_to {
            // XEP-0461 fallback: the quoted portion is prefixed to the body
            // and marked so supporting clients can strip it.
            let quote = reply_to
                .quoted_body
                .lines()
                .map(|line| format!("> {line}\n"))
                .collect::<String>();
            let quote_len = quote.len();
            body = format!("{quote}{body}");

            stanza.reply = Some(Reply {
                id: reply_to.id.clone(),
                to: reply_to.to.clone(),
            });
            stanza.fallbacks.push(
                Fallback::new()
                    .for_ns(ns::REPLY)
                    .with_body_range(0, quote_len),
            );
        }

        if let Some(attachment) = &options.attachment {
            let url_start = if body.is_empty() {
                0
            } else {
                body.push('\n');
                body.len()
            };
            body.push_str(&attachment.url);

            stanza.oob = Some(Oob {
                url: attachment.url.clone(),
                desc: attachment.description.clone(),
            });
            stanza.fallbacks.push(
                Fallback::new()
                    .for_ns(ns::OUT_OF_BAND_DATA)
                    .with_body_range(url_start, body.len()),
            );

            // Dimensions are only known for images; XEP-0446 metadata rides
            // along when they are.
            if attachment.width.is_some() || attachment.height.is_some() {
                stanza.file_metadata = Some(FileMetadata {
                    name: attachment.file_name.clone(),
                    media_type: attachment.media_type.clone(),
                    size: attachment.file_size,
                    width: attachment.width,
                    height: attachment.height,
                });
            }
        }

        stanza.body = Some(body);
        stanza
    }
}

pub(crate) fn body_with_oob(stanza: &message::Message) -> String {
    if let Some(body) = &stanza.body {
        return body.clone();
    }
    stanza
        .oob
        .as_ref()
        .map(|oob| oob.url.clone())
        .unwrap_or_default()
}

pub(crate) fn message_timestamp(
    stanza: &message::Message,
    now: DateTime<FixedOffset>,
) -> DateTime<FixedOffset> {
    stanza
        .delay
        .as_ref()
        .map(|delay| delay.stamp.0)
        .unwrap_or(now)
}

pub(crate) fn attachment_from_stanza(stanza: &message::Message) -> Option<Attachment> {
    let oob = stanza.oob.as_ref()?;
    let metadata = stanza.file_metadata.as_ref();

    Some(Attachment {
        url: oob.url.clone(),
        description: oob.desc.clone(),
        media_type: metadata.and_then(|m| m.media_type.clone()),
        file_name: metadata.and_then(|m| m.name.clone()),
        file_size: metadata.and_then(|m| m.size),
        width: metadata.and_then(|m| m.width),
        height: metadata.and_then(|m| m.height),
    })
}

/// Case-insensitive `@all` with word boundaries on both sides.
pub(crate) fn body_mentions_all(body: &str) -> bool {
    let lower = body.to_lowercase();
    let bytes = lower.as_bytes();
    let mut search_start = 0;

    while let Some(pos) = lower[search_start..].find("@all") {
        let start = search_start + pos;
        let end = start + "@all".len();

        let boundary_before = start == 0
            || !bytes[start - 1].is_ascii_alphanumeric();
        let boundary_after = end == lower.len() || !bytes[end].is_ascii_alphanumeric();

        if boundary_before && boundary_after {
            return true;
        }
        search_start = end;
    }

    false
}

/// All 1:1 conversations of the session, keyed by the peer's bare JID.
/// Shared with the archive module so catch-up knows each conversation's
/// latest message.
#[derive(Default, Clone)]
pub struct ConversationRegistry {
    inner: Arc<RwLock<HashMap<BareJid, Conversation>>>,
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub messages: Vec<Message>,
    pub last_message: Option<Message>,
}

/// The newest message of a conversation, used as the catch-up watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct Watermark {
    pub id: message::Id,
    pub stanza_id: Option<stanza_id::Id>,
    pub timestamp: DateTime<FixedOffset>,
}

impl ConversationRegistry {
    /// Appends a message. Returns true when this created the conversation.
    pub fn append(&self, conversation_id: &BareJid, message: Message) -> bool {
        let mut inner = self.inner.write();
        let is_new = !inner.contains_key(conversation_id);
        inner
            .entry(conversation_id.clone())
            .or_default()
            .messages
            .push(message);
        is_new
    }

    pub fn contains(&self, conversation_id: &BareJid) -> bool {
        self.inner.read().contains_key(conversation_id)
    }

    pub fn conversation_ids(&self) -> Vec<BareJid> {
        self.inner.read().keys().cloned().collect()
    }

    pub fn messages(&self, conversation_id: &BareJid) -> Vec<Message> {
        self.inner
            .read()
            .get(conversation_id)
            .map(|conversation| conversation.messages.clone())
            .unwrap_or_default()
    }

    pub fn watermark(&self, conversation_id: &BareJid) -> Option<Watermark> {
        self.inner
            .read()
            .get(conversation_id)?
            .messages
            .last()
            .map(|message| Watermark {
                id: message.id.clone(),
                stanza_id: message.stanza_id.clone(),
                timestamp: message.timestamp,
            })
    }

    pub fn contains_message(&self, conversation_id: &BareJid, message_id: &message::Id) -> bool {
        self.inner
            .read()
            .get(conversation_id)
            .map(|conversation| {
                conversation
                    .messages
                    .iter()
                    .any(|message| &message.id == message_id)
            })
            .unwrap_or(false)
    }

    pub fn last_message(&self, conversation_id: &BareJid) -> Option<Message> {
        let inner = self.inner.read();
        let conversation = inner.get(conversation_id)?;
        conversation
            .last_message
            .clone()
            .or_else(|| conversation.messages.last().cloned())
    }

    pub fn set_last_message(&self, conversation_id: &BareJid, message: Message) {
        self.inner
            .write()
            .entry(conversation_id.clone())
            .or_default()
            .last_message = Some(message);
    }

    pub fn update_message(
        &self,
        conversation_id: &BareJid,
        message_id: &message::Id,
        f: impl FnOnce(&mut Message),
    ) -> Option<Message> {
        self.update_message_checked(conversation_id, message_id, |_| true, f)
    }

    /// Applies `f` to the matching message when `check` passes, returning
    /// the updated copy.
    pub fn update_message_checked(
        &self,
        conversation_id: &BareJid,
        message_id: &message::Id,
        check: impl FnOnce(&Message) -> bool,
        f: impl FnOnce(&mut Message),
    ) -> Option<Message> {
        let mut inner = self.inner.write();
        let conversation = inner.get_mut(conversation_id)?;
        let message = conversation
            .messages
            .iter_mut()
            .find(|message| &message.id == message_id)?;

        if !check(message) {
            return None;
        }

        f(message);
        Some(message.clone())
    }
}
