// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, FixedOffset};
use jid::{BareJid, Jid};
use tracing::warn;
use xmpp_parsers::iq::{Iq, IqType};

use crate::client::ModuleContext;
use crate::event::Event as SessionEvent;
use crate::mods::chat::{
    self, attachment_from_stanza, body_mentions_all, body_with_oob, ConversationRegistry,
};
use crate::mods::muc::{self, RoomRegistry};
use crate::mods::Module;
use crate::stanza::mam::{ArchivedMessage, Fin, Query, QueryId, RsmRange};
use crate::stanza::message::stanza_id;
use crate::stanza::{mam, message};
use crate::types::{Message, MessageModifier, RoomMessage};
use crate::util::{join_all_limited, ElementReducerPoll, RequestError, RequestFuture, XMPPElement};

/// When a page holds nothing displayable we keep paginating backward, up to
/// this many pages, so a burst of retractions doesn't read as an empty
/// archive.
const MAX_AUTO_PAGES: usize = 5;

const PAGE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PAGE_SIZE: usize = 50;

const PREVIEW_CONCURRENCY: usize = 3;
const PREVIEW_CHAT_PAGE_SIZE: usize = 5;
const PREVIEW_ROOM_PAGE_SIZE: usize = 30;

const CATCH_UP_CHAT_LIMIT: usize = 100;
const MAX_CATCH_UP_PAGES: usize = 10;

/// XEP-0313: Message Archive Management with modification-aware merging.
#[derive(Default, Clone)]
pub struct MAM {
    ctx: ModuleContext,
    rooms: RoomRegistry,
    conversations: ConversationRegistry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Chat { with: BareJid },
    Room { room_jid: BareJid },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Loading { target: Target },
    ChatMessages {
        with: BareJid,
        result: MessageResultSet<Message>,
    },
    RoomMessages {
        room_jid: BareJid,
        result: MessageResultSet<RoomMessage>,
    },
    Error { target: Target, message: String },
    /// A sidebar preview was refreshed; only the target's last message
    /// changed.
    PreviewUpdated { target: Target },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageResultSet<T> {
    pub messages: Vec<T>,
    pub is_complete: bool,
    pub first: Option<stanza_id::Id>,
    pub last: Option<stanza_id::Id>,
}

#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Fetch the page before this archive id; None fetches the latest page.
    pub before: Option<stanza_id::Id>,
    /// Fetch the page after this archive id. Mutually exclusive with
    /// `before`.
    pub after: Option<stanza_id::Id>,
    pub max: Option<usize>,
}

impl MAM {
    pub fn new(rooms: RoomRegistry, conversations: ConversationRegistry) -> Self {
        MAM {
            ctx: ModuleContext::default(),
            rooms,
            conversations,
        }
    }
}

impl Module for MAM {
    fn register_with(&mut self, context: ModuleContext) {
        self.ctx = context
    }
}

impl MAM {
    /// Loads a page of the 1:1 archive with `with`, paginating backward
    /// past modification-only pages until something displayable appears.
    pub async fn query_archive(
        &self,
        with: &BareJid,
        page: PageRequest,
    ) -> Result<MessageResultSet<Message>, RequestError> {
        let target = Target::Chat { with: with.clone() };
        self.ctx
            .schedule_event(SessionEvent::MAM(Event::Loading {
                target: target.clone(),
            }));

        let (archived, fin) = match self.load_displayable_pages(None, Some(with), &page).await {
            Ok(result) => result,
            Err(err) => {
                self.emit_error(target, &err);
                return Err(err);
            }
        };

        let (mut messages, modifiers) = self.parse_chat_archive(with, archived);
        apply_chat_modifiers(&mut messages, modifiers);

        let result = MessageResultSet {
            messages,
            is_complete: fin.complete,
            first: fin.first,
            last: fin.last,
        };

        self.ctx.schedule_event(SessionEvent::MAM(Event::ChatMessages {
            with: with.clone(),
            result: result.clone(),
        }));

        Ok(result)
    }

    /// Loads a page of a room's archive.
    pub async fn query_room_archive(
        &self,
        room_jid: &BareJid,
        page: PageRequest,
    ) -> Result<MessageResultSet<RoomMessage>, RequestError> {
        let target = Target::Room {
            room_jid: room_jid.clone(),
        };
        self.ctx
            .schedule_event(SessionEvent::MAM(Event::Loading {
                target: target.clone(),
            }));

        let (archived, fin) = match self
            .load_displayable_pages(Some(room_jid), None, &page)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                self.emit_error(target, &err);
                return Err(err);
            }
        };

        let (mut messages, modifiers) = self.parse_room_archive(room_jid, archived);
        apply_room_modifiers(&mut messages, modifiers);

        let result = MessageResultSet {
            messages,
            is_complete: fin.complete,
            first: fin.first,
            last: fin.last,
        };

        self.ctx.schedule_event(SessionEvent::MAM(Event::RoomMessages {
            room_jid: room_jid.clone(),
            result: result.clone(),
        }));

        Ok(result)
    }

    /// Refreshes the previews of all known rooms, a bounded number at a
    /// time. Only `last_message` is touched.
    pub async fn refresh_room_previews(&self) {
        let rooms = self.rooms.snapshot();
        let targets = rooms
            .iter()
            .filter(|room| room.supports_mam)
            .map(|room| room.jid.clone())
            .collect::<Vec<_>>();

        join_all_limited(
            targets.into_iter().map(|room_jid| {
                let module = self.clone();
                async move {
                    if let Err(err) = module.refresh_room_preview(&room_jid).await {
                        warn!("Failed to refresh preview for {room_jid}. {err}");
                    }
                }
            }),
            PREVIEW_CONCURRENCY,
        )
        .await;
    }

    /// Refreshes the previews of all 1:1 conversations.
    pub async fn refresh_conversation_previews(&self) {
        let targets = self.conversations.conversation_ids();

        join_all_limited(
            targets.into_iter().map(|with| {
                let module = self.clone();
                async move {
                    if let Err(err) = module.refresh_conversation_preview(&with).await {
                        warn!("Failed to refresh preview for {with}. {err}");
                    }
                }
            }),
            PREVIEW_CONCURRENCY,
        )
        .await;
    }

    /// Fetches everything that happened while we were offline. Skipped
    /// entirely after a stream resumption, where the server replays the
    /// missed stanzas itself.
    pub async fn catch_up_missed_messages(&self) -> Result<()> {
        for with in self.conversations.conversation_ids() {
            if let Err(err) = self.catch_up_conversation(&with).await {
                warn!("Failed to catch up conversation with {with}. {err}");
            }
        }

        for room_jid in self.rooms.joined_jids() {
            let supports_mam = self
                .rooms
                .with_room(&room_jid, |room| room.supports_mam)
                .unwrap_or(false);
            if !supports_mam {
                continue;
            }
            if let Err(err) = self.catch_up_room(&room_jid).await {
                warn!("Failed to catch up room {room_jid}. {err}");
            }
        }

        Ok(())
    }
}

impl MAM {
    async fn refresh_room_preview(&self, room_jid: &BareJid) -> Result<(), RequestError> {
        let (archived, _fin) = self
            .load_displayable_pages(
                Some(room_jid),
                None,
                &PageRequest {
                    max: Some(PREVIEW_ROOM_PAGE_SIZE),
                    ..Default::default()
                },
            )
            .await?;

        let (mut messages, modifiers) = self.parse_room_archive(room_jid, archived);
        apply_room_modifiers(&mut messages, modifiers);

        let Some(last) = messages.into_iter().rev().find(|message| !message.is_retracted) else {
            return Ok(());
        };

        self.rooms.with_room_mut(room_jid, |room| {
            room.last_message = Some(last.clone());
        });
        self.ctx
            .schedule_event(SessionEvent::MAM(Event::PreviewUpdated {
                target: Target::Room {
                    room_jid: room_jid.clone(),
                },
            }));
        Ok(())
    }

    async fn refresh_conversation_preview(&self, with: &BareJid) -> Result<(), RequestError> {
        let (archived, _fin) = self
            .load_displayable_pages(
                None,
                Some(with),
                &PageRequest {
                    max: Some(PREVIEW_CHAT_PAGE_SIZE),
                    ..Default::default()
                },
            )
            .await?;

        let (mut messages, modifiers) = self.parse_chat_archive(with, archived);
        apply_chat_modifiers(&mut messages, modifiers);

        let Some(last) = messages.into_iter().rev().find(|message| !message.is_retracted) else {
            return Ok(());
        };

        self.conversations.set_last_message(with, last);
        self.ctx
            .schedule_event(SessionEvent::MAM(Event::PreviewUpdated {
                target: Target::Chat { with: with.clone() },
            }));
        Ok(())
    }

    async fn catch_up_conversation(&self, with: &BareJid) -> Result<(), RequestError> {
        let Some(watermark) = self.conversations.watermark(with) else {
            return Ok(());
        };

        // One millisecond past our newest message, so the watermark itself
        // isn't returned again.
        let start = watermark.timestamp + chrono::Duration::milliseconds(1);

        let (archived, _fin) = self
            .load_page(
                None,
                mam::Filter {
                    with: Some(Jid::Bare(with.clone())),
                    start: Some(start.with_timezone(&chrono::Utc)),
                    end: None,
                },
                None,
                CATCH_UP_CHAT_LIMIT,
            )
            .await?;

        let (mut messages, modifiers) = self.parse_chat_archive(with, archived);
        apply_chat_modifiers(&mut messages, modifiers);

        for message in messages {
            if self.conversations.contains_message(with, &message.id) {
                continue;
            }
            self.conversations.append(with, message.clone());
            self.ctx
                .schedule_event(SessionEvent::Chat(chat::Event::Message { message }));
        }

        Ok(())
    }

    async fn catch_up_room(&self, room_jid: &BareJid) -> Result<(), RequestError> {
        let (known_ids, latest_timestamp) = self
            .rooms
            .with_room(room_jid, |room| {
                let mut ids = HashSet::new();
                for message in &room.messages {
                    ids.insert(message.id.as_ref().to_string());
                    if let Some(stanza_id) = &message.stanza_id {
                        ids.insert(stanza_id.as_ref().to_string());
                    }
                }
                let latest = room.messages.last().map(|message| message.timestamp);
                (ids, latest)
            })
            .unwrap_or_default();

        let mut collected: Vec<ArchivedMessage> = vec![];
        let mut before: Option<stanza_id::Id> = None;
        let mut pages = 0;

        // Page backward from the newest entry until we overlap with what we
        // already have.
        loop {
            pages += 1;
            let (archived, fin) = self
                .load_page(
                    Some(room_jid),
                    mam::Filter::default(),
                    Some(RsmRange::Before(before.clone())),
                    DEFAULT_PAGE_SIZE,
                )
                .await?;

            let mut overlapped = archived.is_empty();
            for entry in &archived {
                let timestamp = entry
                    .forwarded
                    .delay
                    .as_ref()
                    .map(|delay| delay.stamp.0);
                let inner_id = entry
                    .forwarded
                    .stanza
                    .as_ref()
                    .and_then(|stanza| stanza.id.clone());

                let known = known_ids.contains(entry.id.as_ref())
                    || inner_id
                        .map(|id| known_ids.contains(id.as_ref()))
                        .unwrap_or(false)
                    || match (timestamp, latest_timestamp) {
                        (Some(timestamp), Some(latest)) => timestamp <= latest,
                        _ => false,
                    };

                if known {
                    overlapped = true;
                } else {
                    collected.push(entry.clone());
                }
            }

            if overlapped || fin.complete || fin.first.is_none() || pages >= MAX_CATCH_UP_PAGES {
                break;
            }
            before = fin.first;
        }

        collected.sort_by_key(|entry| {
            entry
                .forwarded
                .delay
                .as_ref()
                .map(|delay| delay.stamp.0)
                .unwrap_or_else(|| self.ctx.now())
        });

        let (mut messages, modifiers) = self.parse_room_archive(room_jid, collected);
        apply_room_modifiers(&mut messages, modifiers);

        for message in messages {
            self.rooms.with_room_mut(room_jid, |room| {
                room.messages.push(message.clone());
                room.last_message = Some(message.clone());
            });
            self.ctx
                .schedule_event(SessionEvent::MUC(muc::Event::Message { message }));
        }

        Ok(())
    }

    /// Runs a backward query, auto-paginating while pages come back with
    /// modifications only.
    async fn load_displayable_pages(
        &self,
        room_jid: Option<&BareJid>,
        with: Option<&BareJid>,
        page: &PageRequest,
    ) -> Result<(Vec<ArchivedMessage>, Fin), RequestError> {
        let filter = mam::Filter {
            with: with.map(|with| Jid::Bare(with.clone())),
            start: None,
            end: None,
        };
        let max = page.max.unwrap_or(DEFAULT_PAGE_SIZE);

        // `before` and `after` are mutually exclusive; forward pagination
        // never auto-continues.
        if let Some(after) = &page.after {
            return self
                .load_page(
                    room_jid,
                    filter,
                    Some(RsmRange::After(after.clone())),
                    max,
                )
                .await;
        }

        let mut before = page.before.clone();
        let mut collected: Vec<ArchivedMessage> = vec![];
        let mut pages = 0;

        loop {
            pages += 1;
            let (archived, fin) = self
                .load_page(
                    room_jid,
                    filter.clone(),
                    Some(RsmRange::Before(before.clone())),
                    max,
                )
                .await?;

            let has_displayable = archived
                .iter()
                .any(|entry| {
                    classify_archived(entry, self.ctx.now())
                        .map(|c| c.is_displayable())
                        .unwrap_or(false)
                });

            // Prepend: older pages sort before what we already have.
            let mut merged = archived;
            merged.extend(collected);
            collected = merged;

            if has_displayable || fin.complete || fin.first.is_none() || pages >= MAX_AUTO_PAGES {
                return Ok((collected, fin));
            }

            before = fin.first;
        }
    }

    async fn load_page(
        &self,
        to: Option<&BareJid>,
        filter: mam::Filter,
        range: Option<RsmRange>,
        max: usize,
    ) -> Result<(Vec<ArchivedMessage>, Fin), RequestError> {
        let query_id = QueryId::from(self.ctx.generate_id());
        let iq_id = self.ctx.generate_id();

        let query = Query {
            query_id: query_id.clone(),
            filter,
            range,
            max: Some(max),
        };

        let mut iq = Iq::from_set(iq_id.clone(), query);
        if let Some(to) = to {
            iq = iq.with_to(Jid::Bare(to.clone()));
        }

        self.ctx
            .send_stanza_with_future(
                iq,
                RequestFuture::new_mam_request(iq_id, query_id),
                Some(PAGE_TIMEOUT),
            )
            .await
    }

    fn parse_chat_archive(
        &self,
        with: &BareJid,
        archived: Vec<ArchivedMessage>,
    ) -> (Vec<Message>, Vec<MessageModifier>) {
        let our_jid = self.ctx.bare_jid();
        let mut messages = vec![];
        let mut modifiers = vec![];

        for entry in archived {
            let Some(classified) = classify_archived(&entry, self.ctx.now()) else {
                continue;
            };

            match classified {
                Classified::Modifier(modifier) => modifiers.push(modifier),
                Classified::Displayable {
                    stanza,
                    archive_id,
                    timestamp,
                } => {
                    let Some(from) = &stanza.from else {
                        continue;
                    };
                    let sender = from.to_bare();
                    let is_outgoing = sender == our_jid;

                    messages.push(Message {
                        id: stanza
                            .id
                            .clone()
                            .unwrap_or_else(|| archive_id.as_ref().into()),
                        stanza_id: Some(archive_id),
                        conversation_id: with.clone(),
                        from: sender,
                        body: body_with_oob(&stanza),
                        timestamp: timestamp.unwrap_or_else(|| self.ctx.now()),
                        is_outgoing,
                        is_delayed: true,
                        is_edited: false,
                        original_body: None,
                        is_retracted: false,
                        retracted_at: None,
                        attachment: attachment_from_stanza(&stanza),
                        reply_to: stanza.reply.clone(),
                        reactions: BTreeMap::new(),
                        link_preview: None,
                        no_styling: stanza.no_styling,
                    });
                }
            }
        }

        (messages, modifiers)
    }

    fn parse_room_archive(
        &self,
        room_jid: &BareJid,
        archived: Vec<ArchivedMessage>,
    ) -> (Vec<RoomMessage>, Vec<MessageModifier>) {
        let our_jid = self.ctx.bare_jid();
        let self_nickname = self
            .rooms
            .with_room(room_jid, |room| room.nickname.clone())
            .unwrap_or_default();

        let mut messages = vec![];
        let mut modifiers = vec![];

        for entry in archived {
            let Some(classified) = classify_archived(&entry, self.ctx.now()) else {
                continue;
            };

            match classified {
                Classified::Modifier(modifier) => modifiers.push(modifier),
                Classified::Displayable {
                    stanza,
                    archive_id,
                    timestamp,
                } => {
                    let Some(from) = &stanza.from else {
                        continue;
                    };
                    let Some(nick) = from.resource_str().map(ToString::to_string) else {
                        continue;
                    };
                    let is_outgoing = self_nickname.eq_ignore_ascii_case(&nick);
                    let body = body_with_oob(&stanza);

                    let mentions_us = !is_outgoing
                        && stanza
                            .references
                            .iter()
                            .any(|reference| reference.uri == format!("xmpp:{our_jid}"));
                    let mentions_all =
                        !is_outgoing && (stanza.mention_all || body_mentions_all(&body));

                    messages.push(RoomMessage {
                        id: stanza
                            .id
                            .clone()
                            .unwrap_or_else(|| archive_id.as_ref().into()),
                        stanza_id: Some(archive_id),
                        room_jid: room_jid.clone(),
                        nick,
                        body,
                        timestamp: timestamp.unwrap_or_else(|| self.ctx.now()),
                        is_outgoing,
                        is_delayed: true,
                        is_edited: false,
                        original_body: None,
                        is_retracted: false,
                        retracted_at: None,
                        is_mention: mentions_us,
                        is_mention_all: mentions_all,
                        attachment: attachment_from_stanza(&stanza),
                        reply_to: stanza.reply.clone(),
                        reactions: BTreeMap::new(),
                        link_preview: None,
                        no_styling: stanza.no_styling,
                    });
                }
            }
        }

        (messages, modifiers)
    }

    fn emit_error(&self, target: Target, err: &RequestError) {
        let message = match err {
            RequestError::TimedOut => "The archive query timed out".to_string(),
            err => err.to_string(),
        };
        self.ctx
            .schedule_event(SessionEvent::MAM(Event::Error { target, message }));
    }
}

enum Classified {
    Displayable {
        stanza: message::Message,
        archive_id: stanza_id::Id,
        timestamp: Option<DateTime<FixedOffset>>,
    },
    Modifier(MessageModifier),
}

impl Classified {
    fn is_displayable(&self) -> bool {
        matches!(self, Classified::Displayable { .. })
    }
}

/// Sorts an archive entry into "displayable message" or "modification of an
/// earlier message". Chat states and other ephemera yield None.
fn classify_archived(entry: &ArchivedMessage, now: DateTime<FixedOffset>) -> Option<Classified> {
    let stanza = entry.forwarded.stanza.as_deref()?;
    let timestamp = entry.forwarded.delay.as_ref().map(|delay| delay.stamp.0);
    let sender = stanza.from.clone()?;

    if let Some(reactions) = &stanza.reactions {
        return Some(Classified::Modifier(MessageModifier::Reaction {
            target: reactions.id.clone(),
            sender,
            emojis: reactions.reactions.clone(),
        }));
    }

    if let Some(fastening) = &stanza.fastening {
        if fastening.retract() {
            return Some(Classified::Modifier(MessageModifier::Retraction {
                target: fastening.id.clone(),
                sender,
                timestamp: timestamp.unwrap_or(now),
            }));
        }
        if let Some(preview) = fastening.link_preview() {
            return Some(Classified::Modifier(MessageModifier::Fastening {
                target: fastening.id.clone(),
                link_preview: preview,
            }));
        }
    }

    if let Some(retraction) = &stanza.retraction {
        return Some(Classified::Modifier(MessageModifier::Retraction {
            target: retraction.id.clone(),
            sender,
            timestamp: timestamp.unwrap_or(now),
        }));
    }

    if let (Some(replace_id), Some(body)) = (&stanza.replace, &stanza.body) {
        return Some(Classified::Modifier(MessageModifier::Correction {
            target: replace_id.clone(),
            sender,
            body: body.clone(),
        }));
    }

    if stanza.body.is_none() && stanza.oob.is_none() {
        return None;
    }

    Some(Classified::Displayable {
        stanza: stanza.clone(),
        archive_id: entry.id.clone(),
        timestamp,
    })
}

/// Applies buffered modifications to a page of 1:1 messages. Corrections
/// and retractions require the senders' bare JIDs to match.
fn apply_chat_modifiers(messages: &mut [Message], modifiers: Vec<MessageModifier>) {
    for modifier in modifiers {
        match modifier {
            MessageModifier::Correction {
                target,
                sender,
                body,
            } => {
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    if message.from == sender.to_bare() {
                        if message.original_body.is_none() {
                            message.original_body = Some(message.body.clone());
                        }
                        message.body = body;
                        message.is_edited = true;
                    }
                }
            }
            MessageModifier::Retraction {
                target,
                sender,
                timestamp,
            } => {
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    if message.from == sender.to_bare() {
                        message.is_retracted = true;
                        message.retracted_at = Some(timestamp);
                    }
                }
            }
            MessageModifier::Fastening {
                target,
                link_preview,
            } => {
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    message.link_preview = Some(link_preview);
                }
            }
            MessageModifier::Reaction {
                target,
                sender,
                emojis,
            } => {
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    message.apply_reactions(&sender.to_bare(), emojis);
                }
            }
        }
    }
}

/// Applies buffered modifications to a page of room messages. The occupant
/// address (the nickname) has to match for corrections and retractions.
fn apply_room_modifiers(messages: &mut [RoomMessage], modifiers: Vec<MessageModifier>) {
    let sender_nick = |sender: &Jid| sender.resource_str().map(ToString::to_string);

    for modifier in modifiers {
        match modifier {
            MessageModifier::Correction {
                target,
                sender,
                body,
            } => {
                let Some(nick) = sender_nick(&sender) else {
                    continue;
                };
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    if message.nick == nick {
                        if message.original_body.is_none() {
                            message.original_body = Some(message.body.clone());
                        }
                        message.body = body;
                        message.is_edited = true;
                    }
                }
            }
            MessageModifier::Retraction {
                target,
                sender,
                timestamp,
            } => {
                let Some(nick) = sender_nick(&sender) else {
                    continue;
                };
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    if message.nick == nick {
                        message.is_retracted = true;
                        message.retracted_at = Some(timestamp);
                    }
                }
            }
            MessageModifier::Fastening {
                target,
                link_preview,
            } => {
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    message.link_preview = Some(link_preview);
                }
            }
            MessageModifier::Reaction {
                target,
                sender,
                emojis,
            } => {
                let Some(nick) = sender_nick(&sender) else {
                    continue;
                };
                if let Some(message) = messages.iter_mut().find(|m| m.id == target) {
                    message.apply_reactions(&nick, emojis);
                }
            }
        }
    }
}

struct MamCollectorState {
    iq_id: String,
    query_id: QueryId,
    fin: Option<Fin>,
    messages: Vec<ArchivedMessage>,
}

impl RequestFuture<MamCollectorState, (Vec<ArchivedMessage>, Fin)> {
    /// Collects every `<result queryid=…/>` belonging to this query until
    /// the server sends the terminating IQ result with its `<fin/>`.
    fn new_mam_request(iq_id: String, query_id: QueryId) -> Self {
        RequestFuture::new(
            format!("MAM {iq_id}"),
            MamCollectorState {
                iq_id,
                query_id,
                fin: None,
                messages: vec![],
            },
            |state, element| match element {
                XMPPElement::IQ(iq) => {
                    if iq.id != state.iq_id {
                        return Ok(ElementReducerPoll::Pending(Some(iq.into())));
                    }

                    if let IqType::Error(error) = iq.payload {
                        return Err(error.into());
                    }

                    let IqType::Result(Some(payload)) = iq.payload else {
                        return Err(RequestError::UnexpectedResponse);
                    };

                    let fin = match Fin::try_from(payload) {
                        Ok(fin) => fin,
                        Err(err) => {
                            warn!("Failed to parse MAM fin element. {err}");
                            return Err(RequestError::UnexpectedResponse);
                        }
                    };

                    state.fin = Some(fin);
                    Ok(ElementReducerPoll::Ready)
                }
                XMPPElement::Message(message) => {
                    let Some(archived_message) = &message.archived_message else {
                        return Ok(ElementReducerPoll::Pending(Some(message.into())));
                    };

                    let Some(query_id) = &archived_message.query_id else {
                        return Ok(ElementReducerPoll::Pending(Some(message.into())));
                    };

                    if query_id != &state.query_id {
                        return Ok(ElementReducerPoll::Pending(Some(message.into())));
                    }

                    state.messages.push(archived_message.clone());
                    Ok(ElementReducerPoll::Pending(None))
                }
                XMPPElement::Presence(_) | XMPPElement::PubSubMessage(_) => {
                    Ok(ElementReducerPoll::Pending(Some(element)))
                }
            },
            |state| {
                (
                    state.messages,
                    state
                        .fin
                        .expect("Internal error. Missing fin in MamCollectorState."),
                )
            },
        )
    }
}
