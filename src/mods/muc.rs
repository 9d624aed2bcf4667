// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use jid::{BareJid, Jid};
use minidom::Element;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xmpp_parsers::data_forms::{DataForm, DataFormType, Field};
use xmpp_parsers::disco::{DiscoInfoQuery, DiscoItemsQuery, DiscoItemsResult};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::presence::{Presence, Type as PresenceType};
use xmpp_parsers::pubsub::PubSubEvent;
use xmpp_parsers::stanza_error::StanzaError;

use crate::client::{ModuleContext, DISCO_REQUEST_TIMEOUT};
use crate::event::Event as SessionEvent;
use crate::mods::Module;
use crate::stanza::message::{self, Emoji};
use crate::stanza::muc::{presence_error, Hats, Invite, MediatedInvite, MucUser};
use crate::stanza::vcard::VCardUpdate;
use crate::stanza::{muc, ns, Message};
use crate::types::{Bookmark, Occupant, Room, RoomMessage, RoomState};
use crate::util::RequestError;

const JOIN_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_JOIN_RETRIES: u32 = 1;
const DEFAULT_HISTORY_LENGTH: u32 = 50;

/// XEP-0045: Multi-User Chat, including the join state machine, XEP-0402
/// bookmarks and ad-hoc quick chats.
#[derive(Default, Clone)]
pub struct MUC {
    ctx: ModuleContext,
    rooms: RoomRegistry,
    pending_joins: Arc<Mutex<HashMap<BareJid, PendingJoin>>>,
    pending_occupants: Arc<Mutex<HashMap<BareJid, Vec<Occupant>>>>,
}

#[derive(Debug, Clone, Default)]
pub struct JoinRoomOptions {
    pub password: Option<String>,
    pub max_history: Option<u32>,
    pub is_quick_chat: bool,
}

struct PendingJoin {
    nickname: String,
    options: JoinRoomOptions,
    retry_count: u32,
    timeout: JoinHandle<()>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    RoomAdded { jid: BareJid },
    /// Room state changed; pull a fresh snapshot via `MUC::room`.
    RoomUpdated { jid: BareJid },
    RoomJoined { jid: BareJid, joined: bool },
    SelfOccupant { jid: BareJid, occupant: Occupant },
    OccupantJoined { jid: BareJid, occupant: Occupant },
    OccupantLeft { jid: BareJid, nick: String },
    /// All occupants seen while joining, flushed in one batch on
    /// self-presence.
    OccupantsBatch { jid: BareJid, occupants: Vec<Occupant> },
    Subject {
        jid: BareJid,
        subject: Option<String>,
    },
    Message { message: RoomMessage },
    MessageUpdated { message: RoomMessage },
    Reactions {
        jid: BareJid,
        message_id: message::Id,
        nick: String,
        emojis: Vec<Emoji>,
    },
    Typing {
        jid: BareJid,
        nick: String,
        is_typing: bool,
    },
    Animation { jid: BareJid, animation: String },
    Invitation {
        from: Jid,
        room_jid: BareJid,
        password: Option<String>,
        reason: Option<String>,
        is_quick_chat: bool,
    },
    Bookmark { bookmark: Bookmark },
    BookmarkRemoved { jid: BareJid },
}

impl MUC {
    pub fn new(rooms: RoomRegistry) -> Self {
        MUC {
            ctx: ModuleContext::default(),
            rooms,
            pending_joins: Default::default(),
            pending_occupants: Default::default(),
        }
    }

    pub fn room(&self, jid: &BareJid) -> Option<Room> {
        self.rooms.get(jid)
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.snapshot()
    }

    pub fn joined_room_jids(&self) -> Vec<BareJid> {
        self.rooms.joined_jids()
    }
}

impl Module for MUC {
    fn register_with(&mut self, context: ModuleContext) {
        self.ctx = context
    }

    fn handle_presence_stanza(&self, stanza: &Presence) -> Result<bool> {
        let Some(from) = &stanza.from else {
            return Ok(false);
        };
        let room_jid = from.to_bare();

        let muc_user = stanza
            .payloads
            .iter()
            .find(|payload| payload.is("x", ns::MUC_USER))
            .map(|payload| MucUser::try_from(payload.clone()))
            .transpose()?;

        // Presences without the muc#user extension only concern us when
        // they come from a room we track (e.g. join errors).
        if muc_user.is_none() && !self.rooms.contains(&room_jid) {
            return Ok(false);
        }

        let nick = from.resource_str().map(ToString::to_string);

        if stanza.type_ == PresenceType::Error {
            self.handle_room_error(&room_jid, stanza);
            return Ok(true);
        }

        if !self.rooms.contains(&room_jid) && !self.is_pending_nickname(&room_jid, nick.as_deref().unwrap_or_default()) {
            // A muc#user presence for a room we never touched; swallow it.
            return Ok(true);
        }

        let Some(nick) = nick else {
            return Ok(true);
        };

        if stanza.type_ == PresenceType::Unavailable {
            self.handle_unavailable(&room_jid, &nick, muc_user.as_ref());
            return Ok(true);
        }

        let occupant = parse_occupant(&nick, stanza, muc_user.as_ref());
        let is_self = muc_user
            .as_ref()
            .map(|user| user.is_self_presence())
            .unwrap_or(false)
            || self.is_pending_nickname(&room_jid, &nick);

        if is_self {
            self.complete_join(&room_jid, occupant);
        } else {
            self.handle_occupant_presence(&room_jid, occupant);
        }

        Ok(true)
    }

    fn handle_message_stanza(&self, stanza: &Message) -> Result<bool> {
        let Some(from) = &stanza.from else {
            return Ok(false);
        };

        if let Some(direct_invite) = &stanza.direct_invite {
            self.ctx.schedule_event(SessionEvent::MUC(Event::Invitation {
                from: from.clone(),
                room_jid: direct_invite.jid.clone(),
                password: direct_invite.password.clone(),
                reason: direct_invite.reason.clone(),
                // The marker for direct invitations sits next to the <x/>
                // on the message itself.
                is_quick_chat: stanza.quick_chat_marker,
            }));
            return Ok(true);
        }

        if let Some(mediated_invite) = &stanza.mediated_invite {
            // Ignore empty invites.
            let Some(invite) = mediated_invite.invites.first() else {
                return Ok(true);
            };
            self.ctx.schedule_event(SessionEvent::MUC(Event::Invitation {
                from: invite.from.clone().unwrap_or_else(|| from.clone()),
                room_jid: from.to_bare(),
                password: mediated_invite.password.clone(),
                reason: invite.reason.clone(),
                // For mediated invitations the marker travels inside the
                // <invite/> so the MUC service forwards it.
                is_quick_chat: invite.quick_chat,
            }));
            return Ok(true);
        }

        Ok(false)
    }

    fn handle_pubsub_event(&self, _from: &Jid, event: &PubSubEvent) -> Result<bool> {
        match event {
            PubSubEvent::PublishedItems { node, items } if node.0 == ns::BOOKMARKS2 => {
                for item in items {
                    let item = xmpp_parsers::pubsub::Item {
                        id: item.id.clone(),
                        publisher: item.publisher.clone(),
                        payload: item.payload.clone(),
                    };
                    match crate::stanza::ConferenceBookmark::try_from(item) {
                        Ok(bookmark) => self.apply_bookmark(Bookmark::from(bookmark)),
                        Err(err) => warn!("Failed to parse bookmark. {err}"),
                    }
                }
                Ok(true)
            }
            PubSubEvent::RetractedItems { node, items } if node.0 == ns::BOOKMARKS2 => {
                for id in items {
                    let Ok(jid) = id.0.parse::<BareJid>() else {
                        continue;
                    };
                    self.rooms.with_room_mut(&jid, |room| {
                        room.is_bookmarked = false;
                        room.autojoin = false;
                    });
                    self.ctx
                        .schedule_event(SessionEvent::MUC(Event::BookmarkRemoved { jid }));
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// The join state machine.
impl MUC {
    /// Joins a room. Completion is signalled through `RoomJoined`; a room
    /// that's already joined is left untouched to avoid a server-visible
    /// leave/rejoin cycle.
    pub async fn join_room(
        &self,
        room_jid: &BareJid,
        nickname: &str,
        options: JoinRoomOptions,
    ) -> Result<(), RequestError> {
        if self
            .rooms
            .with_room(room_jid, |room| room.is_joined())
            .unwrap_or(false)
        {
            return Ok(());
        }

        // Individual rooms may disable MAM even when the service supports
        // it, so there is deliberately no fallback to the service-level
        // feature here.
        let features = self.query_room_features(room_jid).await;
        let (supports_mam, name) = match features {
            Some(features) => (features.supports_mam, features.name),
            None => (false, None),
        };
        let name =
            name.unwrap_or_else(|| room_jid.node_str().unwrap_or("Room").to_string());

        let is_new = !self.rooms.contains(room_jid);
        self.rooms.upsert(room_jid, |room| {
            room.name = name.clone();
            room.nickname = nickname.to_string();
            room.state = RoomState::Joining;
            room.supports_mam = supports_mam;
            room.password = options.password.clone();
            room.is_quick_chat = options.is_quick_chat;
        });

        if is_new {
            self.ctx.schedule_event(SessionEvent::MUC(Event::RoomAdded {
                jid: room_jid.clone(),
            }));
        } else {
            self.ctx.schedule_event(SessionEvent::MUC(Event::RoomUpdated {
                jid: room_jid.clone(),
            }));
        }

        self.send_join_presence(room_jid, nickname, &options, supports_mam)?;
        self.arm_join_timeout(room_jid, nickname, options, supports_mam, 0);

        Ok(())
    }

    /// Leaves the room and cancels any pending join.
    pub fn leave_room(&self, room_jid: &BareJid) -> Result<()> {
        if let Some(pending) = self.pending_joins.lock().remove(room_jid) {
            pending.timeout.abort();
        }
        self.pending_occupants.lock().remove(room_jid);

        let nickname = self
            .rooms
            .with_room(room_jid, |room| room.nickname.clone())
            .unwrap_or_default();

        let occupant_jid: Jid = format!("{room_jid}/{nickname}")
            .parse()
            .map_err(|err: jid::Error| anyhow::Error::new(err))?;
        self.ctx
            .send_stanza(Presence::new(PresenceType::Unavailable).with_to(occupant_jid))?;

        self.rooms.with_room_mut(room_jid, |room| {
            room.state = RoomState::Idle;
            room.occupants.clear();
            room.self_occupant = None;
            room.typing_users.clear();
        });
        self.ctx.schedule_event(SessionEvent::MUC(Event::RoomJoined {
            jid: room_jid.clone(),
            joined: false,
        }));

        Ok(())
    }

    fn send_join_presence(
        &self,
        room_jid: &BareJid,
        nickname: &str,
        options: &JoinRoomOptions,
        supports_mam: bool,
    ) -> Result<(), RequestError> {
        // With a MAM-capable room the archive is authoritative; asking the
        // room for history would only duplicate messages.
        let max_history = if supports_mam {
            0
        } else {
            options.max_history.unwrap_or(DEFAULT_HISTORY_LENGTH)
        };

        let x = Element::builder("x", ns::MUC)
            .append_all(options.password.as_ref().map(|password| {
                Element::builder("password", ns::MUC)
                    .append(password.clone())
                    .build()
            }))
            .append(
                Element::builder("history", ns::MUC)
                    .attr("maxstanzas", max_history.to_string())
                    .build(),
            )
            .build();

        let occupant_jid: Jid =
            format!("{room_jid}/{nickname}")
                .parse()
                .map_err(|err: jid::Error| RequestError::Generic {
                    msg: err.to_string(),
                })?;

        let mut presence = Presence::new(PresenceType::None)
            .with_to(occupant_jid)
            .with_payloads(vec![x]);

        let own_presence = self.ctx.own_presence();
        presence.show = own_presence.show;
        if let Some(status) = own_presence.status {
            presence.set_status("", &status);
        }

        self.ctx.send_stanza(presence)?;
        Ok(())
    }

    fn arm_join_timeout(
        &self,
        room_jid: &BareJid,
        nickname: &str,
        options: JoinRoomOptions,
        supports_mam: bool,
        retry_count: u32,
    ) {
        let module = self.clone();
        let room_jid_for_task = room_jid.clone();

        let timeout = tokio::spawn(async move {
            tokio::time::sleep(JOIN_TIMEOUT).await;
            module.handle_join_timeout(&room_jid_for_task, supports_mam);
        });

        if let Some(previous) = self.pending_joins.lock().insert(
            room_jid.clone(),
            PendingJoin {
                nickname: nickname.to_string(),
                options,
                retry_count,
                timeout,
            },
        ) {
            previous.timeout.abort();
        }
    }

    fn handle_join_timeout(&self, room_jid: &BareJid, supports_mam: bool) {
        let pending = self.pending_joins.lock().remove(room_jid);
        let Some(pending) = pending else {
            return;
        };

        if pending.retry_count < MAX_JOIN_RETRIES {
            info!("Join timed out for {room_jid}, retrying");
            if let Err(err) = self.send_join_presence(
                room_jid,
                &pending.nickname,
                &pending.options,
                supports_mam,
            ) {
                warn!("Failed to resend join presence. {err}");
            }
            self.arm_join_timeout(
                room_jid,
                &pending.nickname,
                pending.options,
                supports_mam,
                pending.retry_count + 1,
            );
            return;
        }

        warn!("Giving up on joining {room_jid}");
        self.pending_occupants.lock().remove(room_jid);
        self.rooms.with_room_mut(room_jid, |room| {
            room.state = RoomState::Idle;
        });
        self.ctx.schedule_event(SessionEvent::MUC(Event::RoomUpdated {
            jid: room_jid.clone(),
        }));
        self.ctx.schedule_event(SessionEvent::MUC(Event::RoomJoined {
            jid: room_jid.clone(),
            joined: false,
        }));
    }

    fn handle_room_error(&self, room_jid: &BareJid, stanza: &Presence) {
        let error = presence_error(stanza);
        warn!(
            "Received error from room {room_jid}: {}",
            error
                .as_ref()
                .map(error_text)
                .unwrap_or_else(|| "unknown error".to_string())
        );

        if let Some(pending) = self.pending_joins.lock().remove(room_jid) {
            pending.timeout.abort();
        }
        self.pending_occupants.lock().remove(room_jid);

        self.rooms.with_room_mut(room_jid, |room| {
            room.state = RoomState::Idle;
        });
        self.ctx.schedule_event(SessionEvent::MUC(Event::RoomUpdated {
            jid: room_jid.clone(),
        }));
    }

    fn handle_unavailable(&self, room_jid: &BareJid, nick: &str, muc_user: Option<&MucUser>) {
        let is_self = muc_user
            .map(|user| user.is_self_presence())
            .unwrap_or(false)
            || self
                .rooms
                .with_room(room_jid, |room| room.is_self_nickname(nick))
                .unwrap_or(false);

        if is_self {
            if let Some(pending) = self.pending_joins.lock().remove(room_jid) {
                pending.timeout.abort();
            }
            self.pending_occupants.lock().remove(room_jid);
            self.rooms.with_room_mut(room_jid, |room| {
                room.state = RoomState::Idle;
                room.occupants.clear();
                room.self_occupant = None;
                room.typing_users.clear();
            });
            self.ctx.schedule_event(SessionEvent::MUC(Event::RoomJoined {
                jid: room_jid.clone(),
                joined: false,
            }));
            return;
        }

        self.rooms.with_room_mut(room_jid, |room| {
            room.occupants.remove(nick);
            room.typing_users.remove(nick);
        });
        self.ctx.schedule_event(SessionEvent::MUC(Event::OccupantLeft {
            jid: room_jid.clone(),
            nick: nick.to_string(),
        }));
    }

    fn complete_join(&self, room_jid: &BareJid, occupant: Occupant) {
        if let Some(pending) = self.pending_joins.lock().remove(room_jid) {
            pending.timeout.abort();
        }

        let buffered = self
            .pending_occupants
            .lock()
            .remove(room_jid)
            .unwrap_or_default();

        let was_joining = self
            .rooms
            .with_room_mut(room_jid, |room| {
                let was_joining = room.is_joining();
                room.state = RoomState::Joined;
                room.self_occupant = Some(occupant.clone());
                for buffered_occupant in &buffered {
                    room.occupants
                        .insert(buffered_occupant.nick.clone(), buffered_occupant.clone());
                }
                room.occupants.insert(occupant.nick.clone(), occupant.clone());
                was_joining
            })
            .unwrap_or(false);

        // One batch instead of one store update per occupant.
        if !buffered.is_empty() {
            self.ctx
                .schedule_event(SessionEvent::MUC(Event::OccupantsBatch {
                    jid: room_jid.clone(),
                    occupants: buffered,
                }));
        }

        self.ctx.schedule_event(SessionEvent::MUC(Event::RoomJoined {
            jid: room_jid.clone(),
            joined: true,
        }));
        self.ctx.schedule_event(SessionEvent::MUC(Event::SelfOccupant {
            jid: room_jid.clone(),
            occupant: occupant.clone(),
        }));
        self.ctx
            .schedule_event(SessionEvent::MUC(Event::OccupantJoined {
                jid: room_jid.clone(),
                occupant,
            }));

        if !was_joining {
            return;
        }

        let (is_bookmarked, is_quick_chat, nickname) = self
            .rooms
            .with_room(room_jid, |room| {
                (room.is_bookmarked, room.is_quick_chat, room.nickname.clone())
            })
            .unwrap_or((false, false, String::new()));

        // Quick chats are throwaways; everything else gets remembered.
        if !is_bookmarked && !is_quick_chat {
            let module = self.clone();
            let bookmark = Bookmark {
                room_jid: room_jid.clone(),
                name: self.rooms.with_room(room_jid, |room| room.name.clone()),
                nick: Some(nickname),
                autojoin: false,
                password: None,
                notify_all: false,
            };
            crate::util::spawn(async move {
                if let Err(err) = module.publish_bookmark(bookmark).await {
                    warn!("Failed to auto-publish bookmark. {err}");
                }
            });
        }
    }

    fn handle_occupant_presence(&self, room_jid: &BareJid, occupant: Occupant) {
        let state = self
            .rooms
            .with_room(room_jid, |room| room.state)
            .unwrap_or_default();

        match state {
            RoomState::Joining => {
                self.pending_occupants
                    .lock()
                    .entry(room_jid.clone())
                    .or_default()
                    .push(occupant);
            }
            RoomState::Joined => {
                let avatar_changed = self.rooms.with_room_mut(room_jid, |room| {
                    let previous_hash = room
                        .occupants
                        .get(&occupant.nick)
                        .and_then(|existing| existing.avatar_hash.clone());
                    let changed = occupant.avatar_hash.is_some()
                        && previous_hash != occupant.avatar_hash;
                    room.occupants.insert(occupant.nick.clone(), occupant.clone());
                    changed
                });

                self.ctx
                    .schedule_event(SessionEvent::MUC(Event::OccupantJoined {
                        jid: room_jid.clone(),
                        occupant: occupant.clone(),
                    }));

                if avatar_changed.unwrap_or(false) {
                    self.fetch_occupant_avatar(room_jid, occupant);
                }
            }
            RoomState::Idle => (),
        }
    }

    fn is_pending_nickname(&self, room_jid: &BareJid, nick: &str) -> bool {
        self.pending_joins
            .lock()
            .get(room_jid)
            .map(|pending| pending.nickname.eq_ignore_ascii_case(nick))
            .unwrap_or(false)
    }

    /// XEP-0398: fetch the occupant's avatar through the real JID if the
    /// room discloses it, through the in-room address otherwise.
    fn fetch_occupant_avatar(&self, room_jid: &BareJid, occupant: Occupant) {
        let ctx = self.ctx.clone();
        let room_jid = room_jid.clone();

        crate::util::spawn(async move {
            let Some(session) = ctx.session() else {
                return;
            };
            let profile = session.get_mod::<crate::mods::Profile>();
            let real_jid = occupant.jid.as_ref().map(|jid| jid.to_bare());
            if let Err(err) = profile
                .load_occupant_avatar(&room_jid, &occupant.nick, real_jid.as_ref())
                .await
            {
                warn!("Failed to load occupant avatar. {err}");
            }
        });
    }
}

// Room feature discovery, bookmarks and quick chats.
impl MUC {
    /// Queries the room's disco#info. Returns None when the room cannot be
    /// queried; the caller falls back to "no MAM" and a derived name.
    pub async fn query_room_features(&self, room_jid: &BareJid) -> Option<RoomFeatures> {
        let response = self
            .ctx
            .send_iq_with_timeout(
                Iq::from_get(self.ctx.generate_id(), DiscoInfoQuery { node: None })
                    .with_to(Jid::Bare(room_jid.clone())),
                DISCO_REQUEST_TIMEOUT,
            )
            .await;

        let response = match response {
            Ok(Some(response)) => response,
            Ok(None) => return None,
            Err(err) => {
                warn!("Failed to query features for room {room_jid}. {err}");
                return None;
            }
        };

        let info = match xmpp_parsers::disco::DiscoInfoResult::try_from(response) {
            Ok(info) => info,
            Err(err) => {
                warn!("Failed to parse disco#info for room {room_jid}. {err}");
                return None;
            }
        };

        Some(RoomFeatures {
            supports_mam: info.features.iter().any(|feature| feature.var == ns::MAM2),
            name: info
                .identities
                .iter()
                .find_map(|identity| identity.name.clone()),
        })
    }

    /// https://xmpp.org/extensions/xep-0402.html#retrieving-bookmarks
    pub async fn load_bookmarks(&self) -> Result<Vec<Bookmark>, RequestError> {
        let bookmarks = self
            .ctx
            .query_pubsub_node(None, ns::BOOKMARKS2, vec![], None)
            .await?
            .unwrap_or_default()
            .into_iter()
            .filter_map(|item| {
                crate::stanza::ConferenceBookmark::try_from(item)
                    .map(Bookmark::from)
                    .ok()
            })
            .collect::<Vec<_>>();

        Ok(bookmarks)
    }

    /// Saves or updates a bookmark; republishing with the same JID
    /// overwrites the previous version.
    pub async fn publish_bookmark(&self, bookmark: Bookmark) -> Result<(), RequestError> {
        let conference_bookmark = crate::stanza::ConferenceBookmark::from(bookmark.clone());
        let iq = Iq::from_set(
            self.ctx.generate_id(),
            xmpp_parsers::pubsub::PubSub::Publish {
                publish: xmpp_parsers::pubsub::pubsub::Publish {
                    node: xmpp_parsers::pubsub::NodeName(ns::BOOKMARKS2.to_string()),
                    items: vec![xmpp_parsers::pubsub::pubsub::Item(xmpp_parsers::pubsub::Item {
                        id: Some(xmpp_parsers::pubsub::ItemId(bookmark.room_jid.to_string())),
                        publisher: None,
                        payload: Some(conference_bookmark.conference.into()),
                    })],
                },
                publish_options: Some(crate::mods::pubsub::private_publish_options()),
            },
        );
        self.ctx.send_iq(iq).await?;
        self.apply_bookmark(bookmark);
        Ok(())
    }

    /// https://xmpp.org/extensions/xep-0402.html#removing-a-bookmark
    pub async fn retract_bookmark(&self, room_jid: &BareJid) -> Result<(), RequestError> {
        let iq = Iq::from_set(
            self.ctx.generate_id(),
            xmpp_parsers::pubsub::PubSub::Retract(xmpp_parsers::pubsub::pubsub::Retract {
                node: xmpp_parsers::pubsub::NodeName(ns::BOOKMARKS2.to_string()),
                notify: xmpp_parsers::pubsub::pubsub::Notify::True,
                items: vec![xmpp_parsers::pubsub::pubsub::Item(xmpp_parsers::pubsub::Item {
                    id: Some(xmpp_parsers::pubsub::ItemId(room_jid.to_string())),
                    publisher: None,
                    payload: None,
                })],
            }),
        );
        self.ctx.send_iq(iq).await?;

        self.rooms.with_room_mut(room_jid, |room| {
            room.is_bookmarked = false;
            room.autojoin = false;
        });
        self.ctx
            .schedule_event(SessionEvent::MUC(Event::BookmarkRemoved {
                jid: room_jid.clone(),
            }));
        Ok(())
    }

    /// Joins the autojoin bookmarks plus the rooms joined in the previous
    /// session, each exactly once.
    pub async fn autojoin_rooms(&self, prior_joined: Vec<BareJid>) -> Result<()> {
        let bookmarks = match self.load_bookmarks().await {
            Ok(bookmarks) => bookmarks,
            Err(err) if err.is_item_not_found_err() => vec![],
            Err(err) => {
                warn!("Failed to load bookmarks. {err}");
                vec![]
            }
        };

        let mut bookmarks_by_jid = HashMap::new();
        for bookmark in bookmarks {
            self.apply_bookmark(bookmark.clone());
            bookmarks_by_jid.insert(bookmark.room_jid.clone(), bookmark);
        }

        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for bookmark in bookmarks_by_jid.values() {
            if bookmark.autojoin && bookmark.nick.is_some() && seen.insert(bookmark.room_jid.clone())
            {
                targets.push(bookmark.room_jid.clone());
            }
        }
        for room_jid in prior_joined {
            if seen.insert(room_jid.clone()) {
                targets.push(room_jid);
            }
        }

        let fallback_nickname = self
            .ctx
            .bare_jid()
            .node_str()
            .unwrap_or("parlor-user")
            .to_string();

        for room_jid in targets {
            let bookmark = bookmarks_by_jid.get(&room_jid);
            let nickname = bookmark
                .and_then(|bookmark| bookmark.nick.clone())
                .unwrap_or_else(|| fallback_nickname.clone());
            let options = JoinRoomOptions {
                password: bookmark.and_then(|bookmark| bookmark.password.clone()),
                ..Default::default()
            };

            if let Err(err) = self.join_room(&room_jid, &nickname, options).await {
                warn!("Failed to join room {room_jid}. {err}");
            }
        }

        Ok(())
    }

    /// Creates an ephemeral room on the MUC service, configures it as
    /// non-persistent and hidden, and invites the given users.
    pub async fn create_quick_chat(
        &self,
        invitees: impl IntoIterator<Item = BareJid>,
    ) -> Result<BareJid, RequestError> {
        let service = self
            .discover_muc_service()
            .await?
            .ok_or(RequestError::Generic {
                msg: "No MUC service found on this server".to_string(),
            })?;

        let user = self
            .ctx
            .bare_jid()
            .node_str()
            .unwrap_or("user")
            .to_string();
        let slug: String = self.ctx.generate_id().chars().take(8).collect();

        let room_jid: BareJid = format!("quickchat-{user}-{slug}@{service}")
            .parse()
            .map_err(|err: jid::Error| RequestError::Generic {
                msg: err.to_string(),
            })?;

        self.join_room(
            &room_jid,
            &user,
            JoinRoomOptions {
                is_quick_chat: true,
                ..Default::default()
            },
        )
        .await?;

        self.configure_quick_chat(&room_jid).await?;

        let invites = invitees
            .into_iter()
            .map(|invitee| Invite {
                from: None,
                to: Some(Jid::Bare(invitee)),
                reason: None,
                quick_chat: true,
            })
            .collect::<Vec<_>>();

        if !invites.is_empty() {
            let message = Message {
                to: Some(Jid::Bare(room_jid.clone())),
                mediated_invite: Some(MediatedInvite {
                    invites,
                    password: None,
                }),
                ..Default::default()
            };
            self.ctx.send_stanza(message)?;
        }

        Ok(room_jid)
    }

    /// Subsequent room configuration via the muc#owner form.
    /// https://xmpp.org/extensions/xep-0045.html#roomconfig
    async fn configure_quick_chat(&self, room_jid: &BareJid) -> Result<(), RequestError> {
        let form = DataForm::new(
            DataFormType::Submit,
            ns::MUC_ROOMCONFIG,
            vec![
                Field::text_single("muc#roomconfig_persistentroom", "0"),
                Field::text_single("muc#roomconfig_publicroom", "0"),
                Field::text_single("muc#roomconfig_allowinvites", "1"),
            ],
        );

        let iq = Iq::from_set(
            self.ctx.generate_id(),
            muc::Query::new(muc::query::Role::Owner).with_payload(form),
        )
        .with_to(Jid::Bare(room_jid.clone()));

        self.ctx.send_iq(iq).await?;
        Ok(())
    }

    /// Sends a direct invitation (XEP-0249) to a single user.
    pub fn send_direct_invite(
        &self,
        to: &BareJid,
        room_jid: &BareJid,
        password: Option<String>,
    ) -> Result<()> {
        let message = Message {
            to: Some(Jid::Bare(to.clone())),
            direct_invite: Some(muc::DirectInvite {
                jid: room_jid.clone(),
                password,
                reason: None,
            }),
            ..Default::default()
        };
        self.ctx.send_stanza(message)
    }

    pub fn set_room_subject(&self, room_jid: &BareJid, subject: Option<&str>) -> Result<()> {
        let message = Message {
            id: Some(self.ctx.generate_id().into()),
            to: Some(Jid::Bare(room_jid.clone())),
            r#type: message::MessageType::Groupchat,
            // An empty string clears the subject.
            subject: Some(subject.unwrap_or_default().to_string()),
            ..Default::default()
        };
        self.ctx.send_stanza(message)
    }

    /// Lists the public rooms on a MUC service.
    /// https://xmpp.org/extensions/xep-0045.html#disco-rooms
    pub async fn load_public_rooms(
        &self,
        service: &BareJid,
    ) -> Result<Vec<PublicRoom>, RequestError> {
        let response = self
            .ctx
            .send_iq_with_timeout(
                Iq::from_get(
                    self.ctx.generate_id(),
                    DiscoItemsQuery { node: None },
                )
                .with_to(Jid::Bare(service.clone())),
                DISCO_REQUEST_TIMEOUT,
            )
            .await?
            .ok_or(RequestError::UnexpectedResponse)?;

        let items = DiscoItemsResult::try_from(response)?;

        Ok(items
            .items
            .into_iter()
            .map(|item| PublicRoom {
                jid: item.jid.to_bare(),
                name: item.name,
            })
            .collect())
    }

    async fn discover_muc_service(&self) -> Result<Option<BareJid>, RequestError> {
        let response = self
            .ctx
            .send_iq_with_timeout(
                Iq::from_get(
                    self.ctx.generate_id(),
                    DiscoItemsQuery { node: None },
                )
                .with_to(Jid::Bare(self.ctx.server_jid())),
                DISCO_REQUEST_TIMEOUT,
            )
            .await?
            .ok_or(RequestError::UnexpectedResponse)?;

        let items = DiscoItemsResult::try_from(response)?;

        for item in items.items {
            let Ok(Some(info)) = self
                .ctx
                .send_iq_with_timeout(
                    Iq::from_get(self.ctx.generate_id(), DiscoInfoQuery { node: None })
                        .with_to(item.jid.clone()),
                    DISCO_REQUEST_TIMEOUT,
                )
                .await
            else {
                continue;
            };

            let Ok(info) = xmpp_parsers::disco::DiscoInfoResult::try_from(info) else {
                continue;
            };

            let is_muc_service = info
                .identities
                .iter()
                .any(|identity| identity.category == "conference" && identity.type_ == "text");

            if is_muc_service {
                return Ok(Some(item.jid.to_bare()));
            }
        }

        Ok(None)
    }

    fn apply_bookmark(&self, bookmark: Bookmark) {
        let jid = bookmark.room_jid.clone();

        self.rooms.upsert(&jid, |room| {
            room.is_bookmarked = true;
            room.autojoin = bookmark.autojoin;
            room.notify_all = bookmark.notify_all;
            if let Some(name) = &bookmark.name {
                room.name = name.clone();
            }
            if let Some(nick) = &bookmark.nick {
                if room.nickname.is_empty() {
                    room.nickname = nick.clone();
                }
            }
            if bookmark.password.is_some() {
                room.password = bookmark.password.clone();
            }
        });

        self.ctx
            .schedule_event(SessionEvent::MUC(Event::Bookmark { bookmark }));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomFeatures {
    pub supports_mam: bool,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublicRoom {
    pub jid: BareJid,
    pub name: Option<String>,
}

fn parse_occupant(nick: &str, stanza: &Presence, muc_user: Option<&MucUser>) -> Occupant {
    let item = muc_user.and_then(|user| user.items.first());

    let hats = stanza
        .payloads
        .iter()
        .find(|payload| payload.is("hats", ns::HATS))
        .and_then(|payload| Hats::try_from(payload.clone()).ok())
        .map(|hats| hats.hats)
        .unwrap_or_default();

    let avatar_hash = stanza
        .payloads
        .iter()
        .find(|payload| payload.is("x", ns::VCARD_UPDATE))
        .and_then(|payload| VCardUpdate::try_from(payload.clone()).ok())
        .and_then(|update| update.photo_hash);

    Occupant {
        nick: nick.to_string(),
        jid: item.and_then(|item| item.jid.clone()),
        affiliation: item
            .map(|item| item.affiliation.clone())
            .unwrap_or(xmpp_parsers::muc::user::Affiliation::None),
        role: item
            .map(|item| item.role.clone())
            .unwrap_or(xmpp_parsers::muc::user::Role::None),
        show: stanza.show.clone(),
        hats,
        avatar_hash,
    }
}

fn error_text(error: &StanzaError) -> String {
    error
        .texts
        .values()
        .next()
        .cloned()
        .unwrap_or_else(|| format!("{:?}", error.defined_condition))
}

/// The session's room state, shared with the chat and archive modules.
#[derive(Default, Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<BareJid, Room>>>,
}

impl RoomRegistry {
    pub fn get(&self, jid: &BareJid) -> Option<Room> {
        self.rooms.read().get(jid).cloned()
    }

    pub fn contains(&self, jid: &BareJid) -> bool {
        self.rooms.read().contains_key(jid)
    }

    pub fn with_room<R>(&self, jid: &BareJid, f: impl FnOnce(&Room) -> R) -> Option<R> {
        self.rooms.read().get(jid).map(f)
    }

    pub fn with_room_mut<R>(&self, jid: &BareJid, f: impl FnOnce(&mut Room) -> R) -> Option<R> {
        self.rooms.write().get_mut(jid).map(f)
    }

    /// Applies `f` to the room, creating it first if needed.
    pub fn upsert(&self, jid: &BareJid, f: impl FnOnce(&mut Room)) {
        let mut rooms = self.rooms.write();
        let room = rooms.entry(jid.clone()).or_insert_with(|| {
            Room::new(
                jid.clone(),
                jid.node_str().unwrap_or("Room").to_string(),
                String::new(),
            )
        });
        f(room);
    }

    pub fn remove(&self, jid: &BareJid) -> Option<Room> {
        self.rooms.write().remove(jid)
    }

    pub fn joined_jids(&self) -> Vec<BareJid> {
        self.rooms
            .read()
            .values()
            .filter(|room| room.is_joined())
            .map(|room| room.jid.clone())
            .collect()
    }

    /// Whether the given address belongs to the MUC world: either a room we
    /// track or any other occupant of the services those rooms live on.
    pub fn is_muc_address(&self, jid: &BareJid) -> bool {
        let rooms = self.rooms.read();
        rooms.contains_key(jid)
            || rooms
                .values()
                .any(|room| room.jid.domain() == jid.domain())
    }

    pub fn snapshot(&self) -> Vec<Room> {
        self.rooms.read().values().cloned().collect()
    }
}
