// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use jid::Jid;
use minidom::Element;
use strum_macros::{Display, EnumString};
use xmpp_parsers::delay::Delay;
use xmpp_parsers::message::{Body, MessageType, Subject};
use xmpp_parsers::message_correct::Replace;
use xmpp_parsers::stanza_error::StanzaError;

use crate::ns;
use crate::stanza::mam::ArchivedMessage;
use crate::stanza::message::easter_egg::EasterEgg;
use crate::stanza::message::fasten::ApplyTo;
use crate::stanza::message::file_metadata::FileMetadata;
use crate::stanza::message::oob::Oob;
use crate::stanza::message::reply::Reply;
use crate::stanza::message::retract::RetractWithId;
use crate::stanza::message::stanza_id::{OriginId, StanzaId};
use crate::stanza::message::{carbons, Fallback, Reactions};
use crate::stanza::muc;
use crate::stanza::references::Reference;
use crate::util::id_string_macro::id_string;

id_string!(Id);

// We're redeclaring ChatState here since the xmpp-parsers type doesn't
// roundtrip through strings.
#[derive(Debug, PartialEq, Display, EnumString, Clone, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ChatState {
    /// User is actively participating in the chat session.
    Active,
    /// User is composing a message.
    Composing,
    /// User has effectively ended their participation in the chat session.
    Gone,
    /// User has not been actively participating in the chat session.
    Inactive,
    /// User had been composing but now has stopped.
    Paused,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Message {
    pub from: Option<Jid>,
    pub to: Option<Jid>,
    pub id: Option<Id>,
    pub stanza_id: Option<StanzaId>,
    pub origin_id: Option<OriginId>,
    pub r#type: MessageType,
    pub body: Option<String>,
    pub subject: Option<String>,
    pub chat_state: Option<ChatState>,
    pub replace: Option<Id>,
    pub reactions: Option<Reactions>,
    pub fastening: Option<ApplyTo>,
    pub retraction: Option<RetractWithId>,
    pub fallbacks: Vec<Fallback>,
    pub reply: Option<Reply>,
    pub references: Vec<Reference>,
    pub mention_all: bool,
    pub no_styling: bool,
    pub delay: Option<Delay>,
    pub archived_message: Option<ArchivedMessage>,
    pub sent_carbon: Option<carbons::Sent>,
    pub received_carbon: Option<carbons::Received>,
    pub private_carbon: bool,
    pub store: Option<bool>,
    pub oob: Option<Oob>,
    pub file_metadata: Option<FileMetadata>,
    pub direct_invite: Option<muc::DirectInvite>,
    pub mediated_invite: Option<muc::MediatedInvite>,
    pub quick_chat_marker: bool,
    pub muc_user: Option<muc::MucUser>,
    pub easter_egg: Option<EasterEgg>,
    pub error: Option<StanzaError>,
}

impl Message {
    pub fn new() -> Self {
        Message::default()
    }
}

impl TryFrom<xmpp_parsers::message::Message> for Message {
    type Error = anyhow::Error;

    fn try_from(root: xmpp_parsers::message::Message) -> Result<Self, Self::Error> {
        let mut message = Message::new();

        message.body = root
            .get_best_body(vec![])
            .map(|(_, body)| body.0.to_string());

        message.subject = root
            .get_best_subject(vec![])
            .map(|(_, subject)| subject.0.to_string());

        for payload in root.payloads.into_iter() {
            match payload {
                _ if payload.is("stanza-id", ns::SID) => {
                    message.stanza_id = Some(StanzaId::try_from(payload)?)
                }
                _ if payload.is("origin-id", ns::SID) => {
                    message.origin_id = Some(OriginId::try_from(payload)?)
                }
                _ if payload.has_ns(ns::CHATSTATES) => {
                    message.chat_state = Some(payload.name().parse()?)
                }
                _ if payload.is("replace", ns::MESSAGE_CORRECT) => {
                    message.replace = Some(Replace::try_from(payload)?.id.into())
                }
                _ if payload.is("reactions", ns::REACTIONS) => {
                    message.reactions = Some(Reactions::try_from(payload)?)
                }
                _ if payload.is("apply-to", ns::FASTEN) => {
                    message.fastening = Some(ApplyTo::try_from(payload)?)
                }
                _ if payload.is("retract", ns::RETRACT) && payload.attr("id").is_some() => {
                    message.retraction = Some(RetractWithId::try_from(payload)?)
                }
                _ if payload.is("fallback", ns::FALLBACK) => {
                    message.fallbacks.push(Fallback::try_from(payload)?)
                }
                _ if payload.is("reply", ns::REPLY) => {
                    message.reply = Some(Reply::try_from(payload)?)
                }
                _ if payload.is("reference", ns::REFERENCE) => {
                    message.references.push(Reference::try_from(payload)?)
                }
                _ if payload.name() == "mention-all" => message.mention_all = true,
                _ if payload.is("unstyled", ns::STYLING) => message.no_styling = true,
                _ if payload.is("delay", ns::DELAY) => {
                    message.delay = Some(Delay::try_from(payload)?)
                }
                _ if payload.is("result", ns::MAM2) => {
                    message.archived_message = Some(ArchivedMessage::try_from(payload)?)
                }
                _ if payload.is("sent", ns::CARBONS) => {
                    message.sent_carbon = Some(carbons::Sent::try_from(payload)?)
                }
                _ if payload.is("received", ns::CARBONS) => {
                    message.received_carbon = Some(carbons::Received::try_from(payload)?)
                }
                _ if payload.is("private", ns::CARBONS) => message.private_carbon = true,
                _ if payload.is("x", ns::OUT_OF_BAND_DATA) => {
                    message.oob = Some(Oob::try_from(payload)?)
                }
                _ if payload.is("file", ns::FILE_METADATA) => {
                    message.file_metadata = Some(FileMetadata::try_from(payload)?)
                }
                _ if payload.is("x", ns::DIRECT_MUC_INVITATIONS) => {
                    message.direct_invite = Some(muc::DirectInvite::try_from(payload)?)
                }
                _ if payload.is("x", ns::MUC_USER) => {
                    let mediated_invite = muc::MediatedInvite::try_from(payload.clone())?;
                    if !mediated_invite.invites.is_empty() {
                        message.mediated_invite = Some(mediated_invite);
                    } else {
                        message.muc_user = Some(muc::MucUser::try_from(payload)?);
                    }
                }
                _ if payload.is("quickchat", ns::PARLOR_QUICK_CHAT) => {
                    message.quick_chat_marker = true
                }
                _ if payload.is("easter-egg", ns::PARLOR_EASTER_EGG) => {
                    message.easter_egg = Some(EasterEgg::try_from(payload)?)
                }
                _ if payload.is("error", ns::DEFAULT_NS) => {
                    message.error = Some(StanzaError::try_from(payload)?)
                }
                _ => (),
            }
        }

        message.from = root.from;
        message.to = root.to;
        message.id = root.id.map(Into::into);
        message.r#type = root.type_;

        Ok(message)
    }
}

impl TryFrom<Element> for Message {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        Message::try_from(xmpp_parsers::message::Message::try_from(value)?)
    }
}

impl From<Message> for Element {
    fn from(value: Message) -> Self {
        xmpp_parsers::message::Message::from(value).into()
    }
}

impl From<Message> for xmpp_parsers::message::Message {
    fn from(value: Message) -> Self {
        let mut message = xmpp_parsers::message::Message::new(None);
        message.to = value.to;
        message.from = value.from;
        message.id = value.id.map(|id| id.into_inner());
        message.type_ = value.r#type;

        if let Some(body) = value.body {
            message.bodies.insert("".into(), Body(body));
        }
        if let Some(subject) = value.subject {
            message.subjects.insert("".into(), Subject(subject));
        }
        if let Some(stanza_id) = value.stanza_id {
            message.payloads.push(stanza_id.into())
        }
        if let Some(origin_id) = value.origin_id {
            message.payloads.push(origin_id.into())
        }
        if let Some(chat_state) = value.chat_state {
            message
                .payloads
                .push(Element::builder(chat_state.to_string(), ns::CHATSTATES).build());
        }
        if let Some(replace) = value.replace {
            message.payloads.push(
                Replace {
                    id: replace.into_inner(),
                }
                .into(),
            );
        }
        if let Some(reactions) = value.reactions {
            message.payloads.push(reactions.into());
        }
        if let Some(fastening) = value.fastening {
            message.payloads.push(fastening.into());
        }
        if let Some(retraction) = value.retraction {
            message.payloads.push(retraction.into());
        }
        for fallback in value.fallbacks {
            message.payloads.push(fallback.into());
        }
        if let Some(reply) = value.reply {
            message.payloads.push(reply.into());
        }
        for reference in value.references {
            message.payloads.push(reference.into());
        }
        if value.no_styling {
            message
                .payloads
                .push(Element::builder("unstyled", ns::STYLING).build());
        }
        if let Some(delay) = value.delay {
            message.payloads.push(delay.into());
        }
        if let Some(archived_message) = value.archived_message {
            message.payloads.push(archived_message.into());
        }
        if let Some(received_carbon) = value.received_carbon {
            message.payloads.push(received_carbon.into());
        }
        if let Some(sent_carbon) = value.sent_carbon {
            message.payloads.push(sent_carbon.into());
        }
        if let Some(store) = value.store {
            message.payloads.push(
                Element::builder(if store { "store" } else { "no-store" }, ns::HINTS).build(),
            );
        }
        if let Some(oob) = value.oob {
            message.payloads.push(oob.into());
        }
        if let Some(file_metadata) = value.file_metadata {
            message.payloads.push(file_metadata.into());
        }
        if let Some(direct_invite) = value.direct_invite {
            message.payloads.push(direct_invite.into())
        }
        if let Some(mediated_invite) = value.mediated_invite {
            message.payloads.push(mediated_invite.into())
        }
        if value.quick_chat_marker {
            message
                .payloads
                .push(Element::builder("quickchat", ns::PARLOR_QUICK_CHAT).build());
        }
        if let Some(muc_user) = value.muc_user {
            message.payloads.push(muc_user.into())
        }
        if let Some(easter_egg) = value.easter_egg {
            message.payloads.push(easter_egg.into())
        }
        message
    }
}

impl Message {
    pub fn is_mam_message(&self) -> bool {
        self.archived_message.is_some()
    }

    /// True when the message carries nothing that outlives the session.
    pub fn is_ephemeral(&self) -> bool {
        self.body.is_none()
            && self.subject.is_none()
            && self.oob.is_none()
            && self.reactions.is_none()
            && self.fastening.is_none()
            && self.retraction.is_none()
            && self.replace.is_none()
    }
}
