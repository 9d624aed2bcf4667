// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use xmpp_parsers::message::MessageType;

pub use fallback::Fallback;
pub use forwarding::Forwarded;
pub use message::{ChatState, Id, Message};
pub use reactions::{Emoji, Reactions};

pub mod carbons;
pub mod easter_egg;
mod fallback;
pub mod fasten;
pub mod file_metadata;
mod forwarding;
mod message;
pub mod oob;
mod reactions;
pub mod reply;
pub mod retract;
pub mod stanza_id;
