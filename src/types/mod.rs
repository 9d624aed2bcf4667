// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use bookmark::Bookmark;
pub use contact::{Contact, Subscription};
pub use message::{Attachment, Message, MessageModifier, RoomMessage};
pub use room::{Occupant, Room, RoomState};

mod bookmark;
mod contact;
mod message;
mod room;
