// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use avatar::Avatar;
pub use conference_bookmark::ConferenceBookmark;
pub use message::Message;
pub use pubsub::PubSubMessage;
pub use references::Reference;
pub use vcard::VCardTemp;

pub mod avatar;
pub mod conference_bookmark;
pub mod mam;
pub mod message;
pub mod muc;
pub mod ns;
pub mod pubsub;
pub mod references;
pub mod sm;
pub mod vcard;
