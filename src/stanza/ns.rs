// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use xmpp_parsers::ns::*;

// See all at: https://xmpp.org/registrar/namespaces.html

/// XEP-0424: Message Retraction
pub const RETRACT: &str = "urn:xmpp:message-retract:0";

/// XEP-0422: Message Fastening
pub const FASTEN: &str = "urn:xmpp:fasten:0";

/// XEP-0203: Delayed Delivery
pub const DELAY: &str = "urn:xmpp:delay";

/// XEP-0428: Fallback Indication
pub const FALLBACK: &str = "urn:xmpp:fallback:0";

/// XEP-0334: Message Processing Hints
pub const HINTS: &str = "urn:xmpp:hints";

/// XEP-0444: Message Reactions
pub const REACTIONS: &str = "urn:xmpp:reactions:0";

/// XEP-0045: Multi-User Chat
pub const MUC_OWNER: &str = "http://jabber.org/protocol/muc#owner";

/// XEP-0045: Multi-User Chat
pub const MUC_ADMIN: &str = "http://jabber.org/protocol/muc#admin";

/// XEP-0045: Multi-User Chat
pub const MUC_ROOMCONFIG: &str = "http://jabber.org/protocol/muc#roomconfig";

/// XEP-0045: Multi-User Chat
pub const MUC_ROOMINFO: &str = "http://jabber.org/protocol/muc#roominfo";

/// XEP-0249: Direct MUC Invitations
pub const DIRECT_MUC_INVITATIONS: &str = "jabber:x:conference";

/// XEP-0066: Out of Band Data
pub const OUT_OF_BAND_DATA: &str = "jabber:x:oob";

/// XEP-0372: References
pub const REFERENCE: &str = "urn:xmpp:reference:0";

/// XEP-0402: PEP Native Bookmarks
pub const BOOKMARKS2: &str = "urn:xmpp:bookmarks:1";

/// XEP-0461: Message Replies
pub const REPLY: &str = "urn:xmpp:reply:0";

/// XEP-0446: File metadata element
pub const FILE_METADATA: &str = "urn:xmpp:file:metadata:0";

/// XEP-0198: Stream Management
pub const SM: &str = "urn:xmpp:sm:3";

/// XEP-0156: Discovering Alternative XMPP Connection Methods
pub const HOST_META: &str = "urn:xmpp:alt-connections:websocket";

/// XEP-0153: vCard-Based Avatars
pub const VCARD_UPDATE: &str = "vcard-temp:x:update";

/// XEP-0054: vcard-temp
pub const VCARD: &str = "vcard-temp";

/// XEP-0317: Hats
pub const HATS: &str = "urn:xmpp:hats:0";

/// XEP-0393: Message Styling
pub const STYLING: &str = "urn:xmpp:styling:0";

pub const MAM2: &str = "urn:xmpp:mam:2";
pub const MAM2_EXTENDED: &str = "urn:xmpp:mam:2#extended";

// PEP notification subscriptions advertised via entity caps.
pub const AVATAR_METADATA_NOTIFY: &str = "urn:xmpp:avatar:metadata+notify";
pub const BOOKMARKS2_NOTIFY: &str = "urn:xmpp:bookmarks:1+notify";
pub const NICK_NOTIFY: &str = "http://jabber.org/protocol/nick+notify";

/// Ad-hoc animation marker carried next to a message body.
pub const PARLOR_EASTER_EGG: &str = "https://parlor.im/protocol/easter-egg";

/// Marker distinguishing ad-hoc quick chats from regular channels.
pub const PARLOR_QUICK_CHAT: &str = "https://parlor.im/protocol/quick-chat";

/// Per-room settings stored inside bookmark extensions.
pub const PARLOR_ROOM_SETTINGS: &str = "https://parlor.im/protocol/room-settings";
