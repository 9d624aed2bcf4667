// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use crate::{client, mods};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Client(client::Event),
    SM(client::SmEvent),
    Chat(mods::chat::Event),
    MUC(mods::muc::Event),
    MAM(mods::mam::Event),
    Roster(mods::roster::Event),
    Profile(mods::profile::Event),
    Disco(mods::disco::Event),
}
