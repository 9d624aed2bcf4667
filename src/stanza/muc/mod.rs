// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

pub use direct_invite::DirectInvite;
pub use hats::{Hat, Hats};
pub use mediated_invite::{Invite, MediatedInvite};
pub use muc_user::{presence_error, MucUser};
pub use query::Query;

mod direct_invite;
mod hats;
mod mediated_invite;
mod muc_user;
pub mod query;
