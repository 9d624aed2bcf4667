// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::any::Any;

use anyhow::Result;
use jid::Jid;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::presence::Presence;
use xmpp_parsers::pubsub::PubSubEvent;

pub use chat::Chat;
pub use disco::Disco;
pub use mam::MAM;
pub use muc::MUC;
pub use ping::Ping;
pub use profile::Profile;
pub use pubsub::PubSub;
pub use roster::Roster;

use crate::client::ModuleContext;
use crate::stanza::{Message, PubSubMessage};
use crate::util::XMPPElement;

pub mod chat;
pub mod disco;
pub mod mam;
pub mod muc;
pub mod ping;
pub mod profile;
pub mod pubsub;
pub mod roster;

/// A feature module. Inbound stanzas are offered to modules in registration
/// order; returning `Ok(true)` claims the stanza and stops the chain.
pub trait Module: Any + Send + Sync {
    fn register_with(&mut self, context: ModuleContext);

    fn handle_connect(&self) -> Result<()> {
        Ok(())
    }

    fn handle_element(&self, element: &XMPPElement) -> Result<bool> {
        match element {
            XMPPElement::Presence(ref p) => self.handle_presence_stanza(p),
            XMPPElement::Message(ref m) => self.handle_message_stanza(m),
            XMPPElement::IQ(ref i) => self.handle_iq_stanza(i),
            XMPPElement::PubSubMessage(ref m) => self.handle_pubsub_message(m),
        }
    }

    fn handle_pubsub_message(&self, pubsub: &PubSubMessage) -> Result<bool> {
        let mut handled = false;
        for event in pubsub.events.iter() {
            handled |= self.handle_pubsub_event(&pubsub.from, event)?;
        }
        Ok(handled)
    }

    fn handle_presence_stanza(&self, _stanza: &Presence) -> Result<bool> {
        Ok(false)
    }
    fn handle_message_stanza(&self, _stanza: &Message) -> Result<bool> {
        Ok(false)
    }
    fn handle_iq_stanza(&self, _stanza: &Iq) -> Result<bool> {
        Ok(false)
    }
    fn handle_pubsub_event(&self, _from: &Jid, _event: &PubSubEvent) -> Result<bool> {
        Ok(false)
    }
}

pub trait AnyModule: Module {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Module> AnyModule for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
