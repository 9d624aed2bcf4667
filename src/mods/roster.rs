// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use jid::{BareJid, Jid};
use parking_lot::RwLock;
use xmpp_parsers::iq::Iq;
use xmpp_parsers::presence::{Presence, Show, Type as PresenceType};
use xmpp_parsers::roster::{Group, Item, Roster as RosterQuery, Subscription};

use crate::client::{IqRequestType, ModuleContext};
use crate::event::Event as SessionEvent;
use crate::mods::disco::Capabilities;
use crate::mods::muc::RoomRegistry;
use crate::mods::Module;
use crate::types::Contact;
use crate::util::RequestError;

/// The roster and presence surface of the session.
#[derive(Clone)]
pub struct Roster {
    ctx: ModuleContext,
    contacts: ContactRegistry,
    caps: Arc<Capabilities>,
    rooms: RoomRegistry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A contact was added or updated, either from the initial load or a
    /// roster push.
    Contact { contact: Contact },
    ContactRemoved { jid: BareJid },
    PresenceChanged {
        from: BareJid,
        show: Option<Show>,
        status: Option<String>,
    },
    SubscriptionRequest { from: BareJid },
    SubscriptionRequestRemoved { from: BareJid },
}

impl Default for Roster {
    fn default() -> Self {
        Roster::new(
            ContactRegistry::default(),
            Arc::new(Capabilities::default()),
            RoomRegistry::default(),
        )
    }
}

impl Roster {
    pub fn new(contacts: ContactRegistry, caps: Arc<Capabilities>, rooms: RoomRegistry) -> Self {
        Roster {
            ctx: ModuleContext::default(),
            contacts,
            caps,
            rooms,
        }
    }
}

impl Module for Roster {
    fn register_with(&mut self, context: ModuleContext) {
        let module = Roster {
            ctx: context.clone(),
            contacts: self.contacts.clone(),
            caps: self.caps.clone(),
            rooms: self.rooms.clone(),
        };
        // Roster pushes arrive as IQ sets from our own account.
        context.register_iq_callee(
            xmpp_parsers::ns::ROSTER,
            "query",
            IqRequestType::Set,
            Box::new(move |request| {
                module.handle_roster_push(&request.payload);
                Ok(None)
            }),
        );
        self.ctx = context;
    }

    fn handle_presence_stanza(&self, stanza: &Presence) -> Result<bool> {
        let Some(from) = &stanza.from else {
            return Ok(false);
        };
        let from = from.to_bare();

        match stanza.type_ {
            PresenceType::Subscribe => {
                // Occupants of group rooms send subscription requests too;
                // those never belong in the contact list.
                if self.rooms.is_muc_address(&from) {
                    return Ok(true);
                }
                self.ctx
                    .schedule_event(SessionEvent::Roster(Event::SubscriptionRequest { from }));
                Ok(true)
            }
            PresenceType::Unsubscribe | PresenceType::Unsubscribed => {
                if self.rooms.is_muc_address(&from) {
                    return Ok(true);
                }
                self.ctx.schedule_event(SessionEvent::Roster(
                    Event::SubscriptionRequestRemoved { from },
                ));
                Ok(true)
            }
            PresenceType::None | PresenceType::Unavailable => {
                let show = match stanza.type_ {
                    PresenceType::Unavailable => None,
                    _ => stanza.show.clone(),
                };
                self.ctx
                    .schedule_event(SessionEvent::Roster(Event::PresenceChanged {
                        from,
                        show,
                        status: stanza.statuses.values().next().cloned(),
                    }));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Roster {
    pub async fn load_roster(&self) -> Result<Vec<Contact>, RequestError> {
        let response = self
            .ctx
            .send_iq(Iq::from_get(
                self.ctx.generate_id(),
                RosterQuery {
                    ver: None,
                    items: vec![],
                },
            ))
            .await?
            .ok_or(RequestError::UnexpectedResponse)?;

        let roster = RosterQuery::try_from(response)?;
        let contacts = roster
            .items
            .into_iter()
            .map(Contact::from)
            .collect::<Vec<_>>();

        for contact in &contacts {
            self.contacts.upsert(contact.clone());
            self.ctx.schedule_event(SessionEvent::Roster(Event::Contact {
                contact: contact.clone(),
            }));
        }

        Ok(contacts)
    }

    /// Adds the contact to the roster and requests a mutual subscription.
    pub async fn add_contact(&self, jid: &BareJid, name: Option<&str>) -> Result<(), RequestError> {
        self.set_roster_item(jid, name, vec![]).await?;
        self.ctx.send_stanza(
            Presence::new(PresenceType::Subscribe).with_to(Jid::Bare(jid.clone())),
        )?;
        Ok(())
    }

    pub async fn rename_contact(&self, jid: &BareJid, name: &str) -> Result<(), RequestError> {
        let groups = self
            .contacts
            .get(jid)
            .map(|contact| contact.groups)
            .unwrap_or_default();
        self.set_roster_item(jid, Some(name), groups).await
    }

    pub async fn remove_contact(&self, jid: &BareJid) -> Result<(), RequestError> {
        let item = Item {
            jid: jid.clone(),
            name: None,
            subscription: Subscription::Remove,
            ask: xmpp_parsers::roster::Ask::None,
            groups: vec![],
        };
        self.ctx
            .send_iq(Iq::from_set(
                self.ctx.generate_id(),
                RosterQuery {
                    ver: None,
                    items: vec![item],
                },
            ))
            .await?;
        Ok(())
    }

    pub fn accept_subscription_request(&self, from: &BareJid) -> Result<()> {
        self.ctx
            .send_stanza(Presence::new(PresenceType::Subscribed).with_to(Jid::Bare(from.clone())))
    }

    pub fn reject_subscription_request(&self, from: &BareJid) -> Result<()> {
        self.ctx
            .send_stanza(Presence::new(PresenceType::Unsubscribed).with_to(Jid::Bare(from.clone())))
    }

    /// Broadcasts our availability. This must never feed back into the
    /// caller's presence state, otherwise auto-away loops through the state
    /// machine indefinitely.
    pub fn set_presence(&self, show: Option<Show>, status: Option<&str>) -> Result<()> {
        self.ctx.set_own_presence(crate::client::OwnPresence {
            show: show.clone(),
            status: status.map(ToString::to_string),
        });

        let mut presence = Presence::new(PresenceType::None);
        presence.show = show;
        if let Some(status) = status {
            presence.set_status("", status);
        }
        presence.add_payload(self.caps.caps_payload());
        self.ctx.send_stanza(presence)
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.snapshot()
    }

    async fn set_roster_item(
        &self,
        jid: &BareJid,
        name: Option<&str>,
        groups: Vec<String>,
    ) -> Result<(), RequestError> {
        let item = Item {
            jid: jid.clone(),
            name: name.map(ToString::to_string),
            subscription: Subscription::None,
            ask: xmpp_parsers::roster::Ask::None,
            groups: groups.into_iter().map(Group).collect(),
        };
        self.ctx
            .send_iq(Iq::from_set(
                self.ctx.generate_id(),
                RosterQuery {
                    ver: None,
                    items: vec![item],
                },
            ))
            .await?;
        Ok(())
    }

    fn handle_roster_push(&self, payload: &minidom::Element) {
        let Ok(roster) = RosterQuery::try_from(payload.clone()) else {
            return;
        };

        for item in roster.items {
            if item.subscription == Subscription::Remove {
                let jid = item.jid.clone();
                self.contacts.remove(&jid);
                self.ctx
                    .schedule_event(SessionEvent::Roster(Event::ContactRemoved { jid }));
                continue;
            }

            let contact = Contact::from(item);
            self.contacts.upsert(contact.clone());
            self.ctx
                .schedule_event(SessionEvent::Roster(Event::Contact { contact }));
        }
    }
}

/// The session's contact list, shared with the chat module so it can tell
/// strangers from known senders.
#[derive(Default, Clone)]
pub struct ContactRegistry {
    contacts: Arc<RwLock<HashMap<BareJid, Contact>>>,
}

impl ContactRegistry {
    pub fn get(&self, jid: &BareJid) -> Option<Contact> {
        self.contacts.read().get(jid).cloned()
    }

    pub fn contains(&self, jid: &BareJid) -> bool {
        self.contacts.read().contains_key(jid)
    }

    pub fn upsert(&self, contact: Contact) {
        self.contacts.write().insert(contact.jid.clone(), contact);
    }

    pub fn remove(&self, jid: &BareJid) {
        self.contacts.write().remove(jid);
    }

    pub fn snapshot(&self) -> Vec<Contact> {
        self.contacts.read().values().cloned().collect()
    }
}
