// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use jid::{BareJid, Jid};
use minidom::Element;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use xmpp_parsers::iq::Iq;
use xmpp_parsers::pubsub::PubSubEvent;

use crate::client::ModuleContext;
use crate::event::Event as SessionEvent;
use crate::mods::pubsub::private_publish_options;
use crate::mods::Module;
use crate::ns;
use crate::stanza::avatar;
use crate::stanza::vcard::VCardTemp;
use crate::util::RequestError;

/// Profile data: avatars (XEP-0084 with a XEP-0054 fallback), nicknames
/// (XEP-0172), private appearance settings (XEP-0223) and password changes
/// (XEP-0077).
#[derive(Default, Clone)]
pub struct Profile {
    ctx: ModuleContext,
    /// Entities known to have no avatar at all, so repeat lookups
    /// short-circuit.
    no_avatar_cache: Arc<RwLock<HashSet<BareJid>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Avatar metadata changed for a contact (or ourselves).
    AvatarChanged {
        from: BareJid,
        metadata: avatar::Metadata,
    },
    NicknameChanged { from: BareJid, nickname: String },
}

/// Base64-encoded avatar image data along with its media type.
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarData {
    pub base64: String,
    pub media_type: Option<String>,
}

impl Module for Profile {
    fn register_with(&mut self, context: ModuleContext) {
        self.ctx = context
    }

    fn handle_pubsub_event(&self, from: &Jid, event: &PubSubEvent) -> Result<bool> {
        let PubSubEvent::PublishedItems { node, items } = event else {
            return Ok(false);
        };

        match &node.0 {
            _ if node.0 == ns::AVATAR_METADATA => {
                let Some(item) = items.first() else {
                    return Ok(false);
                };
                let Some(payload) = &item.payload else {
                    return Ok(false);
                };
                let metadata = avatar::Metadata::try_from(payload.clone())?;
                self.no_avatar_cache.write().remove(&from.to_bare());
                self.ctx
                    .schedule_event(SessionEvent::Profile(Event::AvatarChanged {
                        from: from.to_bare(),
                        metadata,
                    }));
                Ok(true)
            }
            _ if node.0 == ns::NICK => {
                let Some(item) = items.first() else {
                    return Ok(false);
                };
                let Some(payload) = &item.payload else {
                    return Ok(false);
                };
                let nickname = payload.text();
                self.ctx
                    .schedule_event(SessionEvent::Profile(Event::NicknameChanged {
                        from: from.to_bare(),
                        nickname,
                    }));
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl Profile {
    /// Publishes an avatar to the XEP-0084 data and metadata nodes. The
    /// item id is the SHA1 of the image data.
    pub async fn publish_avatar(
        &self,
        image_data: &[u8],
        media_type: impl Into<String>,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<avatar::ImageId, RequestError> {
        let image_id: avatar::ImageId = format!("{:x}", Sha1::digest(image_data)).into();

        let data = avatar::Data {
            data: general_purpose::STANDARD.encode(image_data),
        };
        self.publish_pubsub_item(ns::AVATAR_DATA, image_id.to_string(), data.into(), false)
            .await?;

        let metadata = avatar::Metadata {
            infos: vec![avatar::Info {
                bytes: image_data.len() as u32,
                width,
                height,
                id: image_id.clone(),
                r#type: media_type.into(),
                url: None,
            }],
        };
        self.publish_pubsub_item(
            ns::AVATAR_METADATA,
            image_id.to_string(),
            metadata.into(),
            false,
        )
        .await?;

        Ok(image_id)
    }

    pub async fn load_avatar_metadata(
        &self,
        from: &BareJid,
    ) -> Result<Option<avatar::Metadata>, RequestError> {
        if self.has_no_avatar(from) {
            return Ok(None);
        }

        let result = self
            .ctx
            .query_pubsub_node(Some(from.clone()), ns::AVATAR_METADATA, vec![], Some(1))
            .await;

        let items = match result {
            Ok(items) => items.unwrap_or_default(),
            Err(err) if err.is_item_not_found_err() => {
                self.no_avatar_cache.write().insert(from.clone());
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let metadata =
            first_item_payload::<avatar::Metadata>(items, "metadata", ns::AVATAR_METADATA)?;
        if metadata.is_none() {
            self.no_avatar_cache.write().insert(from.clone());
        }
        Ok(metadata)
    }

    /// Loads the actual image bytes for a previously seen metadata id.
    pub async fn load_avatar_image(
        &self,
        from: &BareJid,
        id: &avatar::ImageId,
    ) -> Result<Option<AvatarData>, RequestError> {
        let items = self
            .ctx
            .query_pubsub_node(
                Some(from.clone()),
                ns::AVATAR_DATA,
                vec![id.to_string()],
                None,
            )
            .await?
            .unwrap_or_default();

        Ok(
            first_item_payload::<avatar::Data>(items, "data", ns::AVATAR_DATA)?.map(|data| {
                AvatarData {
                    base64: data.data,
                    media_type: None,
                }
            }),
        )
    }

    /// vCard-temp fallback for entities that don't publish XEP-0084
    /// avatars, including MUC rooms themselves.
    pub async fn load_vcard_avatar(
        &self,
        jid: impl Into<Jid>,
    ) -> Result<Option<AvatarData>, RequestError> {
        let jid = jid.into();

        if self.has_no_avatar(&jid.to_bare()) {
            return Ok(None);
        }

        let result = self
            .ctx
            .send_iq(
                Iq::from_get(self.ctx.generate_id(), VCardTemp::default()).with_to(jid.clone()),
            )
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) if err.is_item_not_found_err() => {
                self.no_avatar_cache.write().insert(jid.to_bare());
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let Some(response) = response else {
            return Ok(None);
        };

        let vcard = VCardTemp::try_from(response)?;
        let Some(photo) = vcard.photo else {
            self.no_avatar_cache.write().insert(jid.to_bare());
            return Ok(None);
        };

        Ok(Some(AvatarData {
            base64: photo.binval,
            media_type: photo.media_type,
        }))
    }

    /// XEP-0398: loads an occupant's avatar through their real JID when the
    /// room discloses it, else through the in-room address.
    pub async fn load_occupant_avatar(
        &self,
        room_jid: &BareJid,
        nick: &str,
        real_jid: Option<&BareJid>,
    ) -> Result<Option<AvatarData>, RequestError> {
        match real_jid {
            Some(real_jid) => self.load_vcard_avatar(Jid::Bare(real_jid.clone())).await,
            None => {
                let occupant_jid: Jid = format!("{room_jid}/{nick}")
                    .parse()
                    .map_err(|err: jid::Error| RequestError::Generic {
                        msg: err.to_string(),
                    })?;
                self.load_vcard_avatar(occupant_jid).await
            }
        }
    }

    pub fn has_no_avatar(&self, jid: &BareJid) -> bool {
        self.no_avatar_cache.read().contains(jid)
    }

    /// XEP-0172: publishes the user nickname.
    pub async fn publish_nickname(&self, nickname: &str) -> Result<(), RequestError> {
        let payload = Element::builder("nick", ns::NICK).append(nickname).build();
        self.publish_pubsub_item(ns::NICK, self.ctx.bare_jid().to_string(), payload, false)
            .await
    }

    pub async fn retract_nickname(&self) -> Result<(), RequestError> {
        let iq = Iq::from_set(
            self.ctx.generate_id(),
            xmpp_parsers::pubsub::PubSub::Retract(xmpp_parsers::pubsub::pubsub::Retract {
                node: xmpp_parsers::pubsub::NodeName(ns::NICK.to_string()),
                notify: xmpp_parsers::pubsub::pubsub::Notify::True,
                items: vec![xmpp_parsers::pubsub::pubsub::Item(xmpp_parsers::pubsub::Item {
                    id: Some(xmpp_parsers::pubsub::ItemId(self.ctx.bare_jid().to_string())),
                    publisher: None,
                    payload: None,
                })],
            }),
        );
        self.ctx.send_iq(iq).await?;
        Ok(())
    }

    /// XEP-0223: stores a payload in a private, whitelisted PEP node. Used
    /// for appearance settings.
    pub async fn publish_private(
        &self,
        node: impl Into<String>,
        item_id: impl Into<String>,
        payload: Element,
    ) -> Result<(), RequestError> {
        self.publish_pubsub_item(node, item_id, payload, true).await
    }

    pub async fn load_private(
        &self,
        node: impl Into<String>,
    ) -> Result<Vec<xmpp_parsers::pubsub::Item>, RequestError> {
        Ok(self
            .ctx
            .query_pubsub_node(None, node, vec![], None)
            .await?
            .unwrap_or_default())
    }

    /// XEP-0077: in-band password change on the current server.
    pub async fn change_password(&self, new_password: &str) -> Result<(), RequestError> {
        let username = self
            .ctx
            .bare_jid()
            .node_str()
            .map(ToString::to_string)
            .ok_or(RequestError::Generic {
                msg: "Missing node in own JID".to_string(),
            })?;

        let query = Element::builder("query", ns::REGISTER)
            .append(Element::builder("username", ns::REGISTER).append(username).build())
            .append(
                Element::builder("password", ns::REGISTER)
                    .append(new_password)
                    .build(),
            )
            .build();

        let iq = Iq {
            from: None,
            to: Some(Jid::Bare(self.ctx.server_jid())),
            id: self.ctx.generate_id(),
            payload: xmpp_parsers::iq::IqType::Set(query),
        };
        self.ctx.send_iq(iq).await?;
        Ok(())
    }

    async fn publish_pubsub_item(
        &self,
        node: impl Into<String>,
        item_id: impl Into<String>,
        payload: Element,
        private: bool,
    ) -> Result<(), RequestError> {
        let iq = Iq::from_set(
            self.ctx.generate_id(),
            xmpp_parsers::pubsub::PubSub::Publish {
                publish: xmpp_parsers::pubsub::pubsub::Publish {
                    node: xmpp_parsers::pubsub::NodeName(node.into()),
                    items: vec![xmpp_parsers::pubsub::pubsub::Item(xmpp_parsers::pubsub::Item {
                        id: Some(xmpp_parsers::pubsub::ItemId(item_id.into())),
                        publisher: None,
                        payload: Some(payload),
                    })],
                },
                publish_options: private.then(private_publish_options),
            },
        );
        self.ctx.send_iq(iq).await?;
        Ok(())
    }
}

/// Picks the first item whose payload matches the given element out of a
/// PubSub response.
fn first_item_payload<T: TryFrom<Element>>(
    items: Vec<xmpp_parsers::pubsub::Item>,
    name: &str,
    ns: &str,
) -> Result<Option<T>, T::Error> {
    for item in items {
        let Some(payload) = item.payload else {
            continue;
        };
        if !payload.is(name, ns) {
            continue;
        }
        return T::try_from(payload).map(Some);
    }
    Ok(None)
}
