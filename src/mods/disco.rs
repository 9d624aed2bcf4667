// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use jid::Jid;
use parking_lot::RwLock;
use sha1::{Digest, Sha1};
use xmpp_parsers::disco::{DiscoInfoQuery, DiscoInfoResult, DiscoItemsQuery, DiscoItemsResult};
use xmpp_parsers::hashes::{Algo, Hash};
use xmpp_parsers::iq::Iq;

use crate::client::{IqRequestType, ModuleContext, DISCO_REQUEST_TIMEOUT};
use crate::event::Event as SessionEvent;
use crate::mods::Module;
use crate::ns;
use crate::util::RequestError;

/// XEP-0030 & XEP-0115: Service Discovery and Entity Capabilities
#[derive(Clone)]
pub struct Disco {
    ctx: ModuleContext,
    caps: Arc<Capabilities>,
    server_info: Arc<RwLock<Option<ServerInfo>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    /// Sorted ascending.
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ServerInfo { info: ServerInfo },
}

impl Default for Disco {
    fn default() -> Self {
        Disco::new(Arc::new(Capabilities::default()))
    }
}

impl Disco {
    pub fn new(caps: Arc<Capabilities>) -> Self {
        Disco {
            ctx: ModuleContext::default(),
            caps,
            server_info: Arc::new(RwLock::new(None)),
        }
    }
}

impl Module for Disco {
    fn register_with(&mut self, context: ModuleContext) {
        let caps = self.caps.clone();
        // The dispatcher echoes the request's node attribute back onto the
        // response payload.
        context.register_iq_callee(
            ns::DISCO_INFO,
            "query",
            IqRequestType::Get,
            Box::new(move |_request| Ok(Some(DiscoInfoResult::from(&*caps).into()))),
        );
        self.ctx = context;
    }
}

impl Disco {
    /// Queries the server's disco#info on a new session and caches the
    /// sorted feature list.
    pub async fn load_server_info(&self) -> Result<ServerInfo, RequestError> {
        let result = self
            .query_disco_info(self.ctx.server_jid(), None)
            .await?;

        let mut features = result
            .features
            .into_iter()
            .map(|feature| feature.var)
            .collect::<Vec<_>>();
        features.sort();

        let info = ServerInfo { features };
        *self.server_info.write() = Some(info.clone());

        self.ctx
            .schedule_event(SessionEvent::Disco(Event::ServerInfo { info: info.clone() }));

        Ok(info)
    }

    pub fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.read().clone()
    }

    pub fn server_supports(&self, feature: &str) -> bool {
        self.server_info
            .read()
            .as_ref()
            .map(|info| info.features.binary_search_by(|f| f.as_str().cmp(feature)).is_ok())
            .unwrap_or(false)
    }

    pub async fn query_disco_info(
        &self,
        from: impl Into<Jid>,
        node: Option<String>,
    ) -> Result<DiscoInfoResult, RequestError> {
        let response = self
            .ctx
            .send_iq_with_timeout(
                Iq::from_get(self.ctx.generate_id(), DiscoInfoQuery { node }).with_to(from.into()),
                DISCO_REQUEST_TIMEOUT,
            )
            .await?
            .ok_or(RequestError::UnexpectedResponse)?;

        Ok(DiscoInfoResult::try_from(response)?)
    }

    pub async fn query_disco_items(
        &self,
        from: impl Into<Jid>,
        node: Option<String>,
    ) -> Result<DiscoItemsResult, RequestError> {
        let response = self
            .ctx
            .send_iq_with_timeout(
                Iq::from_get(self.ctx.generate_id(), DiscoItemsQuery { node })
                    .with_to(from.into()),
                DISCO_REQUEST_TIMEOUT,
            )
            .await?
            .ok_or(RequestError::UnexpectedResponse)?;

        Ok(DiscoItemsResult::try_from(response)?)
    }
}

/// Our own identity and feature set, with the precomputed XEP-0115 ver
/// hash.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub node: String,
    pub client_name: String,
    pub features: Vec<String>,
    pub sha1_ver_hash: String,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::new(
            "Parlor",
            "https://parlor.im",
            [
                ns::AVATAR_METADATA_NOTIFY,
                ns::BOOKMARKS2_NOTIFY,
                ns::CAPS,
                ns::CARBONS,
                ns::CHATSTATES,
                ns::DISCO_INFO,
                ns::FALLBACK,
                ns::FASTEN,
                ns::MESSAGE_CORRECT,
                ns::NICK_NOTIFY,
                ns::PING,
                ns::REACTIONS,
                ns::REFERENCE,
                ns::REPLY,
                ns::RETRACT,
            ],
        )
    }
}

impl Capabilities {
    pub fn new<'a>(
        client_name: impl Into<String>,
        node: impl Into<String>,
        features: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let client_name = client_name.into();
        let mut features = features
            .into_iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        features.sort();

        let sha1_ver_hash = Self::sha1_ver_hash(&client_name, &features);

        Capabilities {
            node: node.into(),
            client_name,
            features,
            sha1_ver_hash,
        }
    }

    pub fn caps_payload(&self) -> xmpp_parsers::caps::Caps {
        xmpp_parsers::caps::Caps::new(
            self.node.clone(),
            Hash {
                algo: Algo::Sha_1,
                hash: self.sha1_ver_hash.clone().into_bytes(),
            },
        )
    }

    // https://xmpp.org/extensions/xep-0115.html#ver-gen
    fn sha1_ver_hash(client_name: &str, sorted_features: &[String]) -> String {
        let mut input = format!("client/pc//{client_name}<").into_bytes();
        for feature in sorted_features {
            input.extend(feature.as_bytes());
            input.extend(b"<");
        }

        let mut hasher = Sha1::new();
        hasher.update(input);
        general_purpose::STANDARD.encode(hasher.finalize())
    }
}

impl From<&Capabilities> for DiscoInfoResult {
    fn from(value: &Capabilities) -> Self {
        DiscoInfoResult {
            node: None,
            identities: vec![xmpp_parsers::disco::Identity {
                category: "client".to_string(),
                type_: "pc".to_string(),
                lang: None,
                name: Some(value.client_name.clone()),
            }],
            features: value
                .features
                .iter()
                .map(|var| xmpp_parsers::disco::Feature { var: var.clone() })
                .collect(),
            extensions: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_features_are_sorted() {
        let caps = Capabilities::default();
        let mut sorted = caps.features.clone();
        sorted.sort();
        assert_eq!(caps.features, sorted);
    }
}
