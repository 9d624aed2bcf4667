// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;

use jid::BareJid;
use minidom::Element;
use xmpp_parsers::pubsub;
use xmpp_parsers::pubsub::PubSubPayload;

use crate::ns;
use crate::util::{parse_bool, ElementBuilderExt, ElementExt};

/// XEP-0402: PEP Native Bookmarks. The bookmark JID is the PubSub item id,
/// the `<conference/>` payload carries the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct ConferenceBookmark {
    pub jid: BareJid,
    pub conference: Conference,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Conference {
    pub autojoin: bool,
    pub name: Option<String>,
    pub nick: Option<String>,
    pub password: Option<String>,
    pub extensions: Vec<Element>,
}

impl TryFrom<Element> for Conference {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("conference", ns::BOOKMARKS2)?;

        Ok(Conference {
            // Both "true" and "1" are observed in the wild.
            autojoin: value.attr_bool("autojoin")?.unwrap_or(false),
            name: value.attr("name").map(ToString::to_string),
            nick: value
                .get_child("nick", ns::BOOKMARKS2)
                .map(|nick| nick.text()),
            password: value
                .get_child("password", ns::BOOKMARKS2)
                .map(|password| password.text()),
            extensions: value
                .get_child("extensions", ns::BOOKMARKS2)
                .map(|extensions| extensions.children().cloned().collect())
                .unwrap_or_default(),
        })
    }
}

impl From<Conference> for Element {
    fn from(value: Conference) -> Self {
        Element::builder("conference", ns::BOOKMARKS2)
            .attr_bool_opt("autojoin", value.autojoin.then_some(true))
            .attr("name", value.name)
            .append_all(
                value
                    .nick
                    .map(|nick| Element::builder("nick", ns::BOOKMARKS2).append(nick).build()),
            )
            .append_all(value.password.map(|password| {
                Element::builder("password", ns::BOOKMARKS2)
                    .append(password)
                    .build()
            }))
            .append_all((!value.extensions.is_empty()).then(|| {
                Element::builder("extensions", ns::BOOKMARKS2)
                    .append_all(value.extensions)
                    .build()
            }))
            .build()
    }
}

impl PubSubPayload for Conference {}

impl TryFrom<pubsub::Item> for ConferenceBookmark {
    type Error = anyhow::Error;

    fn try_from(item: pubsub::Item) -> Result<Self, Self::Error> {
        let Some(id) = &item.id else {
            return Err(anyhow::format_err!("Missing id in bookmark"));
        };
        let Some(payload) = &item.payload else {
            return Err(anyhow::format_err!("Missing payload in bookmark"));
        };

        Ok(ConferenceBookmark {
            jid: BareJid::from_str(&id.0)?,
            conference: Conference::try_from(payload.clone())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_deserialize_conference() -> Result<()> {
        let xml = r#"<conference xmlns='urn:xmpp:bookmarks:1' name='Council of Oberon' autojoin='1'>
            <nick>mercutio</nick>
        </conference>"#;

        let conference = Conference::try_from(Element::from_str(xml)?)?;

        assert_eq!(
            conference,
            Conference {
                autojoin: true,
                name: Some("Council of Oberon".to_string()),
                nick: Some("mercutio".to_string()),
                password: None,
                extensions: vec![],
            }
        );

        Ok(())
    }

    #[test]
    fn test_autojoin_defaults_to_false() -> Result<()> {
        let xml = "<conference xmlns='urn:xmpp:bookmarks:1' name='Ignored'/>";
        let conference = Conference::try_from(Element::from_str(xml)?)?;
        assert!(!conference.autojoin);
        Ok(())
    }
}
