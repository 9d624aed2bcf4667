// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::presence::PresencePayload;

use crate::ns;
use crate::util::ElementExt;

/// XEP-0317: Hats
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Hats {
    pub hats: Vec<Hat>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Hat {
    pub uri: String,
    pub title: Option<String>,
}

impl TryFrom<Element> for Hats {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("hats", ns::HATS)?;

        Ok(Hats {
            hats: value
                .children()
                .filter(|child| child.is("hat", ns::HATS))
                .map(|child| {
                    Ok(Hat {
                        uri: child.attr_req("uri")?.to_string(),
                        title: child.attr("title").map(ToString::to_string),
                    })
                })
                .collect::<Result<Vec<_>, anyhow::Error>>()?,
        })
    }
}

impl From<Hats> for Element {
    fn from(value: Hats) -> Self {
        Element::builder("hats", ns::HATS)
            .append_all(value.hats.into_iter().map(|hat| {
                Element::builder("hat", ns::HATS)
                    .attr("uri", hat.uri)
                    .attr("title", hat.title)
                    .build()
            }))
            .build()
    }
}

impl PresencePayload for Hats {}
