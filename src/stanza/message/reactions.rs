// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;

use crate::ns;
use crate::stanza::message;
use crate::util::id_string_macro::id_string;
use crate::util::ElementExt;

id_string!(Emoji);

/// XEP-0444: Message Reactions
#[derive(Debug, PartialEq, Clone)]
pub struct Reactions {
    pub id: message::Id,
    pub reactions: Vec<Emoji>,
}

impl TryFrom<Element> for Reactions {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("reactions", ns::REACTIONS)?;

        Ok(Reactions {
            id: value.attr_req("id")?.into(),
            reactions: value
                .children()
                .filter(|child| child.is("reaction", ns::REACTIONS))
                .map(|child| Emoji::from(child.text()))
                .collect(),
        })
    }
}

impl From<Reactions> for Element {
    fn from(value: Reactions) -> Self {
        Element::builder("reactions", ns::REACTIONS)
            .attr("id", value.id)
            .append_all(value.reactions.into_iter().map(|emoji| {
                Element::builder("reaction", ns::REACTIONS)
                    .append(emoji.into_inner())
                    .build()
            }))
            .build()
    }
}
