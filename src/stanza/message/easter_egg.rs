// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::util::ElementExt;

/// A full-screen animation trigger attached to a message. Purely ephemeral,
/// never persisted.
#[derive(Debug, PartialEq, Clone)]
pub struct EasterEgg {
    pub animation: String,
}

impl TryFrom<Element> for EasterEgg {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("easter-egg", ns::PARLOR_EASTER_EGG)?;

        Ok(EasterEgg {
            animation: value.attr_req("animation")?.to_string(),
        })
    }
}

impl From<EasterEgg> for Element {
    fn from(value: EasterEgg) -> Self {
        Element::builder("easter-egg", ns::PARLOR_EASTER_EGG)
            .attr("animation", value.animation)
            .build()
    }
}

impl MessagePayload for EasterEgg {}
