// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::util::ElementExt;

/// XEP-0066: Out of Band Data
#[derive(Debug, PartialEq, Clone)]
pub struct Oob {
    pub url: String,
    pub desc: Option<String>,
}

impl TryFrom<Element> for Oob {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("x", ns::OUT_OF_BAND_DATA)?;

        Ok(Oob {
            url: value
                .get_child("url", ns::OUT_OF_BAND_DATA)
                .ok_or(anyhow::format_err!("Missing url in oob element"))?
                .text(),
            desc: value
                .get_child("desc", ns::OUT_OF_BAND_DATA)
                .map(|desc| desc.text()),
        })
    }
}

impl From<Oob> for Element {
    fn from(value: Oob) -> Self {
        Element::builder("x", ns::OUT_OF_BAND_DATA)
            .append(
                Element::builder("url", ns::OUT_OF_BAND_DATA)
                    .append(value.url)
                    .build(),
            )
            .append_all(value.desc.map(|desc| {
                Element::builder("desc", ns::OUT_OF_BAND_DATA)
                    .append(desc)
                    .build()
            }))
            .build()
    }
}

impl MessagePayload for Oob {}
