// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::stanza::message;
use crate::util::ElementExt;

/// XEP-0422: Message Fastening
#[derive(Debug, PartialEq, Clone)]
pub struct ApplyTo {
    pub id: message::Id,
    pub clear: bool,
    pub payloads: Vec<Element>,
}

impl ApplyTo {
    pub fn new(id: message::Id) -> Self {
        ApplyTo {
            id,
            clear: false,
            payloads: vec![],
        }
    }

    pub fn with_payload<P: ApplyToPayload>(mut self, payload: P) -> Self {
        self.payloads.push(payload.into());
        self
    }

    pub fn retract(&self) -> bool {
        self.payloads
            .iter()
            .any(|p| p.is("retract", ns::RETRACT) || p.is("retracted", ns::RETRACT))
    }

    /// Link-preview metadata fastened to an earlier message, if any.
    pub fn link_preview(&self) -> Option<LinkPreview> {
        let preview = LinkPreview::from_meta_elements(self.payloads.iter());
        (!preview.is_empty()).then_some(preview)
    }
}

impl From<ApplyTo> for Element {
    fn from(value: ApplyTo) -> Self {
        Element::builder("apply-to", ns::FASTEN)
            .attr("id", value.id)
            .attr("clear", if value.clear { Some("true") } else { None })
            .append_all(value.payloads)
            .build()
    }
}

impl TryFrom<Element> for ApplyTo {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("apply-to", ns::FASTEN)?;

        Ok(ApplyTo {
            id: value.attr_req("id")?.into(),
            clear: value
                .attr("clear")
                .map(|value| value.to_lowercase() == "true")
                .unwrap_or(false),
            payloads: value.children().cloned().collect(),
        })
    }
}

impl MessagePayload for ApplyTo {}

pub trait ApplyToPayload: TryFrom<Element> + Into<Element> {}

/// Open Graph metadata fastened to a message carrying a URL, rendered as a
/// link preview.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct LinkPreview {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub site_name: Option<String>,
}

impl LinkPreview {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.title.is_none() && self.description.is_none()
    }

    fn from_meta_elements<'a>(elements: impl Iterator<Item = &'a Element>) -> Self {
        let mut preview = LinkPreview::default();

        for element in elements {
            if element.name() != "meta" {
                continue;
            }
            let (Some(property), Some(content)) = (element.attr("property"), element.attr("content"))
            else {
                continue;
            };
            match property {
                "og:url" => preview.url = Some(content.to_string()),
                "og:title" => preview.title = Some(content.to_string()),
                "og:description" => preview.description = Some(content.to_string()),
                "og:image" => preview.image = Some(content.to_string()),
                "og:site_name" => preview.site_name = Some(content.to_string()),
                _ => (),
            }
        }

        preview
    }
}
