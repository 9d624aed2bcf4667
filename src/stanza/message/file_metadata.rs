// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::util::ElementExt;

/// XEP-0446: File metadata element
#[derive(Debug, PartialEq, Clone, Default)]
pub struct FileMetadata {
    pub name: Option<String>,
    pub media_type: Option<String>,
    pub size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TryFrom<Element> for FileMetadata {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("file", ns::FILE_METADATA)?;

        let mut metadata = FileMetadata::default();

        for child in value.children() {
            match child.name() {
                "name" => metadata.name = Some(child.text()),
                "media-type" => metadata.media_type = Some(child.text()),
                "size" => metadata.size = Some(child.text().parse()?),
                "width" => metadata.width = Some(child.text().parse()?),
                "height" => metadata.height = Some(child.text().parse()?),
                _ => (),
            }
        }

        Ok(metadata)
    }
}

impl From<FileMetadata> for Element {
    fn from(value: FileMetadata) -> Self {
        let text_node = |name: &str, value: Option<String>| {
            value.map(|value| Element::builder(name, ns::FILE_METADATA).append(value).build())
        };

        Element::builder("file", ns::FILE_METADATA)
            .append_all(text_node("media-type", value.media_type))
            .append_all(text_node("name", value.name))
            .append_all(text_node("size", value.size.map(|s| s.to_string())))
            .append_all(text_node("width", value.width.map(|w| w.to_string())))
            .append_all(text_node("height", value.height.map(|h| h.to_string())))
            .build()
    }
}

impl MessagePayload for FileMetadata {}
