// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;
use xmpp_parsers::iq::{IqGetPayload, IqSetPayload};
use xmpp_parsers::presence::PresencePayload;

use crate::ns;
use crate::util::ElementExt;

/// XEP-0054: vcard-temp. Only the fields the session surfaces are modelled;
/// everything else is passed through untouched in `extra`.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct VCardTemp {
    pub full_name: Option<String>,
    pub nickname: Option<String>,
    /// Base64 `BINVAL` of the embedded photo, with its media type.
    pub photo: Option<Photo>,
    pub extra: Vec<Element>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Photo {
    pub media_type: Option<String>,
    pub binval: String,
}

/// XEP-0153: the `<x xmlns='vcard-temp:x:update'/>` presence extension
/// carrying the SHA1 hash of the current avatar.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct VCardUpdate {
    pub photo_hash: Option<String>,
}

impl TryFrom<Element> for VCardTemp {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("vCard", ns::VCARD)?;

        let mut vcard = VCardTemp::default();

        for child in value.children() {
            match child.name() {
                "FN" => vcard.full_name = Some(child.text()),
                "NICKNAME" => vcard.nickname = Some(child.text()),
                "PHOTO" => {
                    let binval = child
                        .get_child("BINVAL", ns::VCARD)
                        .map(|binval| binval.text());
                    if let Some(binval) = binval {
                        vcard.photo = Some(Photo {
                            media_type: child
                                .get_child("TYPE", ns::VCARD)
                                .map(|type_| type_.text()),
                            binval,
                        });
                    }
                }
                _ => vcard.extra.push(child.clone()),
            }
        }

        Ok(vcard)
    }
}

impl From<VCardTemp> for Element {
    fn from(value: VCardTemp) -> Self {
        Element::builder("vCard", ns::VCARD)
            .append_all(
                value
                    .full_name
                    .map(|fn_| Element::builder("FN", ns::VCARD).append(fn_).build()),
            )
            .append_all(
                value
                    .nickname
                    .map(|nick| Element::builder("NICKNAME", ns::VCARD).append(nick).build()),
            )
            .append_all(value.photo.map(|photo| {
                Element::builder("PHOTO", ns::VCARD)
                    .append_all(
                        photo
                            .media_type
                            .map(|t| Element::builder("TYPE", ns::VCARD).append(t).build()),
                    )
                    .append(
                        Element::builder("BINVAL", ns::VCARD)
                            .append(photo.binval)
                            .build(),
                    )
                    .build()
            }))
            .append_all(value.extra)
            .build()
    }
}

impl IqGetPayload for VCardTemp {}
impl IqSetPayload for VCardTemp {}

impl TryFrom<Element> for VCardUpdate {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("x", ns::VCARD_UPDATE)?;

        Ok(VCardUpdate {
            photo_hash: value
                .get_child("photo", ns::VCARD_UPDATE)
                .map(|photo| photo.text()),
        })
    }
}

impl From<VCardUpdate> for Element {
    fn from(value: VCardUpdate) -> Self {
        Element::builder("x", ns::VCARD_UPDATE)
            .append_all(
                value
                    .photo_hash
                    .map(|hash| Element::builder("photo", ns::VCARD_UPDATE).append(hash).build()),
            )
            .build()
    }
}

impl PresencePayload for VCardUpdate {}
