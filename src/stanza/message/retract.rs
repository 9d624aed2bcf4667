// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;

use crate::ns;
use crate::stanza::message;
use crate::stanza::message::fasten;
use crate::util::ElementExt;

/// XEP-0424: Message Retraction. The payload form lives inside an
/// `<apply-to/>`; the standalone form carries the target id itself.
#[derive(Default)]
pub struct Retract {}

/// `<retract id='…'/>` as sent by clients that don't wrap the retraction in
/// a fastening.
#[derive(Debug, PartialEq, Clone)]
pub struct RetractWithId {
    pub id: message::Id,
}

impl From<Retract> for Element {
    fn from(_value: Retract) -> Self {
        Element::builder("retract", ns::RETRACT).build()
    }
}

impl TryFrom<Element> for Retract {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("retract", ns::RETRACT)?;
        Ok(Retract::default())
    }
}

impl fasten::ApplyToPayload for Retract {}

impl From<RetractWithId> for Element {
    fn from(value: RetractWithId) -> Self {
        Element::builder("retract", ns::RETRACT)
            .attr("id", value.id)
            .build()
    }
}

impl TryFrom<Element> for RetractWithId {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("retract", ns::RETRACT)?;
        Ok(RetractWithId {
            id: value.attr_req("id")?.into(),
        })
    }
}
