// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::fmt::{Display, Formatter};

use minidom::Element;
use xmpp_parsers::iq::{IqGetPayload, IqSetPayload};

use crate::ns;
use crate::util::ElementExt;

/// An owner or admin query as used for room configuration.
/// https://xmpp.org/extensions/xep-0045.html#roomconfig
#[derive(Debug, PartialEq, Clone)]
pub struct Query {
    pub role: Role,
    pub payloads: Vec<Element>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Role {
    Owner,
    Admin,
}

impl Query {
    pub fn new(role: Role) -> Self {
        Query {
            role,
            payloads: vec![],
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Element>) -> Self {
        self.payloads.push(payload.into());
        self
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Owner => write!(f, "{}", ns::MUC_OWNER),
            Role::Admin => write!(f, "{}", ns::MUC_ADMIN),
        }
    }
}

impl From<Query> for Element {
    fn from(value: Query) -> Self {
        Element::builder("query", value.role.to_string())
            .append_all(value.payloads)
            .build()
    }
}

impl TryFrom<Element> for Query {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        let role = if value.is("query", ns::MUC_OWNER) {
            Role::Owner
        } else if value.is("query", ns::MUC_ADMIN) {
            Role::Admin
        } else {
            value.expect_is("query", ns::MUC_OWNER)?;
            unreachable!()
        };

        Ok(Query {
            role,
            payloads: value.children().cloned().collect(),
        })
    }
}

impl IqGetPayload for Query {}
impl IqSetPayload for Query {}
