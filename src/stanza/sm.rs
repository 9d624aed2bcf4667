// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use minidom::Element;

use crate::ns;
use crate::util::{parse_bool, ElementExt, ParseError};

// XEP-0198: Stream Management
// https://xmpp.org/extensions/xep-0198.html

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Enable {
    pub resume: bool,
    /// Preferred maximum resumption time in seconds.
    pub max: Option<u32>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Enabled {
    pub id: Option<String>,
    pub resume: bool,
    pub max: Option<u32>,
    pub location: Option<String>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Resume {
    pub h: u32,
    pub previd: String,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Resumed {
    pub h: u32,
    pub previd: String,
}

#[derive(Debug, PartialEq, Clone, Default)]
pub struct Failed {
    pub h: Option<u32>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct R;

#[derive(Debug, PartialEq, Clone)]
pub struct A {
    pub h: u32,
}

/// All stream-management elements arriving on the stream.
#[derive(Debug, PartialEq, Clone)]
pub enum Nonza {
    Enabled(Enabled),
    Resumed(Resumed),
    Failed(Failed),
    R(R),
    A(A),
}

impl Nonza {
    /// Returns `Ok(None)` for elements outside the SM namespace.
    pub fn try_from_element(element: &Element) -> Result<Option<Nonza>, ParseError> {
        if !element.has_ns(ns::SM) {
            return Ok(None);
        }

        let nonza = match element.name() {
            "enabled" => Nonza::Enabled(Enabled::try_from(element.clone())?),
            "resumed" => Nonza::Resumed(Resumed::try_from(element.clone())?),
            "failed" => Nonza::Failed(Failed::try_from(element.clone())?),
            "r" => Nonza::R(R),
            "a" => Nonza::A(A::try_from(element.clone())?),
            other => {
                return Err(ParseError::Generic {
                    msg: format!("Encountered unexpected SM element {other}"),
                })
            }
        };

        Ok(Some(nonza))
    }
}

impl From<Enable> for Element {
    fn from(value: Enable) -> Self {
        Element::builder("enable", ns::SM)
            .attr("resume", value.resume.then_some("true"))
            .attr("max", value.max)
            .build()
    }
}

impl TryFrom<Element> for Enabled {
    type Error = ParseError;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("enabled", ns::SM)?;

        Ok(Enabled {
            id: value.attr("id").map(ToString::to_string),
            resume: value
                .attr("resume")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
            max: value.attr("max").map(|max| max.parse()).transpose()?,
            location: value.attr("location").map(ToString::to_string),
        })
    }
}

impl From<Enabled> for Element {
    fn from(value: Enabled) -> Self {
        Element::builder("enabled", ns::SM)
            .attr("id", value.id)
            .attr("resume", value.resume.then_some("true"))
            .attr("max", value.max)
            .attr("location", value.location)
            .build()
    }
}

impl From<Resume> for Element {
    fn from(value: Resume) -> Self {
        Element::builder("resume", ns::SM)
            .attr("h", value.h)
            .attr("previd", value.previd)
            .build()
    }
}

impl TryFrom<Element> for Resumed {
    type Error = ParseError;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("resumed", ns::SM)?;

        Ok(Resumed {
            h: value.attr_req("h")?.parse()?,
            previd: value.attr_req("previd")?.to_string(),
        })
    }
}

impl From<Resumed> for Element {
    fn from(value: Resumed) -> Self {
        Element::builder("resumed", ns::SM)
            .attr("h", value.h)
            .attr("previd", value.previd)
            .build()
    }
}

impl TryFrom<Element> for Failed {
    type Error = ParseError;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("failed", ns::SM)?;

        Ok(Failed {
            h: value.attr("h").map(|h| h.parse()).transpose()?,
        })
    }
}

impl From<Failed> for Element {
    fn from(value: Failed) -> Self {
        Element::builder("failed", ns::SM).attr("h", value.h).build()
    }
}

impl From<R> for Element {
    fn from(_value: R) -> Self {
        Element::builder("r", ns::SM).build()
    }
}

impl TryFrom<Element> for A {
    type Error = ParseError;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("a", ns::SM)?;

        Ok(A {
            h: value.attr_req("h")?.parse()?,
        })
    }
}

impl From<A> for Element {
    fn from(value: A) -> Self {
        Element::builder("a", ns::SM).attr("h", value.h).build()
    }
}
