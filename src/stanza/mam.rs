// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use chrono::{DateTime, Utc};
use jid::Jid;
use minidom::Element;
use xmpp_parsers::data_forms::{DataForm, DataFormType, Field};
use xmpp_parsers::iq::IqSetPayload;
use xmpp_parsers::message::MessagePayload;

use crate::ns;
use crate::stanza::message::stanza_id;
use crate::stanza::message::Forwarded;
use crate::util::id_string_macro::id_string;
use crate::util::{parse_bool, ElementExt};

// XEP-0313: Message Archive Management
// https://xmpp.org/extensions/xep-0313.html

id_string!(QueryId);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    pub with: Option<Jid>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.with.is_none() && self.start.is_none() && self.end.is_none()
    }
}

/// RSM does not define the behaviour of including both `<before/>` and
/// `<after/>` in the same request, so the range is modelled as mutually
/// exclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum RsmRange {
    /// Use this with a None value to retrieve the last page.
    Before(Option<stanza_id::Id>),
    After(stanza_id::Id),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub query_id: QueryId,
    pub filter: Filter,
    pub range: Option<RsmRange>,
    pub max: Option<usize>,
}

impl Default for QueryId {
    fn default() -> Self {
        QueryId::from("")
    }
}

impl From<Query> for Element {
    fn from(value: Query) -> Self {
        let mut builder = Element::builder("query", ns::MAM2).attr("queryid", value.query_id);

        if !value.filter.is_empty() {
            let mut fields = vec![];
            if let Some(with) = value.filter.with {
                fields.push(Field::text_single("with", &with.to_string()));
            }
            if let Some(start) = value.filter.start {
                fields.push(Field::text_single("start", &start.to_rfc3339()));
            }
            if let Some(end) = value.filter.end {
                fields.push(Field::text_single("end", &end.to_rfc3339()));
            }
            builder = builder.append(Element::from(DataForm::new(
                DataFormType::Submit,
                ns::MAM2,
                fields,
            )));
        }

        if value.range.is_some() || value.max.is_some() {
            let mut set = Element::builder("set", ns::RSM);
            if let Some(max) = value.max {
                set = set.append(
                    Element::builder("max", ns::RSM)
                        .append(max.to_string())
                        .build(),
                );
            }
            match value.range {
                Some(RsmRange::Before(id)) => {
                    set = set.append(
                        Element::builder("before", ns::RSM)
                            .append(id.map(|id| id.into_inner()).unwrap_or_default())
                            .build(),
                    )
                }
                Some(RsmRange::After(id)) => {
                    set = set.append(
                        Element::builder("after", ns::RSM)
                            .append(id.into_inner())
                            .build(),
                    )
                }
                None => (),
            }
            builder = builder.append(set.build());
        }

        builder.build()
    }
}

impl TryFrom<Element> for Query {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("query", ns::MAM2)?;

        let mut query = Query {
            query_id: value.attr("queryid").unwrap_or_default().into(),
            ..Default::default()
        };

        if let Some(form) = value.get_child("x", ns::DATA_FORMS) {
            let form = DataForm::try_from(form.clone())?;
            for field in form.fields {
                match field.var.as_str() {
                    "with" => {
                        query.filter.with =
                            field.values.first().map(|v| v.parse()).transpose()?
                    }
                    "start" => {
                        query.filter.start = field
                            .values
                            .first()
                            .map(|v| DateTime::parse_from_rfc3339(v).map(|dt| dt.with_timezone(&Utc)))
                            .transpose()?
                    }
                    "end" => {
                        query.filter.end = field
                            .values
                            .first()
                            .map(|v| DateTime::parse_from_rfc3339(v).map(|dt| dt.with_timezone(&Utc)))
                            .transpose()?
                    }
                    _ => (),
                }
            }
        }

        if let Some(set) = value.get_child("set", ns::RSM) {
            query.max = set
                .get_child("max", ns::RSM)
                .map(|max| max.text().parse())
                .transpose()?;
            if let Some(before) = set.get_child("before", ns::RSM) {
                let text = before.text();
                query.range = Some(RsmRange::Before(
                    (!text.is_empty()).then(|| text.into()),
                ));
            } else if let Some(after) = set.get_child("after", ns::RSM) {
                query.range = Some(RsmRange::After(after.text().into()));
            }
        }

        Ok(query)
    }
}

impl IqSetPayload for Query {}

/// The `<result/>` wrapper around archived stanzas.
#[derive(Debug, PartialEq, Clone)]
pub struct ArchivedMessage {
    pub id: stanza_id::Id,
    pub query_id: Option<QueryId>,
    pub forwarded: Forwarded,
}

impl TryFrom<Element> for ArchivedMessage {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("result", ns::MAM2)?;

        Ok(ArchivedMessage {
            id: value.attr_req("id")?.into(),
            query_id: value.attr("queryid").map(Into::into),
            forwarded: value
                .get_child("forwarded", ns::FORWARD)
                .ok_or(anyhow::format_err!("Missing forwarded in archived message"))?
                .clone()
                .try_into()?,
        })
    }
}

impl From<ArchivedMessage> for Element {
    fn from(value: ArchivedMessage) -> Self {
        Element::builder("result", ns::MAM2)
            .attr("id", value.id)
            .attr("queryid", value.query_id)
            .append(Element::from(value.forwarded))
            .build()
    }
}

impl MessagePayload for ArchivedMessage {}

/// The `<fin/>` element terminating an archive query.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Fin {
    pub complete: bool,
    pub first: Option<stanza_id::Id>,
    pub last: Option<stanza_id::Id>,
    pub count: Option<usize>,
}

impl TryFrom<Element> for Fin {
    type Error = anyhow::Error;

    fn try_from(value: Element) -> Result<Self, Self::Error> {
        value.expect_is("fin", ns::MAM2)?;

        let mut fin = Fin {
            complete: value
                .attr("complete")
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false),
            ..Default::default()
        };

        if let Some(set) = value.get_child("set", ns::RSM) {
            fin.first = set.get_child("first", ns::RSM).map(|el| el.text().into());
            fin.last = set.get_child("last", ns::RSM).map(|el| el.text().into());
            fin.count = set
                .get_child("count", ns::RSM)
                .map(|el| el.text().parse())
                .transpose()?;
        }

        Ok(fin)
    }
}

impl From<Fin> for Element {
    fn from(value: Fin) -> Self {
        let mut set = Element::builder("set", ns::RSM);
        if let Some(first) = value.first {
            set = set.append(
                Element::builder("first", ns::RSM)
                    .append(first.into_inner())
                    .build(),
            );
        }
        if let Some(last) = value.last {
            set = set.append(
                Element::builder("last", ns::RSM)
                    .append(last.into_inner())
                    .build(),
            );
        }
        if let Some(count) = value.count {
            set = set.append(
                Element::builder("count", ns::RSM)
                    .append(count.to_string())
                    .build(),
            );
        }

        Element::builder("fin", ns::MAM2)
            .attr("complete", value.complete.then_some("true"))
            .append(set.build())
            .build()
    }
}
