// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use minidom::Element;
use pretty_assertions::assert_eq;

use parlor_xmpp::mods::mam::PageRequest;
use parlor_xmpp::mods::MAM;
use parlor_xmpp::test::{ConnectedSession, SessionTestAdditions};
use parlor_xmpp::{bare, Session};

/// Extracts the queryid of an outgoing archive query.
fn query_id_of(iq: &Element) -> Option<String> {
    iq.get_child("query", "urn:xmpp:mam:2")
        .and_then(|query| query.attr("queryid"))
        .map(ToString::to_string)
}

fn archived(query_id: &str, archive_id: &str, stamp: &str, inner: Element) -> Element {
    Element::builder("message", "jabber:client")
        .attr("to", "test@parlor.im/test")
        .append(
            Element::builder("result", "urn:xmpp:mam:2")
                .attr("queryid", query_id)
                .attr("id", archive_id)
                .append(
                    Element::builder("forwarded", "urn:xmpp:forward:0")
                        .append(
                            Element::builder("delay", "urn:xmpp:delay")
                                .attr("stamp", stamp)
                                .build(),
                        )
                        .append(inner)
                        .build(),
                )
                .build(),
        )
        .build()
}

fn chat_body(from: &str, id: &str, body: &str) -> Element {
    Element::from_str(&format!(
        r#"<message xmlns="jabber:client" from="{from}" to="test@parlor.im" type="chat" id="{id}">
            <body>{body}</body>
        </message>"#
    ))
    .unwrap()
}

fn fin_result(iq_id: &str, complete: bool, first: Option<&str>, last: Option<&str>) -> Element {
    let mut set = Element::builder("set", "http://jabber.org/protocol/rsm");
    if let Some(first) = first {
        set = set.append(
            Element::builder("first", "http://jabber.org/protocol/rsm")
                .append(first)
                .build(),
        );
    }
    if let Some(last) = last {
        set = set.append(
            Element::builder("last", "http://jabber.org/protocol/rsm")
                .append(last)
                .build(),
        );
    }

    Element::builder("iq", "jabber:client")
        .attr("id", iq_id)
        .attr("type", "result")
        .append(
            Element::builder("fin", "urn:xmpp:mam:2")
                .attr("complete", complete.then_some("true"))
                .append(set.build())
                .build(),
        )
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_correction_in_same_page_rewrites_target() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(|iq: &Element| {
        let Some(query_id) = query_id_of(iq) else {
            return vec![];
        };
        let iq_id = iq.attr("id").unwrap();

        vec![
            archived(
                &query_id,
                "arch-1",
                "2025-06-01T10:00:00Z",
                chat_body("alice@parlor.im/phone", "m1", "hellp"),
            ),
            archived(
                &query_id,
                "arch-2",
                "2025-06-01T10:00:05Z",
                Element::from_str(
                    r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m2">
                        <replace xmlns="urn:xmpp:message-correct:0" id="m1"/>
                        <body>hello</body>
                    </message>"#,
                )
                .unwrap(),
            ),
            fin_result(iq_id, true, Some("arch-1"), Some("arch-2")),
        ]
    });

    let mam = session.get_mod::<MAM>();
    let result = mam
        .query_archive(&bare!("alice@parlor.im"), PageRequest::default())
        .await?;

    assert!(result.is_complete);
    assert_eq!(result.messages.len(), 1);

    let message = &result.messages[0];
    assert_eq!(message.id, "m1".into());
    assert_eq!(message.body, "hello");
    assert!(message.is_edited);
    assert_eq!(message.original_body.as_deref(), Some("hellp"));
    assert!(message.is_delayed);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_correction_from_other_sender_is_ignored() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(|iq: &Element| {
        let Some(query_id) = query_id_of(iq) else {
            return vec![];
        };
        let iq_id = iq.attr("id").unwrap();

        vec![
            archived(
                &query_id,
                "arch-1",
                "2025-06-01T10:00:00Z",
                chat_body("alice@parlor.im/phone", "m1", "original"),
            ),
            archived(
                &query_id,
                "arch-2",
                "2025-06-01T10:00:05Z",
                Element::from_str(
                    r#"<message xmlns="jabber:client" from="eve@parlor.im/x" to="test@parlor.im" type="chat" id="m2">
                        <replace xmlns="urn:xmpp:message-correct:0" id="m1"/>
                        <body>forged</body>
                    </message>"#,
                )
                .unwrap(),
            ),
            fin_result(iq_id, true, None, None),
        ]
    });

    let mam = session.get_mod::<MAM>();
    let result = mam
        .query_archive(&bare!("alice@parlor.im"), PageRequest::default())
        .await?;

    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.messages[0].body, "original");
    assert!(!result.messages[0].is_edited);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retraction_and_reactions_in_page() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(|iq: &Element| {
        let Some(query_id) = query_id_of(iq) else {
            return vec![];
        };
        let iq_id = iq.attr("id").unwrap();

        vec![
            archived(
                &query_id,
                "arch-1",
                "2025-06-01T10:00:00Z",
                chat_body("alice@parlor.im/phone", "m1", "retract me"),
            ),
            archived(
                &query_id,
                "arch-2",
                "2025-06-01T10:00:01Z",
                chat_body("alice@parlor.im/phone", "m2", "react to me"),
            ),
            archived(
                &query_id,
                "arch-3",
                "2025-06-01T10:00:05Z",
                Element::from_str(
                    r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m3">
                        <apply-to xmlns="urn:xmpp:fasten:0" id="m1">
                            <retract xmlns="urn:xmpp:message-retract:0"/>
                        </apply-to>
                    </message>"#,
                )
                .unwrap(),
            ),
            archived(
                &query_id,
                "arch-4",
                "2025-06-01T10:00:06Z",
                Element::from_str(
                    r#"<message xmlns="jabber:client" from="test@parlor.im/other" to="alice@parlor.im" type="chat" id="m4">
                        <reactions xmlns="urn:xmpp:reactions:0" id="m2">
                            <reaction>🎉</reaction>
                        </reactions>
                    </message>"#,
                )
                .unwrap(),
            ),
            fin_result(iq_id, true, None, None),
        ]
    });

    let mam = session.get_mod::<MAM>();
    let result = mam
        .query_archive(&bare!("alice@parlor.im"), PageRequest::default())
        .await?;

    assert_eq!(result.messages.len(), 2);

    let retracted = &result.messages[0];
    assert_eq!(retracted.id, "m1".into());
    assert!(retracted.is_retracted);

    let reacted = &result.messages[1];
    assert_eq!(reacted.id, "m2".into());
    assert_eq!(
        reacted.reactions.get(&"🎉".into()).map(Vec::as_slice),
        Some(&[bare!("test@parlor.im")][..])
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_auto_pagination_past_modification_only_pages() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    let pages = Arc::new(AtomicUsize::new(0));
    let pages_for_handler = pages.clone();

    connection.set_stanza_handler(move |iq: &Element| {
        let Some(query_id) = query_id_of(iq) else {
            return vec![];
        };
        let iq_id = iq.attr("id").unwrap();
        let page = pages_for_handler.fetch_add(1, Ordering::SeqCst);

        match page {
            // The most recent page holds only a retraction.
            0 => vec![
                archived(
                    &query_id,
                    "arch-10",
                    "2025-06-01T12:00:00Z",
                    Element::from_str(
                        r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m10">
                            <apply-to xmlns="urn:xmpp:fasten:0" id="m1">
                                <retract xmlns="urn:xmpp:message-retract:0"/>
                            </apply-to>
                        </message>"#,
                    )
                    .unwrap(),
                ),
                fin_result(iq_id, false, Some("arch-10"), Some("arch-10")),
            ],
            // The older page has an actual message.
            _ => vec![
                archived(
                    &query_id,
                    "arch-1",
                    "2025-06-01T10:00:00Z",
                    chat_body("alice@parlor.im/phone", "m1", "older message"),
                ),
                fin_result(iq_id, true, Some("arch-1"), Some("arch-1")),
            ],
        }
    });

    let mam = session.get_mod::<MAM>();
    let result = mam
        .query_archive(&bare!("alice@parlor.im"), PageRequest::default())
        .await?;

    // Two pages were fetched and the retraction from the newer page applied
    // to the message found in the older one.
    assert_eq!(pages.load(Ordering::SeqCst), 2);
    assert_eq!(result.messages.len(), 1);
    assert!(result.messages[0].is_retracted);

    // The second query continued from the first page's RSM anchor.
    let before_anchors = connection
        .sent_stanzas()
        .iter()
        .filter(|stanza| stanza.name() == "iq")
        .filter_map(|stanza| {
            stanza
                .get_child("query", "urn:xmpp:mam:2")?
                .get_child("set", "http://jabber.org/protocol/rsm")?
                .get_child("before", "http://jabber.org/protocol/rsm")
                .map(|before| before.text())
        })
        .collect::<Vec<_>>();
    assert_eq!(before_anchors, vec!["".to_string(), "arch-10".to_string()]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_room_archive_gates_modifications_on_occupant() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(|iq: &Element| {
        let Some(query_id) = query_id_of(iq) else {
            return vec![];
        };
        let iq_id = iq.attr("id").unwrap();

        vec![
            archived(
                &query_id,
                "arch-1",
                "2025-06-01T10:00:00Z",
                Element::from_str(
                    r#"<message xmlns="jabber:client" from="r@conf.parlor.im/alice" type="groupchat" id="m1">
                        <body>my message</body>
                    </message>"#,
                )
                .unwrap(),
            ),
            // A different occupant tries to edit Alice's message.
            archived(
                &query_id,
                "arch-2",
                "2025-06-01T10:00:05Z",
                Element::from_str(
                    r#"<message xmlns="jabber:client" from="r@conf.parlor.im/mallory" type="groupchat" id="m2">
                        <replace xmlns="urn:xmpp:message-correct:0" id="m1"/>
                        <body>my message (edited by mallory)</body>
                    </message>"#,
                )
                .unwrap(),
            ),
            // Alice edits her own message.
            archived(
                &query_id,
                "arch-3",
                "2025-06-01T10:00:06Z",
                Element::from_str(
                    r#"<message xmlns="jabber:client" from="r@conf.parlor.im/alice" type="groupchat" id="m3">
                        <replace xmlns="urn:xmpp:message-correct:0" id="m1"/>
                        <body>my message, fixed</body>
                    </message>"#,
                )
                .unwrap(),
            ),
            fin_result(iq_id, true, None, None),
        ]
    });

    let mam = session.get_mod::<MAM>();
    let result = mam
        .query_room_archive(&bare!("r@conf.parlor.im"), PageRequest::default())
        .await?;

    assert_eq!(result.messages.len(), 1);
    assert_eq!(result.messages[0].body, "my message, fixed");
    assert_eq!(result.messages[0].nick, "alice");
    assert!(result.messages[0].is_edited);

    Ok(())
}
