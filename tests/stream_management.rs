// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use minidom::Element;
use pretty_assertions::assert_eq;

use parlor_xmpp::client::SmEvent;
use parlor_xmpp::mods::Chat;
use parlor_xmpp::test::{ConnectedSession, SessionTestAdditions};
use parlor_xmpp::{bare, ConnectionError, Event, Session};

fn chat_message(id: &str, body: &str) -> Element {
    Element::from_str(&format!(
        r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="{id}">
            <body>{body}</body>
        </message>"#
    ))
    .unwrap()
}

fn sm_r() -> Element {
    Element::from_str(r#"<r xmlns="urn:xmpp:sm:3"/>"#).unwrap()
}

fn sm_a(h: u32) -> Element {
    Element::from_str(&format!(r#"<a xmlns="urn:xmpp:sm:3" h="{h}"/>"#)).unwrap()
}

fn sent_acks(connection: &parlor_xmpp::test::Connection) -> Vec<u32> {
    connection
        .sent_stanzas()
        .into_iter()
        .filter(|stanza| stanza.is("a", "urn:xmpp:sm:3"))
        .map(|stanza| stanza.attr("h").unwrap().parse().unwrap())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_acks_are_debounced_and_carry_flush_time_counter() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session_with_sm("sm-1").await?;

    assert!(session.sm_is_enabled());
    assert_eq!(session.sm_inbound_counter(), 0);

    // The server requests an ack, then delivers two more stanzas before the
    // debounce window closes.
    connection.receive_stanza(sm_r()).await;
    connection.receive_stanza(chat_message("m-1", "one")).await;
    connection.receive_stanza(sm_r()).await;
    connection.receive_stanza(chat_message("m-2", "two")).await;

    assert_eq!(sent_acks(&connection), Vec::<u32>::new());

    tokio::time::sleep(Duration::from_millis(300)).await;

    // A single <a/> with the counter at flush time, not at request time.
    assert_eq!(sent_acks(&connection), vec![2]);
    assert_eq!(session.sm_inbound_counter(), 2);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_inbound_counter_is_monotonic() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session_with_sm("sm-1").await?;

    for n in 1..=5u32 {
        connection
            .receive_stanza(chat_message(&format!("m-{n}"), "hello"))
            .await;
        assert_eq!(session.sm_inbound_counter(), n);
    }

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ack_past_queue_tail_is_suppressed() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session_with_sm("sm-1").await?;

    // Clear whatever the post-connect sequence left in the queue.
    session.sm_drain_outbound_queue();

    let chat = session.get_mod::<Chat>();
    chat.send_message(&bare!("alice@parlor.im"), "hello", Default::default())?;
    sent_events.write().clear();

    // The server claims three handled stanzas; only one is queued. The two
    // sentinel slots must not surface as acks.
    connection.receive_stanza(sm_a(3)).await;

    let acked = sent_events
        .read()
        .iter()
        .filter(|event| matches!(event, Event::SM(SmEvent::StanzaAcked { .. })))
        .count();
    assert_eq!(acked, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_resume_reports_lost_stanzas_then_enables() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session_with_sm("sm-1").await?;

    // One unacked message sits in the queue when the stream dies.
    session.sm_drain_outbound_queue();
    let chat = session.get_mod::<Chat>();
    chat.send_message(&bare!("alice@parlor.im"), "did this make it?", Default::default())?;
    sent_events.write().clear();

    connection.set_stanza_handler(|element: &Element| {
        if element.is("resume", "urn:xmpp:sm:3") {
            return vec![Element::builder("failed", "urn:xmpp:sm:3").build()];
        }
        if element.is("enable", "urn:xmpp:sm:3") {
            return vec![Element::builder("enabled", "urn:xmpp:sm:3")
                .attr("id", "sm-2")
                .attr("resume", "true")
                .build()];
        }
        if element.name() == "iq" && matches!(element.attr("type"), Some("get") | Some("set")) {
            if let Some(id) = element.attr("id") {
                return vec![Element::builder("iq", "jabber:client")
                    .attr("id", id)
                    .attr("type", "result")
                    .build()];
            }
        }
        vec![]
    });

    connection
        .disconnect_with_error(Some(ConnectionError::Generic {
            msg: "connection reset".to_string(),
        }))
        .await;

    // Wait out the first backoff delay.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = sent_events.read().clone();

    let lost = events
        .iter()
        .filter_map(|event| match event {
            Event::SM(SmEvent::StanzaLostOnResume { stanza }) => Some(stanza.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(lost.len(), 1);
    assert_eq!(
        lost[0].get_child("body", "jabber:client").map(|b| b.text()),
        Some("did this make it?".to_string())
    );

    assert!(events.iter().any(|event| matches!(event, Event::SM(SmEvent::Enabled))));
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::Client(parlor_xmpp::client::Event::Connected))));

    // A resume attempt was actually made before falling back.
    assert!(connection
        .sent_stanzas()
        .iter()
        .any(|stanza| stanza.is("resume", "urn:xmpp:sm:3")));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_successful_resume_skips_authenticated_event() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session_with_sm("sm-1").await?;

    connection.set_stanza_handler(|element: &Element| {
        if element.is("resume", "urn:xmpp:sm:3") {
            let h = element.attr("h").unwrap().to_string();
            return vec![Element::builder("resumed", "urn:xmpp:sm:3")
                .attr("h", h)
                .attr("previd", "sm-1")
                .build()];
        }
        vec![]
    });

    connection
        .disconnect_with_error(Some(ConnectionError::Generic {
            msg: "connection reset".to_string(),
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let events = sent_events.read().clone();
    assert!(events.iter().any(|event| matches!(event, Event::SM(SmEvent::Resumed))));
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::Client(parlor_xmpp::client::Event::Connected))));
    assert!(!events
        .iter()
        .any(|event| matches!(event, Event::SM(SmEvent::StanzaLostOnResume { .. }))));

    Ok(())
}
