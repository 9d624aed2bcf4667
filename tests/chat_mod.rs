// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;

use anyhow::Result;
use minidom::Element;
use pretty_assertions::assert_eq;

use parlor_xmpp::mods::chat::SendMessageOptions;
use parlor_xmpp::mods::{self, muc};
use parlor_xmpp::test::{ConnectedSession, SessionTestAdditions};
use parlor_xmpp::{bare, Event, Session};

#[tokio::test(start_paused = true)]
async fn test_delivers_carbon_forwarded_message_once() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    let stanza = Element::from_str(
        r#"<message xmlns="jabber:client" from="test@parlor.im" to="test@parlor.im/desktop">
            <received xmlns="urn:xmpp:carbons:2">
                <forwarded xmlns="urn:xmpp:forward:0">
                    <message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im/desktop" type="chat" id="c-1">
                        <body>hi</body>
                    </message>
                </forwarded>
            </received>
        </message>"#,
    )?;

    connection.receive_stanza(stanza).await;

    let messages = sent_events
        .read()
        .iter()
        .filter_map(|event| match event {
            Event::Chat(mods::chat::Event::Message { message }) => Some(message.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "c-1".into());
    assert_eq!(messages[0].conversation_id, bare!("alice@parlor.im"));
    assert_eq!(messages[0].body, "hi");
    assert!(!messages[0].is_outgoing);

    assert!(!sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::MUC(muc::Event::Message { .. }))));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_ignores_forged_carbons() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    // CVE-2017-5589: carbons may only originate from our own bare JID.
    let stanza = Element::from_str(
        r#"<message xmlns="jabber:client" from="mallory@evil.example" to="test@parlor.im/desktop">
            <received xmlns="urn:xmpp:carbons:2">
                <forwarded xmlns="urn:xmpp:forward:0">
                    <message xmlns="jabber:client" from="mallory@evil.example/x" type="chat" id="f-1">
                        <body>transfer me money</body>
                    </message>
                </forwarded>
            </received>
        </message>"#,
    )?;

    connection.receive_stanza(stanza).await;

    assert!(!sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::Chat(mods::chat::Event::Message { .. }))));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sent_carbons_produce_no_message_event() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    let stanza = Element::from_str(
        r#"<message xmlns="jabber:client" from="test@parlor.im" to="test@parlor.im/desktop">
            <sent xmlns="urn:xmpp:carbons:2">
                <forwarded xmlns="urn:xmpp:forward:0">
                    <message xmlns="jabber:client" from="test@parlor.im/phone" to="bob@parlor.im" type="chat" id="s-1">
                        <body>sent from my other device</body>
                    </message>
                </forwarded>
            </sent>
        </message>"#,
    )?;

    connection.receive_stanza(stanza).await;

    // The conversation materializes, but our own echo is not a message
    // event.
    assert!(sent_events.read().iter().any(|event| matches!(
        event,
        Event::Chat(mods::chat::Event::ConversationAdded { conversation_id }) if conversation_id == &bare!("bob@parlor.im")
    )));
    assert!(!sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::Chat(mods::chat::Event::Message { .. }))));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_messages_without_type_count_as_chat() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    let stanza = Element::from_str(
        r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" id="n-1">
            <body>no type attribute</body>
        </message>"#,
    )?;

    connection.receive_stanza(stanza).await;

    assert!(sent_events.read().iter().any(|event| matches!(
        event,
        Event::Chat(mods::chat::Event::Message { message }) if message.conversation_id == bare!("alice@parlor.im")
    )));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_groupchat_from_unknown_room_produces_no_event() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    let stanza = Element::from_str(
        r#"<message xmlns="jabber:client" from="nowhere@conf.parlor.im/ghost" type="groupchat" id="g-1">
            <body>boo</body>
        </message>"#,
    )?;

    connection.receive_stanza(stanza).await;

    assert!(!sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::MUC(muc::Event::Message { .. }))));
    assert!(!sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::Chat(mods::chat::Event::Message { .. }))));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_chat_states_emit_typing_without_message() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    let stanza = Element::from_str(
        r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat">
            <composing xmlns="http://jabber.org/protocol/chatstates"/>
        </message>"#,
    )?;

    connection.receive_stanza(stanza).await;

    assert_eq!(
        sent_events.read().as_slice(),
        &[Event::Chat(mods::chat::Event::Typing {
            conversation_id: bare!("alice@parlor.im"),
            is_typing: true,
        })]
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_corrections_require_matching_sender() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m-1">
                <body>hellp</body>
            </message>"#,
        )?)
        .await;

    // A correction from somebody else must not rewrite Alice's message.
    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="eve@parlor.im/x" to="test@parlor.im" type="chat" id="m-2">
                <replace xmlns="urn:xmpp:message-correct:0" id="m-1"/>
                <body>hacked</body>
            </message>"#,
        )?)
        .await;

    assert!(!sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::Chat(mods::chat::Event::MessageUpdated { .. }))));

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="alice@parlor.im/tablet" to="test@parlor.im" type="chat" id="m-3">
                <replace xmlns="urn:xmpp:message-correct:0" id="m-1"/>
                <body>hello</body>
            </message>"#,
        )?)
        .await;

    let updated = sent_events
        .read()
        .iter()
        .find_map(|event| match event {
            Event::Chat(mods::chat::Event::MessageUpdated { message }) => Some(message.clone()),
            _ => None,
        })
        .expect("Expected MessageUpdated event");

    assert_eq!(updated.body, "hello");
    assert!(updated.is_edited);
    assert_eq!(updated.original_body.as_deref(), Some("hellp"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retraction_marks_message() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m-1">
                <body>delete me</body>
            </message>"#,
        )?)
        .await;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m-2">
                <apply-to xmlns="urn:xmpp:fasten:0" id="m-1">
                    <retract xmlns="urn:xmpp:message-retract:0"/>
                </apply-to>
                <fallback xmlns="urn:xmpp:fallback:0"/>
                <body>This person attempted to retract a previous message.</body>
            </message>"#,
        )?)
        .await;

    let updated = sent_events
        .read()
        .iter()
        .find_map(|event| match event {
            Event::Chat(mods::chat::Event::MessageUpdated { message }) => Some(message.clone()),
            _ => None,
        })
        .expect("Expected MessageUpdated event");

    assert!(updated.is_retracted);
    assert!(updated.retracted_at.is_some());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reactions_replace_previous_set() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m-1">
                <body>react to me</body>
            </message>"#,
        )?)
        .await;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m-2">
                <reactions xmlns="urn:xmpp:reactions:0" id="m-1">
                    <reaction>👍</reaction>
                </reactions>
            </message>"#,
        )?)
        .await;

    let reactions = sent_events
        .read()
        .iter()
        .find_map(|event| match event {
            Event::Chat(mods::chat::Event::Reactions {
                message_id, emojis, ..
            }) => Some((message_id.clone(), emojis.clone())),
            _ => None,
        })
        .expect("Expected Reactions event");

    assert_eq!(reactions.0, "m-1".into());
    assert_eq!(reactions.1, vec!["👍".into()]);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stranger_message_is_flagged() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="stranger@elsewhere.example/x" to="test@parlor.im" type="chat" id="m-1">
                <body>psst</body>
            </message>"#,
        )?)
        .await;

    assert!(sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::Chat(mods::chat::Event::StrangerMessage { .. }))));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_send_message_with_reply_builds_fallback() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    let chat = session.get_mod::<mods::Chat>();
    chat.send_message(
        &bare!("alice@parlor.im"),
        "sure!",
        SendMessageOptions {
            reply_to: Some(mods::chat::ReplyTo {
                id: "orig-1".into(),
                to: Some("alice@parlor.im/phone".parse()?),
                quoted_body: "wanna grab lunch?".to_string(),
            }),
            ..Default::default()
        },
    )?;

    let sent = connection.sent_stanzas();
    assert_eq!(sent.len(), 1);

    let message = &sent[0];
    let body = message
        .get_child("body", "jabber:client")
        .expect("Missing body")
        .text();
    assert_eq!(body, "> wanna grab lunch?\nsure!");

    let reply = message
        .get_child("reply", "urn:xmpp:reply:0")
        .expect("Missing reply element");
    assert_eq!(reply.attr("id"), Some("orig-1"));

    let fallback = message
        .get_child("fallback", "urn:xmpp:fallback:0")
        .expect("Missing fallback element");
    assert_eq!(fallback.attr("for"), Some("urn:xmpp:reply:0"));
    let range = fallback
        .get_child("body", "urn:xmpp:fallback:0")
        .expect("Missing fallback range");
    assert_eq!(range.attr("start"), Some("0"));
    assert_eq!(range.attr("end"), Some("20"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_easter_egg_is_not_persisted() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="alice@parlor.im/phone" to="test@parlor.im" type="chat" id="m-1">
                <easter-egg xmlns="https://parlor.im/protocol/easter-egg" animation="snow"/>
            </message>"#,
        )?)
        .await;

    assert_eq!(
        sent_events.read().as_slice(),
        &[Event::Chat(mods::chat::Event::Animation {
            conversation_id: bare!("alice@parlor.im"),
            animation: "snow".to_string(),
        })]
    );

    Ok(())
}
