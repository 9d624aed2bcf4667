// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use minidom::Element;
use pretty_assertions::assert_eq;

use parlor_xmpp::mods::muc::{self, JoinRoomOptions};
use parlor_xmpp::mods::MUC;
use parlor_xmpp::test::{ConnectedSession, SessionTestAdditions};
use parlor_xmpp::types::RoomState;
use parlor_xmpp::{bare, Event, Session};

const ROOM: &str = "r@conf.parlor.im";

fn disco_info_response(iq: &Element, features: &[&str]) -> Element {
    let mut query = Element::builder("query", "http://jabber.org/protocol/disco#info").append(
        Element::builder("identity", "http://jabber.org/protocol/disco#info")
            .attr("category", "conference")
            .attr("type", "text")
            .attr("name", "The Room")
            .build(),
    );
    for feature in features {
        query = query.append(
            Element::builder("feature", "http://jabber.org/protocol/disco#info")
                .attr("var", *feature)
                .build(),
        );
    }

    Element::builder("iq", "jabber:client")
        .attr("id", iq.attr("id").unwrap())
        .attr("from", iq.attr("to").unwrap())
        .attr("type", "result")
        .append(query.build())
        .build()
}

fn room_disco_handler(features: &'static [&'static str]) -> impl FnMut(&Element) -> Vec<Element> + Send {
    move |element: &Element| {
        if element.name() == "iq"
            && element.attr("type") == Some("get")
            && element
                .get_child("query", "http://jabber.org/protocol/disco#info")
                .is_some()
        {
            return vec![disco_info_response(element, features)];
        }
        vec![]
    }
}

fn occupant_presence(nick: &str, self_presence: bool) -> Element {
    let mut x = Element::builder("x", "http://jabber.org/protocol/muc#user").append(
        Element::builder("item", "http://jabber.org/protocol/muc#user")
            .attr("affiliation", "member")
            .attr("role", "participant")
            .build(),
    );
    if self_presence {
        x = x.append(
            Element::builder("status", "http://jabber.org/protocol/muc#user")
                .attr("code", "110")
                .build(),
        );
    }

    Element::builder("presence", "jabber:client")
        .attr("from", format!("{ROOM}/{nick}"))
        .attr("to", "test@parlor.im/test")
        .append(x.build())
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_room_with_mam_skips_history() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&["urn:xmpp:mam:2"]));

    let room_jid = bare!(ROOM);
    let muc = session.get_mod::<MUC>();
    muc.join_room(&room_jid, "me", JoinRoomOptions::default())
        .await?;

    let presences = connection
        .sent_stanzas()
        .into_iter()
        .filter(|stanza| stanza.name() == "presence")
        .collect::<Vec<_>>();
    assert_eq!(presences.len(), 1);

    let x = presences[0]
        .get_child("x", "http://jabber.org/protocol/muc")
        .expect("Missing x element");
    let history = x
        .get_child("history", "http://jabber.org/protocol/muc")
        .expect("Missing history element");
    assert_eq!(history.attr("maxstanzas"), Some("0"));

    let room = muc.room(&room_jid).expect("Room should exist");
    assert!(room.supports_mam);
    assert_eq!(room.name, "The Room");
    assert_eq!(room.state, RoomState::Joining);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_room_without_mam_requests_history() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&[]));

    let muc = session.get_mod::<MUC>();
    muc.join_room(&bare!(ROOM), "me", JoinRoomOptions::default())
        .await?;

    let presence = connection
        .sent_stanzas()
        .into_iter()
        .find(|stanza| stanza.name() == "presence")
        .expect("Missing join presence");
    let history = presence
        .get_child("x", "http://jabber.org/protocol/muc")
        .and_then(|x| x.get_child("history", "http://jabber.org/protocol/muc"))
        .expect("Missing history element");
    assert_eq!(history.attr("maxstanzas"), Some("50"));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_occupants_are_batched_during_join() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&["urn:xmpp:mam:2"]));

    let room_jid = bare!(ROOM);
    let muc = session.get_mod::<MUC>();
    muc.join_room(&room_jid, "me", JoinRoomOptions::default())
        .await?;
    sent_events.write().clear();

    connection.receive_stanza(occupant_presence("alice", false)).await;
    connection.receive_stanza(occupant_presence("bob", false)).await;

    // Nothing is emitted while the join is still pending.
    assert!(!sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::MUC(muc::Event::OccupantJoined { .. }))));

    connection.receive_stanza(occupant_presence("me", true)).await;

    let batches = sent_events
        .read()
        .iter()
        .filter_map(|event| match event {
            Event::MUC(muc::Event::OccupantsBatch { occupants, .. }) => Some(occupants.clone()),
            _ => None,
        })
        .collect::<Vec<_>>();

    assert_eq!(batches.len(), 1);
    let mut nicks = batches[0]
        .iter()
        .map(|occupant| occupant.nick.clone())
        .collect::<Vec<_>>();
    nicks.sort();
    assert_eq!(nicks, vec!["alice".to_string(), "bob".to_string()]);

    assert!(sent_events.read().iter().any(|event| matches!(
        event,
        Event::MUC(muc::Event::RoomJoined { joined: true, .. })
    )));
    assert!(sent_events
        .read()
        .iter()
        .any(|event| matches!(event, Event::MUC(muc::Event::SelfOccupant { .. }))));

    let room = muc.room(&room_jid).expect("Room should exist");
    assert_eq!(room.state, RoomState::Joined);
    assert_eq!(room.occupants.len(), 3);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_join_times_out_with_one_retry() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&["urn:xmpp:mam:2"]));

    let room_jid = bare!(ROOM);
    let muc = session.get_mod::<MUC>();
    muc.join_room(&room_jid, "me", JoinRoomOptions::default())
        .await?;

    let join_presences = |connection: &parlor_xmpp::test::Connection| {
        connection
            .sent_stanzas()
            .into_iter()
            .filter(|stanza| {
                stanza.name() == "presence" && stanza.attr("to") == Some("r@conf.parlor.im/me")
            })
            .count()
    };

    assert_eq!(join_presences(&connection), 1);

    // First timeout triggers exactly one retry.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(join_presences(&connection), 2);

    let room = muc.room(&room_jid).expect("Room should exist");
    assert_eq!(room.state, RoomState::Joining);

    // Second timeout gives up.
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(join_presences(&connection), 2);

    let room = muc.room(&room_jid).expect("Room should exist");
    assert_eq!(room.state, RoomState::Idle);

    assert!(sent_events.read().iter().any(|event| matches!(
        event,
        Event::MUC(muc::Event::RoomJoined { joined: false, .. })
    )));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_self_presence_cancels_join_timeout() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&["urn:xmpp:mam:2"]));

    let room_jid = bare!(ROOM);
    let muc = session.get_mod::<MUC>();
    muc.join_room(&room_jid, "me", JoinRoomOptions::default())
        .await?;

    connection.receive_stanza(occupant_presence("me", true)).await;

    // Well past both the timeout and the retry window.
    tokio::time::sleep(Duration::from_secs(120)).await;

    let presences = connection
        .sent_stanzas()
        .into_iter()
        .filter(|stanza| {
            stanza.name() == "presence" && stanza.attr("to") == Some("r@conf.parlor.im/me")
        })
        .count();
    assert_eq!(presences, 1);
    assert_eq!(
        muc.room(&room_jid).map(|room| room.state),
        Some(RoomState::Joined)
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_room_error_clears_pending_join() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&["urn:xmpp:mam:2"]));

    let room_jid = bare!(ROOM);
    let muc = session.get_mod::<MUC>();
    muc.join_room(&room_jid, "me", JoinRoomOptions::default())
        .await?;

    connection
        .receive_stanza(Element::from_str(
            r#"<presence xmlns="jabber:client" from="r@conf.parlor.im" type="error">
                <x xmlns="http://jabber.org/protocol/muc#user"/>
                <error type="auth"><registration-required xmlns="urn:ietf:params:xml:ns:xmpp-stanzas"/></error>
            </presence>"#,
        )?)
        .await;

    assert_eq!(
        muc.room(&room_jid).map(|room| room.state),
        Some(RoomState::Idle)
    );

    // The timeout was cancelled along with the pending join.
    tokio::time::sleep(Duration::from_secs(120)).await;
    let presences = connection
        .sent_stanzas()
        .into_iter()
        .filter(|stanza| stanza.name() == "presence")
        .count();
    assert_eq!(presences, 1);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_autojoin_joins_bookmarks_and_prior_rooms_once() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(|element: &Element| {
        if element.name() != "iq" {
            return vec![];
        }

        // Bookmark fetch.
        if let Some(pubsub) = element.get_child("pubsub", "http://jabber.org/protocol/pubsub") {
            if pubsub
                .get_child("items", "http://jabber.org/protocol/pubsub")
                .map(|items| items.attr("node") == Some("urn:xmpp:bookmarks:1"))
                .unwrap_or(false)
            {
                let conference = |jid: &str, autojoin: bool| {
                    Element::builder("item", "http://jabber.org/protocol/pubsub")
                        .attr("id", jid)
                        .append(
                            Element::builder("conference", "urn:xmpp:bookmarks:1")
                                .attr("autojoin", if autojoin { "true" } else { "false" })
                                .append(
                                    Element::builder("nick", "urn:xmpp:bookmarks:1")
                                        .append("me")
                                        .build(),
                                )
                                .build(),
                        )
                        .build()
                };

                let response = Element::builder("iq", "jabber:client")
                    .attr("id", element.attr("id").unwrap())
                    .attr("type", "result")
                    .append(
                        Element::builder("pubsub", "http://jabber.org/protocol/pubsub")
                            .append(
                                Element::builder("items", "http://jabber.org/protocol/pubsub")
                                    .attr("node", "urn:xmpp:bookmarks:1")
                                    .append(conference("a@conf.parlor.im", true))
                                    .append(conference("b@conf.parlor.im", false))
                                    .build(),
                            )
                            .build(),
                    )
                    .build();
                return vec![response];
            }
        }

        // Per-room disco#info.
        if element
            .get_child("query", "http://jabber.org/protocol/disco#info")
            .is_some()
        {
            return vec![disco_info_response(element, &["urn:xmpp:mam:2"])];
        }

        vec![]
    });

    let muc = session.get_mod::<MUC>();
    // Room a is both autojoined and previously joined; room c only
    // previously joined; room b is bookmarked without autojoin.
    muc.autojoin_rooms(vec![bare!("a@conf.parlor.im"), bare!("c@conf.parlor.im")])
        .await?;

    let mut join_targets = connection
        .sent_stanzas()
        .into_iter()
        .filter(|stanza| stanza.name() == "presence")
        .filter_map(|stanza| stanza.attr("to").map(ToString::to_string))
        .collect::<Vec<_>>();
    join_targets.sort();

    assert_eq!(
        join_targets,
        vec![
            "a@conf.parlor.im/me".to_string(),
            "c@conf.parlor.im/test".to_string(),
        ]
    );

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_groupchat_message_from_joined_room_routes_to_room() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&["urn:xmpp:mam:2"]));

    let room_jid = bare!(ROOM);
    let muc = session.get_mod::<MUC>();
    muc.join_room(&room_jid, "me", JoinRoomOptions::default())
        .await?;
    connection.receive_stanza(occupant_presence("me", true)).await;
    sent_events.write().clear();

    connection
        .receive_stanza(Element::from_str(&format!(
            r#"<message xmlns="jabber:client" from="{ROOM}/alice" type="groupchat" id="g-1">
                <body>morning @all</body>
            </message>"#
        ))?)
        .await;

    let message = sent_events
        .read()
        .iter()
        .find_map(|event| match event {
            Event::MUC(muc::Event::Message { message }) => Some(message.clone()),
            _ => None,
        })
        .expect("Expected room message event");

    assert_eq!(message.room_jid, room_jid);
    assert_eq!(message.nick, "alice");
    assert!(!message.is_outgoing);
    assert!(message.is_mention_all);

    let room = muc.room(&room_jid).expect("Room should exist");
    assert_eq!(room.unread_count, 1);
    assert_eq!(room.mentions_count, 1);
    assert_eq!(
        room.last_message.as_ref().map(|message| message.body.as_str()),
        Some("morning @all")
    );

    // Our own reflected message counts as outgoing via the nickname match,
    // regardless of case.
    connection
        .receive_stanza(Element::from_str(&format!(
            r#"<message xmlns="jabber:client" from="{ROOM}/Me" type="groupchat" id="g-2">
                <body>good morning</body>
            </message>"#
        ))?)
        .await;

    let room = muc.room(&room_jid).expect("Room should exist");
    assert_eq!(room.unread_count, 1);
    assert!(room
        .last_message
        .as_ref()
        .map(|message| message.is_outgoing)
        .unwrap_or(false));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_subscription_requests_from_muc_jids_are_filtered() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection.set_stanza_handler(room_disco_handler(&["urn:xmpp:mam:2"]));

    let muc = session.get_mod::<MUC>();
    muc.join_room(&bare!(ROOM), "me", JoinRoomOptions::default())
        .await?;
    sent_events.write().clear();

    // Neither the room itself nor another room on the same service may
    // surface as a subscription request.
    connection
        .receive_stanza(Element::from_str(&format!(
            r#"<presence xmlns="jabber:client" from="{ROOM}" type="subscribe"/>"#
        ))?)
        .await;
    connection
        .receive_stanza(Element::from_str(
            r#"<presence xmlns="jabber:client" from="lounge@conf.parlor.im" type="subscribe"/>"#,
        )?)
        .await;

    assert!(!sent_events.read().iter().any(|event| matches!(
        event,
        Event::Roster(parlor_xmpp::mods::roster::Event::SubscriptionRequest { .. })
    )));

    // A regular account still does.
    connection
        .receive_stanza(Element::from_str(
            r#"<presence xmlns="jabber:client" from="carol@parlor.im" type="subscribe"/>"#,
        )?)
        .await;

    assert!(sent_events.read().iter().any(|event| matches!(
        event,
        Event::Roster(parlor_xmpp::mods::roster::Event::SubscriptionRequest { from }) if from == &bare!("carol@parlor.im")
    )));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mediated_invite_emits_invitation() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .receive_stanza(Element::from_str(
            r#"<message xmlns="jabber:client" from="r@conf.parlor.im" to="test@parlor.im">
                <x xmlns="http://jabber.org/protocol/muc#user">
                    <invite from="alice@parlor.im/phone">
                        <reason>join us</reason>
                        <quickchat xmlns="https://parlor.im/protocol/quick-chat"/>
                    </invite>
                </x>
            </message>"#,
        )?)
        .await;

    let invitation = sent_events
        .read()
        .iter()
        .find_map(|event| match event {
            Event::MUC(muc::Event::Invitation {
                room_jid,
                is_quick_chat,
                ..
            }) => Some((room_jid.clone(), *is_quick_chat)),
            _ => None,
        })
        .expect("Expected Invitation event");

    assert_eq!(invitation.0, bare!("r@conf.parlor.im"));
    assert!(invitation.1);

    Ok(())
}
