// parlor-xmpp
//
// Copyright: 2025, Marc Bauer <mb@nesium.com>
// License: Mozilla Public License v2.0 (MPL v2.0)

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use minidom::Element;
use pretty_assertions::assert_eq;

use parlor_xmpp::client::Event as ClientEvent;
use parlor_xmpp::test::{ConnectedSession, SessionTestAdditions};
use parlor_xmpp::{ConnectionError, ConnectionStatus, Event, Session, SystemState};

fn reconnect_events(events: &[Event]) -> Vec<(u32, u64)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Client(ClientEvent::Reconnecting { attempt, delay_ms }) => {
                Some((*attempt, *delay_ms))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_disconnect_schedules_backoff() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .disconnect_with_error(Some(ConnectionError::Generic {
            msg: "connection reset".to_string(),
        }))
        .await;

    assert_eq!(reconnect_events(&sent_events.read()), vec![(1, 1000)]);
    assert_eq!(session.status(), ConnectionStatus::Reconnecting { attempt: 1 });

    // After the delay the session reconnects against the mock server and
    // comes back online.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(session.status(), ConnectionStatus::Online);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_conflict_suppresses_reconnect() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .disconnect_with_error(Some(ConnectionError::Conflict))
        .await;

    assert!(reconnect_events(&sent_events.read()).is_empty());
    assert_eq!(
        session.status(),
        ConnectionStatus::Error {
            message: "Another device took over this session".to_string()
        }
    );

    // And stays that way.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(reconnect_events(&sent_events.read()).is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_auth_error_suppresses_reconnect() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    connection
        .disconnect_with_error(Some(ConnectionError::InvalidCredentials))
        .await;

    assert!(reconnect_events(&sent_events.read()).is_empty());
    assert!(matches!(session.status(), ConnectionStatus::Error { .. }));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_suppresses_reconnect() -> Result<()> {
    let ConnectedSession {
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    session.disconnect();

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(reconnect_events(&sent_events.read()).is_empty());
    assert_eq!(session.status(), ConnectionStatus::Offline);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_initial_connect_failure_does_not_retry() -> Result<()> {
    let connection = parlor_xmpp::test::Connection::default();
    connection.fail_next_connect(ConnectionError::Generic {
        msg: "server unreachable".to_string(),
    });

    let session = Session::builder()
        .set_connector_provider(connection.connector())
        .build();

    let result = session.connect(ConnectedSession::test_config()).await;
    assert!(result.is_err());
    assert!(matches!(session.status(), ConnectionStatus::Error { .. }));

    tokio::time::sleep(Duration::from_secs(10)).await;

    // No attempt was made to reconnect.
    assert!(connection.sent_stanzas().is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_up_to_cap() -> Result<()> {
    let ConnectedSession {
        connection,
        sent_events,
        ..
    } = Session::connected_session().await?;

    // Every reconnect attempt fails immediately.
    connection.fail_next_connect(ConnectionError::Generic {
        msg: "still down".to_string(),
    });
    connection
        .disconnect_with_error(Some(ConnectionError::Generic {
            msg: "connection reset".to_string(),
        }))
        .await;

    tokio::time::sleep(Duration::from_millis(1100)).await;
    connection.fail_next_connect(ConnectionError::Generic {
        msg: "still down".to_string(),
    });
    tokio::time::sleep(Duration::from_millis(2100)).await;

    let events = reconnect_events(&sent_events.read());
    assert_eq!(events[0], (1, 1000));
    assert_eq!(events[1], (2, 2000));
    assert_eq!(events[2], (3, 4000));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_long_sleep_bypasses_verification() -> Result<()> {
    let ConnectedSession {
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    session
        .notify_system_state(SystemState::Awake, Some(Duration::from_secs(700)))
        .await;

    // Immediate reconnect, no <r/> or ping probing first.
    assert_eq!(reconnect_events(&sent_events.read()), vec![(1, 0)]);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.status(), ConnectionStatus::Online);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_short_sleep_verifies_stream_with_sm() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session_with_sm("sm-1").await?;

    connection.set_stanza_handler(|element: &Element| {
        if element.is("r", "urn:xmpp:sm:3") {
            return vec![
                Element::from_str(r#"<a xmlns="urn:xmpp:sm:3" h="0"/>"#).unwrap(),
            ];
        }
        vec![]
    });

    session
        .notify_system_state(SystemState::Awake, Some(Duration::from_secs(30)))
        .await;

    assert_eq!(session.status(), ConnectionStatus::Online);
    assert!(reconnect_events(&sent_events.read()).is_empty());
    assert!(connection
        .sent_stanzas()
        .iter()
        .any(|stanza| stanza.is("r", "urn:xmpp:sm:3")));

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_verification_reconnects() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session_with_sm("sm-1").await?;

    // Script the eventual reconnect, but never answer the probe.
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

    let notify = session.notify_system_state(SystemState::Awake, Some(Duration::from_secs(30)));
    notify.await;

    assert!(!reconnect_events(&sent_events.read()).is_empty());

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_visible_cancels_pending_delay() -> Result<()> {
    let ConnectedSession {
        connection,
        session,
        sent_events,
        ..
    } = Session::connected_session().await?;

    // Drive the backoff up so the pending delay is long.
    connection.fail_next_connect(ConnectionError::Generic {
        msg: "still down".to_string(),
    });
    connection
        .disconnect_with_error(Some(ConnectionError::Generic {
            msg: "connection reset".to_string(),
        }))
        .await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Attempt 2 is now waiting out its 2s delay; becoming visible skips it.
    sent_events.write().clear();
    session.notify_system_state(SystemState::Visible, None).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(session.status(), ConnectionStatus::Online);

    Ok(())
}
