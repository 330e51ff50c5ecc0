#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration-style engine tests for Dust IRC.
//!
//! Loopback connections exercise the self-echo path; the shared
//! `MockConnector` from `tests/common` scripts server traffic and records
//! what the engine writes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use dust_irc::{
    ConnectOptions, ConnectionState, ErrorKind, EventKind, IrcClient, IrcError, IrcEvent,
    OwnMessage, ReconnectPolicy, Registration, ServerInfo,
};
use tokio_test::{assert_err, assert_ok};

use common::{mock_client, test_config, within, EventLog, MockConnector};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn loopback_client() -> IrcClient {
    IrcClient::with_connector(test_config(), MockConnector::new())
}

/// Loopback options with a pump slow enough that queued lines stay put.
fn held() -> ConnectOptions {
    ConnectOptions::new().with_rate_limit(Duration::from_secs(5))
}

fn fast() -> ConnectOptions {
    ConnectOptions::new().with_rate_limit(Duration::from_millis(50))
}

fn real() -> ConnectOptions {
    fast().with_real(true)
}

async fn connected_loopback(nick: &str) -> IrcClient {
    let client = loopback_client();
    client.connect("irc.test", 6667, nick, held()).await.unwrap();
    client
}

// ════════════════════════════════════════════════════════════════════
// Connect / disconnect lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn connect_echoes_info_for_valid_arguments() {
    for (host, port, nick) in [
        ("irc.libera.chat", 6667, "dust"),
        ("127.0.0.1", 1, "a"),
        ("localhost", 65_535, "Nick[away]"),
    ] {
        let client = loopback_client();
        assert_ok!(client.connect(host, port, nick, held()).await);
        assert!(client.is_connected());
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(
            client.info(),
            Some(ServerInfo {
                host: host.into(),
                port,
                nick: nick.into(),
            })
        );
        client.shutdown().await;
    }
}

#[tokio::test]
async fn invalid_arguments_fail_before_transport() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);

    let err = client.connect("irc.test", 0, "dust", real()).await.unwrap_err();
    assert!(matches!(err, IrcError::InvalidArgument(_)));
    assert_eq!(err.kind(), ErrorKind::Argument);

    let err = client.connect("   ", 6667, "dust", real()).await.unwrap_err();
    assert!(matches!(err, IrcError::InvalidArgument(_)));

    let err = client.connect("irc.test", 6667, "\r\n", real()).await.unwrap_err();
    assert!(matches!(err, IrcError::InvalidArgument(_)));

    assert!(connector.last_target().is_none());
    assert_eq!(client.info(), None);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn blank_registration_user_fails_before_transport() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);

    let err = client
        .connect(
            "irc.test",
            6667,
            "dust",
            real().with_auto_register(true).with_user("   "),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IrcError::InvalidArgument(_)));
    assert!(connector.last_target().is_none());
    assert!(!client.is_connected());
    assert!(client.pending_commands().is_empty());
    assert!(log.events().is_empty());

    // Nothing is left behind: a corrected connect goes through.
    client
        .connect(
            "irc.test",
            6667,
            "dust",
            held().with_real(true).with_auto_register(true),
        )
        .await
        .unwrap();
    assert!(client.is_connected());
    assert_eq!(
        client.pending_commands(),
        vec!["NICK dust", "USER dust 0 * :dust"]
    );
    client.shutdown().await;
}

#[tokio::test]
async fn second_connect_is_a_state_error() {
    let client = connected_loopback("dust").await;
    let err = client.connect("irc.test", 6667, "dust", held()).await.unwrap_err();
    assert!(matches!(err, IrcError::AlreadyConnected));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(client.is_connected());
    client.shutdown().await;
}

#[tokio::test]
async fn connect_and_disconnect_publish_events() {
    let client = loopback_client();
    let log = EventLog::attach(&client);

    client.connect("irc.test", 6667, "dust", held()).await.unwrap();
    client.disconnect();
    client.disconnect();

    assert_eq!(log.kinds(), vec![EventKind::Connect, EventKind::Disconnect]);
    assert!(!client.is_connected());
    assert_eq!(client.info(), None);
    assert!(client.joined_channels().is_empty());
    assert_eq!(client.current_channel(), None);
}

#[tokio::test]
async fn disconnect_on_fresh_client_is_silent() {
    let client = loopback_client();
    let log = EventLog::attach(&client);
    client.disconnect();
    assert!(log.events().is_empty());
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_resets_channels_and_queue() {
    let client = connected_loopback("dust").await;
    client.handle_inbound_line(":dust!u@h JOIN #rust");
    client.send_message("queued", None).unwrap();
    assert_eq!(client.pending_commands().len(), 1);

    client.disconnect();

    assert!(client.pending_commands().is_empty());
    assert!(client.joined_channels().is_empty());
    assert_eq!(client.nick(), None);
    assert!(matches!(
        client.send_message("late", Some("#rust")),
        Err(IrcError::NotConnected)
    ));
}

#[tokio::test]
async fn real_mode_uses_injected_connector_with_tls_on_secure_port() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);

    client.connect("irc.test", 6697, "dust", real()).await.unwrap();
    let target = connector.last_target().unwrap();
    assert_eq!(target.host, "irc.test");
    assert_eq!(target.port, 6697);
    assert!(target.tls);
    client.shutdown().await;
    assert!(connector.was_closed());

    client
        .connect("irc.test", 6667, "dust", real().with_tls(true))
        .await
        .unwrap();
    assert!(connector.last_target().unwrap().tls);
    client.shutdown().await;
}

#[tokio::test]
async fn loopback_mode_never_touches_connector() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    client.connect("irc.test", 6667, "dust", held()).await.unwrap();
    assert!(connector.last_target().is_none());
    client.shutdown().await;
}

#[tokio::test]
async fn connect_failure_publishes_error_and_keeps_info() {
    let connector = MockConnector::new();
    connector.fail_next(1);
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);

    let err = client.connect("irc.test", 6667, "dust", real()).await.unwrap_err();
    assert!(matches!(err, IrcError::Io(_)));
    assert_eq!(err.kind(), ErrorKind::Network);
    assert_eq!(log.kinds(), vec![EventKind::Error]);
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.info().map(|i| i.host), Some("irc.test".to_string()));

    // The failed attempt leaves the engine ready for another one.
    assert_ok!(client.connect("irc.test", 6667, "dust", real()).await);
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_timeout_elapses() {
    let connector = MockConnector::new();
    connector.set_delay(Duration::from_secs(30));
    let client = mock_client(&connector);

    let err = client
        .connect(
            "irc.test",
            6667,
            "dust",
            real().with_timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, IrcError::ConnectTimeout));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_while_connecting_aborts_connect() {
    let connector = MockConnector::new();
    connector.set_delay(Duration::from_millis(100));
    let client = mock_client(&connector);

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.connect("irc.test", 6667, "dust", real()).await })
    };
    within(async {
        while client.state() != ConnectionState::Connecting {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    client.disconnect();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(IrcError::ConnectAborted)));
    assert!(connector.was_closed());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn remote_close_publishes_disconnect_and_keeps_info() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    connector.close_remote();
    log.wait_for(EventKind::Disconnect, 1).await;

    assert!(!client.is_connected());
    assert!(connector.was_closed());
    assert_eq!(client.info().map(|i| i.nick), Some("dust".to_string()));
    assert_eq!(log.count(EventKind::Error), 0);
}

#[tokio::test]
async fn remote_close_forgets_channels() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);
    client.connect("irc.a", 6667, "dust", real()).await.unwrap();
    connector.push_line(":dust!u@h JOIN #old");
    log.wait_for(EventKind::Join, 1).await;
    assert_eq!(client.current_channel().as_deref(), Some("#old"));

    connector.close_remote();
    log.wait_for(EventKind::Disconnect, 1).await;
    assert!(client.joined_channels().is_empty());
    assert_eq!(client.current_channel(), None);

    client
        .connect("irc.b", 6667, "dust", held().with_real(true))
        .await
        .unwrap();
    assert!(client.joined_channels().is_empty());
    assert!(matches!(
        client.send_message("hi", None),
        Err(IrcError::NoTarget)
    ));
    assert!(client.pending_commands().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn receive_error_publishes_error_then_disconnect() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    connector.push_error("connection reset");
    log.wait_for(EventKind::Disconnect, 1).await;

    assert_eq!(
        log.kinds(),
        vec![EventKind::Connect, EventKind::Error, EventKind::Disconnect]
    );
    assert!(!client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Reconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn reconnect_without_history_returns_false() {
    let client = loopback_client();
    assert!(!client.reconnect(ReconnectPolicy::default()).await);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn reconnect_after_remote_close_restores_session() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    connector.close_remote();
    log.wait_for(EventKind::Disconnect, 1).await;

    assert!(client.reconnect(ReconnectPolicy::default()).await);
    assert!(client.is_connected());
    assert_eq!(connector.opened(), 2);
    assert_eq!(client.info().map(|i| i.port), Some(6667));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_gives_up_after_max_attempts_with_backoff() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();
    connector.close_remote();
    log.wait_for(EventKind::Disconnect, 1).await;

    connector.fail_next(3);
    let started = tokio::time::Instant::now();
    let policy = ReconnectPolicy::new()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(100));
    assert!(!client.reconnect(policy).await);

    // 100 ms + 200 ms between the three attempts, no sleep after the last.
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(300));
    assert!(waited < Duration::from_millis(700));
    assert_eq!(connector.opened(), 1);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn reconnect_succeeds_after_transient_failures() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    connector.fail_next(2);
    let policy = ReconnectPolicy::new().with_base_delay(Duration::from_millis(5));
    assert!(client.reconnect(policy).await);
    assert_eq!(connector.opened(), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn handler_can_schedule_reconnect() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);

    let handle = client.clone();
    client.on(EventKind::Disconnect, move |_| {
        let handle = handle.clone();
        tokio::spawn(async move {
            handle
                .reconnect(ReconnectPolicy::new().with_max_attempts(1))
                .await
        });
    });

    client.connect("irc.test", 6667, "dust", real()).await.unwrap();
    connector.close_remote();

    log.wait_for(EventKind::Connect, 2).await;
    assert!(client.is_connected());
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Commands
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn commands_require_connection() {
    let client = loopback_client();
    assert!(matches!(client.send_message("hi", Some("#x")), Err(IrcError::NotConnected)));
    assert!(matches!(client.send_join("#x", None), Err(IrcError::NotConnected)));
    assert!(matches!(client.send_part(Some("#x"), None), Err(IrcError::NotConnected)));
    assert!(matches!(client.send_nick("dust"), Err(IrcError::NotConnected)));
    assert!(matches!(client.send_user("dust", "Dust"), Err(IrcError::NotConnected)));
    assert!(matches!(client.send_pass("pw"), Err(IrcError::NotConnected)));
    assert!(matches!(client.send_identify("pw"), Err(IrcError::NotConnected)));
    assert!(matches!(client.register(&Registration::new()), Err(IrcError::NotConnected)));
    assert!(matches!(client.send_quit(None), Err(IrcError::NotConnected)));
    assert!(matches!(client.enqueue_raw("PING :x"), Err(IrcError::NotConnected)));
}

#[tokio::test]
async fn send_message_needs_a_target() {
    let client = connected_loopback("dust").await;
    let err = client.send_message("hi", None).unwrap_err();
    assert!(matches!(err, IrcError::NoTarget));
    assert_eq!(err.kind(), ErrorKind::State);
    assert!(client.pending_commands().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn send_message_defaults_to_current_channel() {
    let client = connected_loopback("dust").await;
    let log = EventLog::attach(&client);
    client.handle_inbound_line(":dust!u@h JOIN #x");

    client.send_message("hi", None).unwrap();

    assert_eq!(client.pending_commands(), vec!["PRIVMSG #x :hi"]);
    let own = log
        .events()
        .into_iter()
        .find_map(|event| match event {
            IrcEvent::Message(own) => Some(own),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        own,
        OwnMessage {
            from: "dust".into(),
            text: "hi".into(),
            target: "#x".into(),
        }
    );
    client.shutdown().await;
}

#[tokio::test]
async fn control_characters_cannot_inject_commands() {
    let client = connected_loopback("dust").await;
    client.send_message("hi\r\nQUIT :bye", Some("bob\r\n")).unwrap();
    client.send_join("#evil\r\nQUIT", None).unwrap();
    client.enqueue_raw("NOTICE bob :a\nb").unwrap();
    assert_eq!(
        client.pending_commands(),
        vec!["PRIVMSG bob :hiQUIT :bye", "JOIN #evilQUIT", "NOTICE bob :ab"]
    );
    client.shutdown().await;
}

#[tokio::test]
async fn join_adds_prefix_and_key() {
    let client = connected_loopback("dust").await;
    client.send_join("nohash", None).unwrap();
    client.send_join("#secret", Some("hunter2")).unwrap();
    client.send_join("&local", Some("")).unwrap();
    assert_eq!(
        client.pending_commands(),
        vec!["JOIN #nohash", "JOIN #secret hunter2", "JOIN &local"]
    );

    let err = client.send_join(&"c".repeat(80), None).unwrap_err();
    assert!(matches!(err, IrcError::InvalidArgument(_)));
    client.shutdown().await;
}

#[tokio::test]
async fn part_defaults_to_current_channel() {
    let client = connected_loopback("dust").await;
    assert!(matches!(client.send_part(None, None), Err(IrcError::NoChannel)));

    client.handle_inbound_line(":dust!u@h JOIN #test");
    client.send_part(None, Some("bye")).unwrap();
    client.send_part(Some("other"), None).unwrap();
    client.send_part(None, Some("")).unwrap();
    assert_eq!(
        client.pending_commands(),
        vec!["PART #test :bye", "PART #other", "PART #test :"]
    );
    client.shutdown().await;
}

#[tokio::test]
async fn registration_lines_and_helpers() {
    let client = connected_loopback("dust").await;
    client
        .register(&Registration::new().with_password("secret"))
        .unwrap();
    client
        .register(&Registration::new().with_user("u").with_realname("Real Name"))
        .unwrap();
    client.send_identify("pw").unwrap();
    client.send_quit(Some("gone")).unwrap();
    client.send_quit(None).unwrap();
    client.send_raw("CAP LS 302").unwrap();

    assert_eq!(
        client.pending_commands(),
        vec![
            "PASS secret",
            "NICK dust",
            "USER dust 0 * :dust",
            "NICK dust",
            "USER u 0 * :Real Name",
            "PRIVMSG NickServ :IDENTIFY pw",
            "QUIT :gone",
            "QUIT",
            "CAP LS 302",
        ]
    );
    client.shutdown().await;
}

#[tokio::test]
async fn auto_register_and_auto_join_on_connect() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let options = real()
        .with_auto_register(true)
        .with_user("duster")
        .with_realname("Dust Bot")
        .with_password("pw")
        .with_auto_join(["rust", "#tokio"]);

    client.connect("irc.test", 6667, "dust", options).await.unwrap();
    connector.wait_for_sent(|line| line == "JOIN #tokio").await;

    assert_eq!(
        connector.sent(),
        vec![
            "PASS pw",
            "NICK dust",
            "USER duster 0 * :Dust Bot",
            "JOIN #rust",
            "JOIN #tokio",
        ]
    );
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Channel tracking
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn self_join_twice_keeps_one_entry() {
    let client = connected_loopback("dust").await;
    client.handle_inbound_line(":dust!u@h JOIN #x");
    client.handle_inbound_line(":Dust!u@h JOIN :#X");
    assert_eq!(client.joined_channels(), vec!["#x"]);
    assert_eq!(client.current_channel().as_deref(), Some("#x"));
    client.shutdown().await;
}

#[tokio::test]
async fn other_users_do_not_change_channels() {
    let client = connected_loopback("dust").await;
    client.handle_inbound_line(":alice!u@h JOIN #x");
    client.handle_inbound_line(":irc.test JOIN #y");
    client.handle_inbound_line("JOIN #z");
    assert!(client.joined_channels().is_empty());
    assert_eq!(client.current_channel(), None);
    client.shutdown().await;
}

#[tokio::test]
async fn self_part_reassigns_current() {
    let client = connected_loopback("dust").await;
    client.handle_inbound_line(":dust!u@h JOIN #a");
    client.handle_inbound_line(":dust!u@h JOIN #b");
    assert_eq!(client.current_channel().as_deref(), Some("#a"));

    client.handle_inbound_line(":dust!u@h PART #a :bye");
    assert_eq!(client.joined_channels(), vec!["#b"]);
    assert_eq!(client.current_channel().as_deref(), Some("#b"));

    client.handle_inbound_line(":dust!u@h PART #b");
    assert!(client.joined_channels().is_empty());
    assert_eq!(client.current_channel(), None);
    client.shutdown().await;
}

#[tokio::test]
async fn set_current_channel_only_accepts_joined() {
    let client = connected_loopback("dust").await;
    client.handle_inbound_line(":dust!u@h JOIN #a");
    client.handle_inbound_line(":dust!u@h JOIN #b");

    assert_ok!(client.set_current_channel(Some("b")));
    assert_eq!(client.current_channel().as_deref(), Some("#b"));

    let err = assert_err!(client.set_current_channel(Some("#elsewhere")));
    assert!(matches!(err, IrcError::InvalidArgument(_)));
    assert_eq!(client.current_channel().as_deref(), Some("#b"));

    assert_ok!(client.set_current_channel(None));
    assert_eq!(client.current_channel(), None);
    client.shutdown().await;
}

#[tokio::test]
async fn self_nick_change_is_followed() {
    let client = connected_loopback("dust").await;
    client.handle_inbound_line(":dust!u@h NICK :dusty");
    assert_eq!(client.nick().as_deref(), Some("dusty"));

    client.handle_inbound_line(":dusty!u@h JOIN #after");
    assert_eq!(client.joined_channels(), vec!["#after"]);
    client.handle_inbound_line(":dust!u@h JOIN #stale");
    assert_eq!(client.joined_channels(), vec!["#after"]);
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Outbound queue and pump
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn queue_overflow_drops_oldest_and_keeps_newest() {
    let client = connected_loopback("dust").await;
    for i in 0..1001 {
        client.enqueue_raw(&format!("PRIVMSG #x :{i}")).unwrap();
    }

    let pending = client.pending_commands();
    assert!(pending.len() <= 1000);
    assert_eq!(pending.len(), 901);
    assert_eq!(pending.first().map(String::as_str), Some("PRIVMSG #x :100"));
    assert_eq!(pending.last().map(String::as_str), Some("PRIVMSG #x :1000"));
    assert_eq!(client.dropped_commands(), 100);
    client.shutdown().await;
}

#[tokio::test]
async fn pump_writes_in_fifo_order() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    client.send_nick("dust").unwrap();
    client.send_join("#a", None).unwrap();
    client.send_message("hello", Some("#a")).unwrap();
    connector.wait_for_sent(|line| line.starts_with("PRIVMSG")).await;

    assert_eq!(
        connector.sent(),
        vec!["NICK dust", "JOIN #a", "PRIVMSG #a :hello"]
    );
    assert!(client.pending_commands().is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn disconnect_discards_unsent_lines() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    client
        .connect("irc.test", 6667, "dust", real().with_rate_limit(Duration::from_secs(5)))
        .await
        .unwrap();
    client.send_message("never sent", Some("#a")).unwrap();
    client.shutdown().await;
    assert!(connector.sent().is_empty());
    assert!(connector.was_closed());
}

#[tokio::test]
async fn loopback_echoes_own_privmsg_as_event() {
    let client = loopback_client();
    let log = EventLog::attach(&client);
    client.connect("irc.test", 6667, "dust", fast()).await.unwrap();

    client.send_message("hello", Some("#x")).unwrap();
    log.wait_for(EventKind::Privmsg, 1).await;

    let privmsg = log
        .events()
        .into_iter()
        .find_map(|event| match event {
            IrcEvent::Privmsg(msg) => Some(msg),
            _ => None,
        })
        .unwrap();
    assert_eq!(privmsg.target(), Some("#x"));
    assert_eq!(privmsg.text(), Some("hello"));
    assert_eq!(
        log.kinds(),
        vec![
            EventKind::Connect,
            EventKind::Message,
            EventKind::Raw,
            EventKind::Privmsg
        ]
    );
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Inbound handling
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn inbound_line_publishes_raw_then_typed() {
    let client = loopback_client();
    let log = EventLog::attach(&client);

    client.handle_inbound_line(":alice!a@h PRIVMSG #x :hi there");
    client.handle_inbound_line("CAP * ACK :multi-prefix");
    client.handle_inbound_line(":srv 433 * dust :Nickname is already in use");

    let events = log.events();
    assert_eq!(
        log.kinds(),
        vec![
            EventKind::Raw,
            EventKind::Privmsg,
            EventKind::Raw,
            EventKind::Raw,
            EventKind::Numeric
        ]
    );
    assert_eq!(
        events[0],
        IrcEvent::Raw(":alice!a@h PRIVMSG #x :hi there".into())
    );
    let numeric = events[4].message().unwrap();
    assert_eq!(numeric.numeric, Some(433));
    assert_eq!(numeric.reply(), Some(dust_irc::Reply::NicknameInUse));
}

#[tokio::test]
async fn malformed_line_becomes_error_event() {
    let client = loopback_client();
    let log = EventLog::attach(&client);

    client.handle_inbound_line("PRIVMSG #x :bad\0byte");
    client.handle_inbound_line("PING :still-alive");

    assert_eq!(
        log.kinds(),
        vec![EventKind::Raw, EventKind::Error, EventKind::Raw, EventKind::Ping]
    );
}

#[tokio::test]
async fn server_lines_arrive_in_order() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    let log = EventLog::attach(&client);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    connector.push_line(":irc.test 001 dust :Welcome");
    connector.push_line(":dust!u@h JOIN #a");
    connector.push_line(":bob!b@h PRIVMSG #a :yo");
    connector.push_line(":bob!b@h QUIT :later");
    log.wait_for(EventKind::Quit, 1).await;

    let typed: Vec<EventKind> = log
        .kinds()
        .into_iter()
        .filter(|kind| *kind != EventKind::Raw)
        .collect();
    assert_eq!(
        typed,
        vec![
            EventKind::Connect,
            EventKind::Numeric,
            EventKind::Join,
            EventKind::Privmsg,
            EventKind::Quit
        ]
    );
    assert_eq!(client.joined_channels(), vec!["#a"]);
    client.shutdown().await;
}

#[tokio::test]
async fn server_ping_gets_pong() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    connector.push_line("PING :irc.test");
    let pong = connector.wait_for_sent(|line| line.starts_with("PONG")).await;
    assert_eq!(pong, "PONG :irc.test");
    client.shutdown().await;
}

#[tokio::test]
async fn auto_pong_can_be_disabled() {
    let client = loopback_client();
    client
        .connect("irc.test", 6667, "dust", held().with_auto_pong(false))
        .await
        .unwrap();
    client.handle_inbound_line("PING :irc.test");
    assert!(client.pending_commands().is_empty());
    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Ping
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn ping_requires_connection() {
    let client = loopback_client();
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, IrcError::NotConnected));
    assert_eq!(err.kind(), ErrorKind::State);
}

#[tokio::test]
async fn loopback_ping_resolves() {
    let client = loopback_client();
    client.connect("irc.test", 6667, "dust", fast()).await.unwrap();
    let elapsed = within(client.ping()).await.unwrap();
    assert!(elapsed < Duration::from_secs(5));
    assert!(client.pending_commands().is_empty());
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn loopback_ping_skips_queued_backlog() {
    let client = loopback_client();
    client
        .connect("irc.test", 6667, "dust", ConnectOptions::new())
        .await
        .unwrap();
    for _ in 0..12 {
        client.enqueue_raw("NOTICE x :i").unwrap();
    }

    let elapsed = client.ping().await.unwrap();
    assert!(elapsed < Duration::from_millis(100));
    assert_eq!(client.pending_commands().len(), 12);
    client.shutdown().await;
}

#[tokio::test]
async fn ping_matches_server_pong() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    let pinging = {
        let client = client.clone();
        tokio::spawn(async move { client.ping().await })
    };
    let line = connector.wait_for_sent(|line| line.starts_with("PING :")).await;
    let token = line.trim_start_matches("PING :");

    connector.push_line(":irc.test PONG irc.test :not-the-token");
    connector.push_line(&format!(":irc.test PONG irc.test :{token}"));

    let elapsed = within(pinging).await.unwrap().unwrap();
    assert!(elapsed < Duration::from_secs(5));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ping_times_out_without_reply() {
    let connector = MockConnector::new();
    let client = IrcClient::with_connector(
        test_config().with_ping_timeout(Duration::from_secs(1)),
        Arc::clone(&connector) as Arc<dyn dust_irc::Connector>,
    );
    client.connect("irc.test", 6667, "dust", real()).await.unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, IrcError::PingTimeout));
    client.shutdown().await;
}

#[tokio::test]
async fn ping_fails_when_session_ends() {
    let connector = MockConnector::new();
    let client = mock_client(&connector);
    client
        .connect("irc.test", 6667, "dust", real().with_rate_limit(Duration::from_secs(5)))
        .await
        .unwrap();

    let pinging = {
        let client = client.clone();
        tokio::spawn(async move { client.ping().await })
    };
    within(async {
        while client.pending_commands().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    connector.close_remote();

    let result = within(pinging).await.unwrap();
    assert!(matches!(result, Err(IrcError::TransportClosed)));
}

// ════════════════════════════════════════════════════════════════════
// Subscriptions
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn subscribe_forwards_events() {
    let client = loopback_client();
    let (_id, mut events) = client.subscribe();

    client.connect("irc.test", 6667, "dust", held()).await.unwrap();
    client.handle_inbound_line(":a!b@c NOTICE dust :hi");

    assert_eq!(within(events.recv()).await, Some(IrcEvent::Connected));
    assert!(matches!(within(events.recv()).await, Some(IrcEvent::Raw(_))));
    assert!(matches!(
        within(events.recv()).await,
        Some(IrcEvent::Notice(_))
    ));
    client.shutdown().await;
}

#[tokio::test]
async fn off_stops_delivery() {
    let client = loopback_client();
    let log = EventLog::attach(&client);
    let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let id = client.on(EventKind::Raw, move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });

    client.handle_inbound_line("PING :1");
    assert!(client.off(id));
    client.handle_inbound_line("PING :2");

    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(log.count(EventKind::Raw), 2);
}
