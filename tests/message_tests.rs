#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Parser tests for Dust IRC.
//!
//! Covers the properties every parsed line must hold, plus fixtures taken
//! from real server output and the JSON shape of messages and events.

use dust_irc::message::UNKNOWN_COMMAND;
use dust_irc::{EventKind, IrcEvent, Message, MessageKind, Reply, TagValue};

// ════════════════════════════════════════════════════════════════════
// Properties
// ════════════════════════════════════════════════════════════════════

const AWKWARD_INPUTS: &[&str] = &[
    "",
    " ",
    ":",
    "@",
    "@ ",
    "@;;; PING",
    ":prefix-only",
    "::weird PRIVMSG",
    "PRIVMSG",
    "PRIVMSG :",
    "PRIVMSG  #a  :  spaced  ",
    "@=x :n!u@h JOIN",
    "@k=%E2%82 PRIVMSG #c :half a euro sign",
    "\u{1F980} :emoji PRIVMSG",
    "NOTICE * :\x02bold\x02 and \x0304red",
    ":n!u@h PRIVMSG #c :embedded\0nul",
];

#[test]
fn parse_is_total_and_keeps_raw() {
    for input in AWKWARD_INPUTS {
        let msg = Message::parse(input);
        assert_eq!(msg.raw, *input, "raw must be preserved for {input:?}");
        assert!(!msg.command.is_empty(), "command empty for {input:?}");
        assert!(
            msg.params.iter().all(|p| !p.is_empty() && !p.contains(' ')),
            "bad params {:?} for {input:?}",
            msg.params
        );
    }
}

#[test]
fn numeric_iff_three_digits() {
    for (command, numeric) in [
        ("001", Some(1)),
        ("433", Some(433)),
        ("999", Some(999)),
        ("42", None),
        ("4333", None),
        ("4a3", None),
    ] {
        let msg = Message::parse(&format!(":srv {command} dust :text"));
        assert_eq!(msg.numeric, numeric, "command {command}");
        assert_eq!(
            msg.kind == MessageKind::Numeric,
            numeric.is_some(),
            "command {command}"
        );
    }
}

#[test]
fn from_requires_bang_in_prefix() {
    assert_eq!(Message::parse(":irc.example.org NOTICE * :hi").from, None);
    assert_eq!(
        Message::parse(":nick!user@host NOTICE * :hi").from.as_deref(),
        Some("nick")
    );
    assert_eq!(Message::parse("NOTICE * :hi").from, None);
}

#[test]
fn strict_parse_agrees_with_total_parse_on_clean_lines() {
    for input in AWKWARD_INPUTS
        .iter()
        .filter(|line| !line.contains('\0') && !line.contains("%E2%82"))
    {
        assert_eq!(Message::try_parse(input).unwrap(), Message::parse(input));
    }
}

#[test]
fn strict_parse_rejects_line_breaks() {
    for input in ["PRIVMSG #a :x\ry", "PRIVMSG #a :x\ny", "PING :\0"] {
        assert!(Message::try_parse(input).is_err(), "{input:?}");
    }
}

// ════════════════════════════════════════════════════════════════════
// Server fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn fixture_server_time_and_account_tags() {
    let msg = Message::parse(
        "@time=2024-05-01T12:00:00.000Z;account=alice;+draft/reply=abc \
         :alice!~a@user/alice PRIVMSG #rust :anyone around?",
    );
    assert_eq!(msg.tag("time"), Some("2024-05-01T12:00:00.000Z"));
    assert_eq!(msg.tag("account"), Some("alice"));
    assert_eq!(msg.tag("+draft/reply"), Some("abc"));
    assert_eq!(msg.from.as_deref(), Some("alice"));
    assert_eq!(msg.kind, MessageKind::Privmsg);
    assert_eq!(msg.text(), Some("anyone around?"));
}

#[test]
fn fixture_escaped_tag_value() {
    let msg = Message::parse("@msgid=a%3Bb%20c;bot :svc!s@h NOTICE dust :ok");
    assert_eq!(msg.tag("msgid"), Some("a;b c"));
    assert_eq!(msg.tags.as_ref().unwrap()["bot"], TagValue::Flag);
    assert_eq!(msg.tag("bot"), None);
}

#[test]
fn fixture_names_reply() {
    let msg = Message::parse(":irc.libera.chat 353 dust = #rust :dust @alice +bob");
    assert_eq!(msg.reply(), Some(Reply::NamReply));
    assert_eq!(msg.params, vec!["dust", "=", "#rust"]);
    assert_eq!(msg.text(), Some("dust @alice +bob"));
}

#[test]
fn fixture_join_forms() {
    let plain = Message::parse(":dust!~d@host JOIN #rust");
    let trailing = Message::parse(":dust!~d@host JOIN :#rust");
    let extended = Message::parse(":dust!~d@host JOIN #rust dust :Dust Bot");
    for msg in [&plain, &trailing, &extended] {
        assert_eq!(msg.kind, MessageKind::Join);
        assert_eq!(msg.channel(), Some("#rust"));
    }
}

#[test]
fn fixture_ping_and_pong() {
    let ping = Message::parse("PING :irc.libera.chat");
    assert_eq!(ping.kind, MessageKind::Ping);
    assert_eq!(ping.text(), Some("irc.libera.chat"));

    let pong = Message::parse(":irc.libera.chat PONG irc.libera.chat :token-1");
    assert_eq!(pong.kind, MessageKind::Ping);
    assert_eq!(pong.command, "PONG");
    assert_eq!(pong.text(), Some("token-1"));
}

#[test]
fn fixture_unknown_command_token() {
    let msg = Message::parse(":srv");
    assert_eq!(msg.command, UNKNOWN_COMMAND);
    assert_eq!(msg.prefix.as_deref(), Some("srv"));
}

// ════════════════════════════════════════════════════════════════════
// JSON shape
// ════════════════════════════════════════════════════════════════════

#[test]
fn message_json_skips_absent_fields() {
    let json = serde_json::to_value(Message::parse("PING :x")).unwrap();
    assert_eq!(json["command"], "PING");
    assert_eq!(json["type"], "ping");
    assert_eq!(json["trailing"], "x");
    assert!(json.get("tags").is_none());
    assert!(json.get("prefix").is_none());
    assert!(json.get("numeric").is_none());
}

#[test]
fn event_json_carries_name_and_payload() {
    let event = IrcEvent::from_message(Message::parse(":srv 001 dust :Welcome")).unwrap();
    assert_eq!(event.kind(), EventKind::Numeric);
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["event"], "numeric");
    assert_eq!(json["data"]["numeric"], 1);

    let json = serde_json::to_value(IrcEvent::Error {
        message: "boom".into(),
    })
    .unwrap();
    assert_eq!(json["event"], "error");
    assert_eq!(json["data"]["message"], "boom");
}
