//! IRC line parser.
//!
//! Turns one wire line of the shape
//! `[@tags ][:prefix ]COMMAND [params...][ :trailing]` into a [`Message`].
//! Parsing never touches any state and never performs I/O.
//!
//! Two entry points exist:
//!
//! - [`Message::parse`] is total. Every input, including `""`, yields a
//!   well-formed message.
//! - [`Message::try_parse`] is the strict variant used on inbound data. It
//!   rejects lines carrying NUL, CR or LF bytes and tag values whose
//!   percent-decoding is not valid UTF-8.

use std::collections::BTreeMap;
use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Serialize, Serializer};

use crate::error::{IrcError, Result};
use crate::numeric::Reply;
use crate::validate::irc_eq;

/// Command reported for lines that carry no command token.
pub const UNKNOWN_COMMAND: &str = "UNKNOWN";

/// IRCv3 message tags, keyed by tag name.
pub type Tags = BTreeMap<String, TagValue>;

/// Value of a single message tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// `key=value` form, with the value percent-decoded.
    Text(String),
    /// Bare `key` form.
    Flag,
}

impl TagValue {
    /// Returns the text value, or `None` for a bare flag.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Flag => None,
        }
    }
}

impl Serialize for TagValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Text(value) => serializer.serialize_str(value),
            Self::Flag => serializer.serialize_bool(true),
        }
    }
}

/// Classification of a parsed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Privmsg,
    Notice,
    Join,
    Part,
    Nick,
    Quit,
    /// Both `PING` and `PONG`, so latency checks can match either direction.
    Ping,
    Numeric,
    Other,
}

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// The line exactly as received.
    pub raw: String,
    /// Tag segment, present only when the line started with `@`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
    /// Origin prefix without the leading colon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Sender nickname, present only for `nick!user@host` prefixes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    /// Final parameter introduced by `:`. `Some("")` for a bare colon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailing: Option<String>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Three-digit reply code for [`MessageKind::Numeric`] lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub numeric: Option<u16>,
}

impl Message {
    /// Parse a line. Never fails.
    ///
    /// ```
    /// use dust_irc::message::{Message, MessageKind};
    ///
    /// let msg = Message::parse("PRIVMSG #chan :hello world");
    /// assert_eq!(msg.kind, MessageKind::Privmsg);
    /// assert_eq!(msg.params, vec!["#chan".to_string()]);
    /// assert_eq!(msg.trailing.as_deref(), Some("hello world"));
    /// ```
    pub fn parse(raw: &str) -> Self {
        match Self::build(raw, false) {
            Ok(msg) => msg,
            Err(_) => Self::unknown(raw),
        }
    }

    /// Parse a line, rejecting input that cannot have come off a well-behaved wire.
    ///
    /// # Errors
    ///
    /// Returns [`IrcError::Parse`] if the line contains NUL, CR or LF, or a tag
    /// value that does not percent-decode to UTF-8.
    pub fn try_parse(raw: &str) -> Result<Self> {
        Self::build(raw, true)
    }

    fn build(raw: &str, strict: bool) -> Result<Self> {
        if strict {
            if let Some(bad) = raw.chars().find(|c| matches!(c, '\0' | '\r' | '\n')) {
                return Err(IrcError::Parse(format!(
                    "line contains forbidden character {bad:?}"
                )));
            }
        }

        let mut rest = raw;

        let mut tags = None;
        if let Some(tagged) = rest.strip_prefix('@') {
            let (segment, remainder) = tagged.split_once(' ').unwrap_or((tagged, ""));
            tags = Some(parse_tags(segment, strict)?);
            rest = remainder;
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (origin, remainder) = prefixed.split_once(' ').unwrap_or((prefixed, ""));
            prefix = Some(origin.to_owned());
            rest = remainder;
        }

        let mut tokens = rest.split(' ');
        let command = tokens
            .next()
            .filter(|token| !token.is_empty())
            .unwrap_or(UNKNOWN_COMMAND)
            .to_owned();

        let mut params = Vec::new();
        let mut trailing = None;
        while let Some(token) = tokens.next() {
            if let Some(first) = token.strip_prefix(':') {
                let mut text = first.to_owned();
                for more in tokens.by_ref() {
                    text.push(' ');
                    text.push_str(more);
                }
                trailing = Some(text);
                break;
            }
            if !token.is_empty() {
                params.push(token.to_owned());
            }
        }

        let from = prefix
            .as_deref()
            .and_then(|p| p.split_once('!'))
            .filter(|(nick, _)| !nick.is_empty())
            .map(|(nick, _)| nick.to_owned());

        let (kind, numeric) = classify(&command);

        Ok(Self {
            raw: raw.to_owned(),
            tags,
            prefix,
            from,
            command,
            params,
            trailing,
            kind,
            numeric,
        })
    }

    fn unknown(raw: &str) -> Self {
        Self {
            raw: raw.to_owned(),
            tags: None,
            prefix: None,
            from: None,
            command: UNKNOWN_COMMAND.to_owned(),
            params: Vec::new(),
            trailing: None,
            kind: MessageKind::Other,
            numeric: None,
        }
    }

    /// First positional parameter, usually the channel or nickname addressed.
    pub fn target(&self) -> Option<&str> {
        self.params.first().map(String::as_str)
    }

    /// Message body: the trailing parameter, or the last positional one.
    pub fn text(&self) -> Option<&str> {
        self.trailing
            .as_deref()
            .or_else(|| self.params.last().map(String::as_str))
    }

    /// Channel named by a JOIN or PART. Servers send both `JOIN #c` and `JOIN :#c`.
    pub fn channel(&self) -> Option<&str> {
        self.target().or(self.trailing.as_deref())
    }

    /// Named numeric reply, for [`MessageKind::Numeric`] lines.
    pub fn reply(&self) -> Option<Reply> {
        self.numeric.map(Reply::from_code)
    }

    /// Value of a tag, if present with a value.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.as_ref()?.get(key)?.as_str()
    }

    /// Returns `true` if the derived sender is `nick` under IRC casemapping.
    pub fn is_from(&self, nick: &str) -> bool {
        self.from.as_deref().is_some_and(|from| irc_eq(from, nick))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_tags(segment: &str, strict: bool) -> Result<Tags> {
    let mut tags = Tags::new();
    for entry in segment.split(';').filter(|entry| !entry.is_empty()) {
        match entry.split_once('=') {
            Some((key, value)) => {
                tags.insert(key.to_owned(), TagValue::Text(decode_tag_value(value, strict)?));
            }
            None => {
                tags.insert(entry.to_owned(), TagValue::Flag);
            }
        }
    }
    Ok(tags)
}

fn decode_tag_value(value: &str, strict: bool) -> Result<String> {
    match percent_decode_str(value).decode_utf8() {
        Ok(decoded) => Ok(decoded.into_owned()),
        Err(_) if !strict => Ok(value.to_owned()),
        Err(e) => Err(IrcError::Parse(format!("bad tag value {value:?}: {e}"))),
    }
}

fn classify(command: &str) -> (MessageKind, Option<u16>) {
    let upper = command.to_ascii_uppercase();
    let kind = match upper.as_str() {
        "PRIVMSG" => MessageKind::Privmsg,
        "NOTICE" => MessageKind::Notice,
        "JOIN" => MessageKind::Join,
        "PART" => MessageKind::Part,
        "NICK" => MessageKind::Nick,
        "QUIT" => MessageKind::Quit,
        "PING" | "PONG" => MessageKind::Ping,
        code if code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()) => {
            return (MessageKind::Numeric, code.parse().ok());
        }
        _ => MessageKind::Other,
    };
    (kind, None)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn empty_line_is_unknown() {
        let msg = Message::parse("");
        assert_eq!(msg.command, "UNKNOWN");
        assert_eq!(msg.kind, MessageKind::Other);
        assert!(msg.params.is_empty());
        assert!(msg.trailing.is_none());
    }

    #[test]
    fn tags_prefix_and_trailing() {
        let msg = Message::parse("@a=1;b :x PING :y");
        let tags = msg.tags.as_ref().unwrap();
        assert_eq!(tags["a"], TagValue::Text("1".into()));
        assert_eq!(tags["b"], TagValue::Flag);
        assert_eq!(msg.prefix.as_deref(), Some("x"));
        assert!(msg.from.is_none());
        assert_eq!(msg.kind, MessageKind::Ping);
        assert_eq!(msg.trailing.as_deref(), Some("y"));
    }

    #[test]
    fn tag_values_are_percent_decoded() {
        let msg = Message::parse("@time=2024%2D01%2D01;label=a%20b PRIVMSG #c :x");
        assert_eq!(msg.tag("time"), Some("2024-01-01"));
        assert_eq!(msg.tag("label"), Some("a b"));
    }

    #[test]
    fn tag_only_line_has_empty_remainder() {
        let msg = Message::parse("@key1=value1;key2");
        assert_eq!(msg.tags.as_ref().map(BTreeMap::len), Some(2));
        assert_eq!(msg.command, "UNKNOWN");
    }

    #[test]
    fn nick_prefix_derives_from() {
        let msg = Message::parse(":alice!al@example.org PRIVMSG #rust :hi there");
        assert_eq!(msg.from.as_deref(), Some("alice"));
        assert_eq!(msg.prefix.as_deref(), Some("alice!al@example.org"));
        assert_eq!(msg.target(), Some("#rust"));
        assert_eq!(msg.text(), Some("hi there"));
    }

    #[test]
    fn empty_nick_in_prefix_has_no_sender() {
        let msg = Message::parse(":!user@host PRIVMSG #rust :hi");
        assert_eq!(msg.prefix.as_deref(), Some("!user@host"));
        assert!(msg.from.is_none());
        assert!(!msg.is_from(""));
    }

    #[test]
    fn bare_colon_is_empty_trailing() {
        let msg = Message::parse("PART #test :");
        assert_eq!(msg.trailing.as_deref(), Some(""));
        let msg = Message::parse("PART #test");
        assert!(msg.trailing.is_none());
    }

    #[test]
    fn repeated_spaces_are_skipped_in_params() {
        let msg = Message::parse("MODE  #chan   +o   bob");
        assert_eq!(msg.params, vec!["#chan", "+o", "bob"]);
    }

    #[test]
    fn trailing_keeps_inner_spacing() {
        let msg = Message::parse("PRIVMSG #c :a  b :c");
        assert_eq!(msg.trailing.as_deref(), Some("a  b :c"));
    }

    #[test]
    fn numerics_are_classified() {
        let msg = Message::parse(":irc.example.org 001 dust :Welcome");
        assert_eq!(msg.kind, MessageKind::Numeric);
        assert_eq!(msg.numeric, Some(1));
        assert_eq!(msg.reply(), Some(Reply::Welcome));

        let msg = Message::parse(":srv 12 x");
        assert_eq!(msg.kind, MessageKind::Other);
        assert!(msg.numeric.is_none());
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(Message::parse("privmsg #a :b").kind, MessageKind::Privmsg);
        assert_eq!(Message::parse("pong :tok").kind, MessageKind::Ping);
        assert_eq!(Message::parse(":u!h QUIT :bye").kind, MessageKind::Quit);
    }

    #[test]
    fn join_channel_from_trailing_form() {
        assert_eq!(Message::parse(":n!u@h JOIN :#rust").channel(), Some("#rust"));
        assert_eq!(Message::parse(":n!u@h JOIN #rust").channel(), Some("#rust"));
    }

    #[test]
    fn strict_rejects_nul() {
        let err = Message::try_parse("PRIVMSG #a :x\0y").unwrap_err();
        assert!(matches!(err, IrcError::Parse(_)));
        assert_eq!(Message::parse("PRIVMSG #a :x\0y").kind, MessageKind::Privmsg);
    }

    #[test]
    fn strict_rejects_non_utf8_tag_value_but_lenient_keeps_it() {
        let line = "@k=%FF PRIVMSG #a :x";
        assert!(matches!(Message::try_parse(line), Err(IrcError::Parse(_))));
        let msg = Message::parse(line);
        assert_eq!(msg.tag("k"), Some("%FF"));
    }

    #[test]
    fn is_from_uses_casemapping() {
        let msg = Message::parse(":Dust[a]!u@h JOIN #x");
        assert!(msg.is_from("dust{a}"));
        assert!(!msg.is_from("other"));
    }

    #[test]
    fn serializes_with_type_field() {
        let msg = Message::parse("@b :n!u@h PRIVMSG #c :hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "privmsg");
        assert_eq!(json["tags"]["b"], true);
        assert_eq!(json["from"], "n");
    }
}
