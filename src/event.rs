//! Events published by the IRC client engine.
//!
//! Every inbound line produces a [`IrcEvent::Raw`] event followed by at most
//! one typed event built from the parsed [`Message`]. Lifecycle changes
//! produce [`IrcEvent::Connected`] and [`IrcEvent::Disconnected`].

use std::fmt;

use serde::Serialize;

use crate::message::{Message, MessageKind};

/// Local echo of a message the session itself sent with
/// [`IrcClient::send_message`](crate::IrcClient::send_message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OwnMessage {
    /// The session nickname at send time.
    pub from: String,
    pub text: String,
    pub target: String,
}

/// Event emitted by the engine to its subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum IrcEvent {
    /// The transport is up and the outbound pump is running.
    #[serde(rename = "connect")]
    Connected,
    /// The session ended, either by request or because the transport closed.
    #[serde(rename = "disconnect")]
    Disconnected,
    /// A transport or inbound-data failure. Processing continues after it.
    Error { message: String },
    /// Instant feedback for our own outgoing PRIVMSG.
    Message(OwnMessage),
    /// The exact inbound line, before parsing.
    Raw(String),
    Privmsg(Message),
    Notice(Message),
    Join(Message),
    Part(Message),
    Nick(Message),
    /// PING or PONG.
    Ping(Message),
    Numeric(Message),
    Quit(Message),
}

impl IrcEvent {
    /// Build the typed event for a parsed message. [`MessageKind::Other`]
    /// lines have no typed event; they are visible through [`IrcEvent::Raw`].
    pub fn from_message(msg: Message) -> Option<Self> {
        let event = match msg.kind {
            MessageKind::Privmsg => Self::Privmsg(msg),
            MessageKind::Notice => Self::Notice(msg),
            MessageKind::Join => Self::Join(msg),
            MessageKind::Part => Self::Part(msg),
            MessageKind::Nick => Self::Nick(msg),
            MessageKind::Ping => Self::Ping(msg),
            MessageKind::Numeric => Self::Numeric(msg),
            MessageKind::Quit => Self::Quit(msg),
            MessageKind::Other => return None,
        };
        Some(event)
    }

    /// Returns the kind used to route this event to subscribers.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connect,
            Self::Disconnected => EventKind::Disconnect,
            Self::Error { .. } => EventKind::Error,
            Self::Message(_) => EventKind::Message,
            Self::Raw(_) => EventKind::Raw,
            Self::Privmsg(_) => EventKind::Privmsg,
            Self::Notice(_) => EventKind::Notice,
            Self::Join(_) => EventKind::Join,
            Self::Part(_) => EventKind::Part,
            Self::Nick(_) => EventKind::Nick,
            Self::Ping(_) => EventKind::Ping,
            Self::Numeric(_) => EventKind::Numeric,
            Self::Quit(_) => EventKind::Quit,
        }
    }

    /// The parsed message carried by typed events.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::Privmsg(msg)
            | Self::Notice(msg)
            | Self::Join(msg)
            | Self::Part(msg)
            | Self::Nick(msg)
            | Self::Ping(msg)
            | Self::Numeric(msg)
            | Self::Quit(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Name under which subscribers register for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connect,
    Disconnect,
    Error,
    Message,
    Raw,
    Privmsg,
    Notice,
    Join,
    Part,
    Nick,
    Ping,
    Numeric,
    Quit,
}

impl EventKind {
    /// Every event kind, in declaration order.
    pub const ALL: [EventKind; 13] = [
        Self::Connect,
        Self::Disconnect,
        Self::Error,
        Self::Message,
        Self::Raw,
        Self::Privmsg,
        Self::Notice,
        Self::Join,
        Self::Part,
        Self::Nick,
        Self::Ping,
        Self::Numeric,
        Self::Quit,
    ];

    /// Lowercase event name, e.g. `"connect"` or `"privmsg"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::Message => "message",
            Self::Raw => "raw",
            Self::Privmsg => "privmsg",
            Self::Notice => "notice",
            Self::Join => "join",
            Self::Part => "part",
            Self::Nick => "nick",
            Self::Ping => "ping",
            Self::Numeric => "numeric",
            Self::Quit => "quit",
        }
    }

    /// Look up a kind by its [`as_str`](Self::as_str) name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
