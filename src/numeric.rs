//! Named numeric replies.
//!
//! Servers answer most commands with a three-digit code. The parser keeps the
//! raw code in [`Message::numeric`](crate::message::Message::numeric); this
//! module names the ones a client typically reacts to.

use std::fmt;

/// A numeric reply code sent by an IRC server.
///
/// Codes the engine has no name for map to [`Reply::Unknown`].
/// Use [`description()`](Reply::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reply {
    // Registration
    Welcome,
    YourHost,
    Created,
    MyInfo,
    ISupport,

    // Channel and user info
    Away,
    Topic,
    NamReply,
    EndOfNames,
    MotdStart,
    Motd,
    EndOfMotd,

    // Errors
    NoSuchNick,
    NoSuchChannel,
    CannotSendToChan,
    UnknownCommand,
    NoNicknameGiven,
    ErroneousNickname,
    NicknameInUse,
    NickCollision,
    NotOnChannel,
    NotRegistered,
    NeedMoreParams,
    AlreadyRegistered,
    PasswdMismatch,
    YoureBannedCreep,
    ChannelIsFull,
    InviteOnlyChan,
    BannedFromChan,
    BadChannelKey,

    /// Any code without a name here.
    Unknown(u16),
}

impl Reply {
    /// Map a numeric code to its name.
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => Self::Welcome,
            2 => Self::YourHost,
            3 => Self::Created,
            4 => Self::MyInfo,
            5 => Self::ISupport,
            301 => Self::Away,
            332 => Self::Topic,
            353 => Self::NamReply,
            366 => Self::EndOfNames,
            372 => Self::Motd,
            375 => Self::MotdStart,
            376 => Self::EndOfMotd,
            401 => Self::NoSuchNick,
            403 => Self::NoSuchChannel,
            404 => Self::CannotSendToChan,
            421 => Self::UnknownCommand,
            431 => Self::NoNicknameGiven,
            432 => Self::ErroneousNickname,
            433 => Self::NicknameInUse,
            436 => Self::NickCollision,
            442 => Self::NotOnChannel,
            451 => Self::NotRegistered,
            461 => Self::NeedMoreParams,
            462 => Self::AlreadyRegistered,
            464 => Self::PasswdMismatch,
            465 => Self::YoureBannedCreep,
            471 => Self::ChannelIsFull,
            473 => Self::InviteOnlyChan,
            474 => Self::BannedFromChan,
            475 => Self::BadChannelKey,
            other => Self::Unknown(other),
        }
    }

    /// The numeric code.
    pub fn code(self) -> u16 {
        match self {
            Self::Welcome => 1,
            Self::YourHost => 2,
            Self::Created => 3,
            Self::MyInfo => 4,
            Self::ISupport => 5,
            Self::Away => 301,
            Self::Topic => 332,
            Self::NamReply => 353,
            Self::EndOfNames => 366,
            Self::Motd => 372,
            Self::MotdStart => 375,
            Self::EndOfMotd => 376,
            Self::NoSuchNick => 401,
            Self::NoSuchChannel => 403,
            Self::CannotSendToChan => 404,
            Self::UnknownCommand => 421,
            Self::NoNicknameGiven => 431,
            Self::ErroneousNickname => 432,
            Self::NicknameInUse => 433,
            Self::NickCollision => 436,
            Self::NotOnChannel => 442,
            Self::NotRegistered => 451,
            Self::NeedMoreParams => 461,
            Self::AlreadyRegistered => 462,
            Self::PasswdMismatch => 464,
            Self::YoureBannedCreep => 465,
            Self::ChannelIsFull => 471,
            Self::InviteOnlyChan => 473,
            Self::BannedFromChan => 474,
            Self::BadChannelKey => 475,
            Self::Unknown(code) => code,
        }
    }

    /// Returns `true` for error replies (400-599).
    pub fn is_error(self) -> bool {
        (400..600).contains(&self.code())
    }

    /// Returns a human-readable description of this reply.
    pub fn description(self) -> &'static str {
        match self {
            // Registration
            Self::Welcome => "Registration accepted. The server has confirmed your nickname.",
            Self::YourHost => "Identifies the server and its software version.",
            Self::Created => "Reports when the server was started.",
            Self::MyInfo => "Lists the server's name, version and supported modes.",
            Self::ISupport => "Advertises server features and limits.",

            // Channel and user info
            Self::Away => "The target user is marked as away.",
            Self::Topic => "Current topic of the channel.",
            Self::NamReply => "One batch of the channel's member list.",
            Self::EndOfNames => "End of the channel's member list.",
            Self::MotdStart => "Start of the message of the day.",
            Self::Motd => "One line of the message of the day.",
            Self::EndOfMotd => "End of the message of the day.",

            // Errors
            Self::NoSuchNick => "No user or channel by that name is online.",
            Self::NoSuchChannel => "The channel does not exist.",
            Self::CannotSendToChan => {
                "You cannot send to this channel. It may be moderated or you may need to join first."
            }
            Self::UnknownCommand => "The server does not recognize the command.",
            Self::NoNicknameGiven => "A nickname is required but none was given.",
            Self::ErroneousNickname => "The nickname contains characters the server does not allow.",
            Self::NicknameInUse => "The nickname is already in use. Choose another one.",
            Self::NickCollision => "The nickname collided with one on another server.",
            Self::NotOnChannel => "You are not on that channel.",
            Self::NotRegistered => "Register with NICK and USER before sending other commands.",
            Self::NeedMoreParams => "The command is missing parameters.",
            Self::AlreadyRegistered => "The connection is already registered.",
            Self::PasswdMismatch => "The server password was wrong or missing.",
            Self::YoureBannedCreep => "You are banned from this server.",
            Self::ChannelIsFull => "The channel has reached its member limit.",
            Self::InviteOnlyChan => "The channel is invite-only.",
            Self::BannedFromChan => "You are banned from the channel.",
            Self::BadChannelKey => "The channel key (password) was wrong or missing.",
            Self::Unknown(_) => "Unrecognized numeric reply.",
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03} {}", self.code(), self.description())
    }
}
