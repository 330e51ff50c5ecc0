//! Input validation and IRC casemapping.
//!
//! User-supplied names are cleaned by stripping control characters rather
//! than rejecting them, so that no value can smuggle a second command onto
//! the wire. Length and emptiness violations are reported as
//! [`IrcError::InvalidArgument`].

use crate::error::{IrcError, Result};

/// Longest nickname accepted.
pub const MAX_NICK_LEN: usize = 30;

/// Longest channel name accepted, prefix included.
pub const MAX_CHANNEL_LEN: usize = 50;

const CHANNEL_PREFIXES: [char; 4] = ['#', '&', '+', '!'];

/// Check that `host` is a usable host name and return it trimmed.
pub fn validate_host(host: &str) -> Result<&str> {
    let host = host.trim();
    if host.is_empty() {
        return Err(IrcError::InvalidArgument("host is required".into()));
    }
    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(IrcError::InvalidArgument(format!("invalid host {host:?}")));
    }
    Ok(host)
}

/// Check that `port` fits in [1, 65535].
pub fn validate_port(port: i64) -> Result<u16> {
    match u16::try_from(port) {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(IrcError::InvalidArgument(format!(
            "port {port} out of range (1-65535)"
        ))),
    }
}

/// Strip control characters and spaces from a nickname and check its length.
pub fn sanitize_nick(nick: &str) -> Result<String> {
    let nick = strip_controls(nick);
    if nick.is_empty() {
        return Err(IrcError::InvalidArgument("nickname is required".into()));
    }
    if nick.chars().count() > MAX_NICK_LEN {
        return Err(IrcError::InvalidArgument(format!(
            "nickname longer than {MAX_NICK_LEN} characters"
        )));
    }
    Ok(nick)
}

/// Strip control characters and spaces from a channel name, add `#` when no
/// channel prefix is present, and check its length.
///
/// ```
/// use dust_irc::validate::sanitize_channel;
///
/// assert_eq!(sanitize_channel("rust").unwrap(), "#rust");
/// assert_eq!(sanitize_channel("&local").unwrap(), "&local");
/// ```
pub fn sanitize_channel(channel: &str) -> Result<String> {
    let mut channel = strip_controls(channel);
    if channel.is_empty() {
        return Err(IrcError::InvalidArgument("channel name is required".into()));
    }
    if !channel.starts_with(CHANNEL_PREFIXES) {
        channel.insert(0, '#');
    }
    if channel.chars().count() > MAX_CHANNEL_LEN {
        return Err(IrcError::InvalidArgument(format!(
            "channel name longer than {MAX_CHANNEL_LEN} characters"
        )));
    }
    Ok(channel)
}

/// Strip control characters and spaces from a single-word parameter such as a
/// message target or user name.
pub fn sanitize_target(target: &str) -> Result<String> {
    let target = strip_controls(target);
    if target.is_empty() {
        return Err(IrcError::InvalidArgument("target is required".into()));
    }
    Ok(target)
}

/// Remove CR, LF and NUL. Formatting codes such as bold (`\x02`) survive.
pub fn strip_line_breaks(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\0'))
        .collect()
}

fn strip_controls(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace())
        .collect()
}

/// Lowercase `value` using RFC 1459 casemapping (`[]\^` fold to `{}|~`).
pub fn irc_to_lower(value: &str) -> String {
    value.chars().map(fold).collect()
}

/// Compare two names under RFC 1459 casemapping.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.chars().count() == b.chars().count() && a.chars().map(fold).eq(b.chars().map(fold))
}

fn fold(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '^' => '~',
        other => other.to_ascii_lowercase(),
    }
}
