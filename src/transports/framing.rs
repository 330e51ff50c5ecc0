//! Line framing for byte-stream transports.
//!
//! IRC servers terminate lines with `\r\n`, but plenty of them (and most test
//! harnesses) send bare `\n`. [`LineBuffer`] accepts both.

use std::collections::VecDeque;

use tracing::warn;

/// Longest inbound line kept, terminator excluded: 8191 bytes of IRCv3 tags
/// plus the classic 512-byte message.
pub const MAX_LINE_LEN: usize = 8703;

/// Accumulates raw bytes and hands out complete lines.
///
/// Bytes are appended with [`extend`](Self::extend); complete lines come out
/// of [`next_line`](Self::next_line) in arrival order. A read that ends
/// mid-line leaves the fragment buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    ready: VecDeque<String>,
    /// Set while discarding the remainder of an over-long line.
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes read off the wire.
    pub fn extend(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            self.push_fragment(head);
            self.finish_line();
            rest = tail.get(1..).unwrap_or_default();
        }
        self.push_fragment(rest);
    }

    /// Take the next complete line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Number of complete lines waiting.
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Bytes of an unterminated line held back.
    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    fn push_fragment(&mut self, fragment: &[u8]) {
        if self.overflowed || fragment.is_empty() {
            return;
        }
        // One extra byte tolerated for the `\r` that precedes `\n`.
        if self.partial.len() + fragment.len() > MAX_LINE_LEN + 1 {
            warn!(
                len = self.partial.len() + fragment.len(),
                max = MAX_LINE_LEN,
                "inbound line too long, discarding"
            );
            self.partial.clear();
            self.overflowed = true;
            return;
        }
        self.partial.extend_from_slice(fragment);
    }

    fn finish_line(&mut self) {
        if self.overflowed {
            self.overflowed = false;
            return;
        }
        let mut line = std::mem::take(&mut self.partial);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.is_empty() {
            return;
        }
        self.ready
            .push_back(String::from_utf8_lossy(&line).into_owned());
    }
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

    fn drain(buf: &mut LineBuffer) -> Vec<String> {
        std::iter::from_fn(|| buf.next_line()).collect()
    }

    #[test]
    fn splits_crlf_and_bare_lf() {
        let mut buf = LineBuffer::new();
        buf.extend(b"PING :a\r\nPING :b\nPING :c\r\n");
        assert_eq!(drain(&mut buf), vec!["PING :a", "PING :b", "PING :c"]);
    }

    #[test]
    fn reassembles_fragments() {
        let mut buf = LineBuffer::new();
        buf.extend(b":srv 001 du");
        assert_eq!(buf.pending(), 0);
        assert_eq!(buf.partial_len(), 11);
        buf.extend(b"st :Welcome\r");
        assert_eq!(buf.pending(), 0);
        buf.extend(b"\nNOTICE");
        assert_eq!(drain(&mut buf), vec![":srv 001 dust :Welcome"]);
        buf.extend(b" * :hi\r\n");
        assert_eq!(drain(&mut buf), vec!["NOTICE * :hi"]);
    }

    #[test]
    fn skips_empty_lines() {
        let mut buf = LineBuffer::new();
        buf.extend(b"\r\n\n\r\nPING :x\r\n\r\n");
        assert_eq!(drain(&mut buf), vec!["PING :x"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut buf = LineBuffer::new();
        buf.extend(b"PRIVMSG #a :caf\xe9\r\n");
        let line = buf.next_line().unwrap();
        assert!(line.starts_with("PRIVMSG #a :caf"));
        assert!(line.ends_with('\u{FFFD}'));
    }

    #[test]
    fn over_long_line_is_dropped() {
        let mut buf = LineBuffer::new();
        let long = vec![b'a'; MAX_LINE_LEN + 10];
        buf.extend(&long);
        buf.extend(b"tail\r\nPING :ok\r\n");
        assert_eq!(drain(&mut buf), vec!["PING :ok"]);
    }

    #[test]
    fn line_at_limit_is_kept() {
        let mut buf = LineBuffer::new();
        let mut line = vec![b'a'; MAX_LINE_LEN];
        line.extend_from_slice(b"\r\n");
        buf.extend(&line);
        assert_eq!(buf.next_line().map(|l| l.len()), Some(MAX_LINE_LEN));
    }
}
