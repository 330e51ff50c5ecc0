#![no_main]

use dust_irc::message::Message;
use dust_irc::transports::LineBuffer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Framing must accept arbitrary bytes, including invalid UTF-8.
    let mut lines = LineBuffer::new();
    lines.extend(data);
    while let Some(line) = lines.next_line() {
        let _ = Message::try_parse(&line);
    }

    if let Ok(s) = std::str::from_utf8(data) {
        // The lenient parser is total and must keep the raw line.
        let msg = Message::parse(s);
        assert_eq!(msg.raw, s);
        assert!(!msg.command.is_empty());
        let _ = Message::try_parse(s);
    }
});
