//! Newline splitting over decoded body bytes

/// Accumulates body bytes and yields complete `\n`-terminated lines
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line_bytes: usize,
    // Inside an oversized line; drop bytes until its newline.
    discarding: bool,
    dropped: u64,
}

impl LineBuffer {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes,
            discarding: false,
            dropped: 0,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Whether a complete line is waiting
    pub fn has_line(&self) -> bool {
        self.buf.contains(&b'\n')
    }

    /// Number of oversized lines dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Next complete line without its terminator (`\n` or `\r\n`).
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > self.max_line_bytes {
                    self.buf.clear();
                    if !self.discarding {
                        self.discarding = true;
                        self.dropped += 1;
                    }
                }
                return None;
            };

            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();

            if self.discarding {
                self.discarding = false;
                continue;
            }

            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line.len() > self.max_line_bytes {
                self.dropped += 1;
                continue;
            }

            return Some(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_lines() {
        let mut lines = LineBuffer::new(1024);
        lines.extend(b"event: a\r\ndata: b\npartial");

        assert_eq!(lines.next_line().as_deref(), Some("event: a"));
        assert_eq!(lines.next_line().as_deref(), Some("data: b"));
        assert_eq!(lines.next_line(), None);
        assert!(!lines.has_line());

        lines.extend(b" line\n");
        assert!(lines.has_line());
        assert_eq!(lines.next_line().as_deref(), Some("partial line"));
    }

    #[test]
    fn test_empty_lines_are_returned() {
        let mut lines = LineBuffer::new(1024);
        lines.extend(b"\n\r\n");
        assert_eq!(lines.next_line().as_deref(), Some(""));
        assert_eq!(lines.next_line().as_deref(), Some(""));
    }

    #[test]
    fn test_oversized_complete_line_is_dropped() {
        let mut lines = LineBuffer::new(4);
        lines.extend(b"toolong\nok\n");
        assert_eq!(lines.next_line().as_deref(), Some("ok"));
        assert_eq!(lines.dropped(), 1);
    }

    #[test]
    fn test_oversized_partial_line_is_discarded_until_newline() {
        let mut lines = LineBuffer::new(4);
        lines.extend(b"abcdefgh");
        assert_eq!(lines.next_line(), None);
        lines.extend(b"ijkl");
        assert_eq!(lines.next_line(), None);
        lines.extend(b"mn\nnext\n");
        assert_eq!(lines.next_line().as_deref(), Some("next"));
        assert_eq!(lines.dropped(), 1);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut lines = LineBuffer::new(1024);
        lines.extend(b"a\xffb\n");
        assert_eq!(lines.next_line().as_deref(), Some("a\u{fffd}b"));
    }
}
