//! Incremental decoder for HTTP/1.1 chunked transfer coding
//!
//! Bytes are fed as they arrive off the socket; decoded body bytes are
//! appended to the caller's buffer. The decoder keeps its position across
//! calls, so chunk headers and data may be split at any byte boundary.

use thiserror::Error;

/// Framing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkedError {
    #[error("invalid byte {0:#04x} in chunk size line")]
    InvalidSize(u8),

    #[error("empty chunk size line")]
    MissingSize,

    #[error("chunk size overflows")]
    SizeOverflow,

    #[error("chunk data not followed by CRLF")]
    MissingCrlf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size {
        value: u64,
        digits: usize,
        extension: bool,
    },
    Data {
        remaining: u64,
    },
    DataEnd,
    Trailer {
        line_len: usize,
    },
    Done,
}

impl State {
    fn size() -> Self {
        State::Size {
            value: 0,
            digits: 0,
            extension: false,
        }
    }
}

/// Chunked body decoder
#[derive(Debug, Clone)]
pub struct ChunkedDecoder {
    state: State,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: State::size(),
        }
    }

    /// Whether the terminating zero-size chunk and trailers were seen
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decode `input`, appending body bytes to `out`.
    ///
    /// Returns the number of input bytes consumed. That is all of `input`
    /// unless the body ended inside it.
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, ChunkedError> {
        let mut pos = 0;

        while pos < input.len() {
            match self.state {
                State::Size {
                    value,
                    digits,
                    extension,
                } => {
                    let b = input[pos];
                    pos += 1;
                    match b {
                        b'\n' => {
                            if digits == 0 {
                                return Err(ChunkedError::MissingSize);
                            }
                            self.state = if value == 0 {
                                State::Trailer { line_len: 0 }
                            } else {
                                State::Data { remaining: value }
                            };
                        }
                        b'\r' => {}
                        _ if extension => {}
                        b';' => {
                            self.state = State::Size {
                                value,
                                digits,
                                extension: true,
                            };
                        }
                        b' ' | b'\t' => {}
                        _ => {
                            let digit = (b as char)
                                .to_digit(16)
                                .ok_or(ChunkedError::InvalidSize(b))?;
                            let value = value
                                .checked_mul(16)
                                .and_then(|v| v.checked_add(u64::from(digit)))
                                .ok_or(ChunkedError::SizeOverflow)?;
                            self.state = State::Size {
                                value,
                                digits: digits + 1,
                                extension,
                            };
                        }
                    }
                }
                State::Data { remaining } => {
                    let available = (input.len() - pos) as u64;
                    let take = remaining.min(available) as usize;
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;

                    let remaining = remaining - take as u64;
                    self.state = if remaining == 0 {
                        State::DataEnd
                    } else {
                        State::Data { remaining }
                    };
                }
                State::DataEnd => {
                    let b = input[pos];
                    pos += 1;
                    match b {
                        b'\r' => {}
                        b'\n' => self.state = State::size(),
                        _ => return Err(ChunkedError::MissingCrlf),
                    }
                }
                State::Trailer { line_len } => {
                    let b = input[pos];
                    pos += 1;
                    match b {
                        b'\r' => {}
                        b'\n' if line_len == 0 => self.state = State::Done,
                        b'\n' => self.state = State::Trailer { line_len: 0 },
                        _ => {
                            self.state = State::Trailer {
                                line_len: line_len + 1,
                            }
                        }
                    }
                }
                State::Done => break,
            }
        }

        Ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> (Vec<u8>, ChunkedDecoder) {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        decoder.decode(input, &mut out).unwrap();
        (out, decoder)
    }

    #[test]
    fn test_single_chunk() {
        let (out, decoder) = decode_all(b"5\r\nhello\r\n");
        assert_eq!(out, b"hello");
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_terminal_chunk_finishes_body() {
        let (out, decoder) = decode_all(b"3\r\nabc\r\n0\r\n\r\n");
        assert_eq!(out, b"abc");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_bytes_after_end_are_not_consumed() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        let input = b"0\r\n\r\nHTTP/1.1";
        let consumed = decoder.decode(input, &mut out).unwrap();
        assert_eq!(consumed, 5);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_split_at_every_byte() {
        let input = b"b\r\nevent: abc\n\r\n4;name=val\r\ndata\r\n0\r\nX-Trailer: 1\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        for b in input.iter() {
            decoder.decode(std::slice::from_ref(b), &mut out).unwrap();
        }
        assert_eq!(out, b"event: abc\ndata");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_hex_sizes() {
        let body = vec![b'x'; 0x1f];
        let mut input = b"1F\r\n".to_vec();
        input.extend_from_slice(&body);
        input.extend_from_slice(b"\r\n");
        let (out, _) = decode_all(&input);
        assert_eq!(out.len(), 0x1f);
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let (out, decoder) = decode_all(b"2\nok\n0\n\n");
        assert_eq!(out, b"ok");
        assert!(decoder.is_done());
    }

    #[test]
    fn test_invalid_size() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"zz\r\n", &mut out),
            Err(ChunkedError::InvalidSize(b'z'))
        );
    }

    #[test]
    fn test_missing_size() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        assert_eq!(decoder.decode(b"\r\n", &mut out), Err(ChunkedError::MissingSize));
    }

    #[test]
    fn test_missing_crlf_after_data() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"2\r\nokX", &mut out),
            Err(ChunkedError::MissingCrlf)
        );
    }

    #[test]
    fn test_size_overflow() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();
        assert_eq!(
            decoder.decode(b"fffffffffffffffff\r\n", &mut out),
            Err(ChunkedError::SizeOverflow)
        );
    }
}
