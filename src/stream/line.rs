//! Incremental line splitting over arbitrarily chunked text or bytes.

use bytes::Bytes;

use crate::error::QianfanError;

/// One piece of input for [`LineDecoder::decode`].
#[derive(Debug, Clone, Copy)]
pub enum Chunk<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> From<&'a str> for Chunk<'a> {
    fn from(value: &'a str) -> Self {
        Chunk::Text(value)
    }
}

impl<'a> From<&'a String> for Chunk<'a> {
    fn from(value: &'a String) -> Self {
        Chunk::Text(value)
    }
}

impl<'a> From<&'a [u8]> for Chunk<'a> {
    fn from(value: &'a [u8]) -> Self {
        Chunk::Bytes(value)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Chunk<'a> {
    fn from(value: &'a [u8; N]) -> Self {
        Chunk::Bytes(value)
    }
}

impl<'a> From<&'a Vec<u8>> for Chunk<'a> {
    fn from(value: &'a Vec<u8>) -> Self {
        Chunk::Bytes(value)
    }
}

impl<'a> From<&'a Bytes> for Chunk<'a> {
    fn from(value: &'a Bytes) -> Self {
        Chunk::Bytes(value)
    }
}

/// Line terminators: LF, CR, VT, FF, FS, GS, RS, NEL, LS and PS. `\r\n` counts once.
#[inline]
pub fn is_newline(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\u{0B}' | '\u{0C}' | '\u{1C}' | '\u{1D}' | '\u{1E}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

fn split_lines(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((index, c)) = chars.next() {
        if !is_newline(c) {
            continue;
        }
        out.push(&text[start..index]);
        let mut end = index + c.len_utf8();
        if c == '\r' && matches!(chars.peek(), Some((_, '\n'))) {
            chars.next();
            end += 1;
        }
        start = end;
    }
    out.push(&text[start..]);
    out
}

/// Turns a sequence of chunks into complete lines.
///
/// At most one partial line is held between calls. A chunk ending in a bare
/// `\r` is not resolved until the next chunk (or [`LineDecoder::flush`]) shows
/// whether a `\n` follows. Byte chunks may split a UTF-8 sequence; the
/// incomplete tail is kept until the rest arrives.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<String>,
    trailing_cr: bool,
    utf8_tail: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the lines it completed.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::UnsupportedInput`] for bytes that are not UTF-8,
    /// or for a text chunk arriving while a byte chunk left a UTF-8 sequence open.
    pub fn decode<'a>(&mut self, chunk: impl Into<Chunk<'a>>) -> Result<Vec<String>, QianfanError> {
        let mut text = self.decode_text(chunk.into())?;

        if self.trailing_cr {
            text.insert(0, '\r');
            self.trailing_cr = false;
        }
        if text.ends_with('\r') {
            self.trailing_cr = true;
            text.pop();
        }
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let trailing_newline = text.chars().next_back().is_some_and(is_newline);
        let mut lines: Vec<String> = split_lines(&text).into_iter().map(str::to_owned).collect();

        if lines.len() == 1 && !trailing_newline {
            self.buffer.append(&mut lines);
            return Ok(Vec::new());
        }

        if !self.buffer.is_empty() {
            let mut joined = self.buffer.concat();
            joined.push_str(&lines[0]);
            lines[0] = joined;
            self.buffer.clear();
        }

        // The fragment after the last newline is either a partial line or,
        // when the text ended on a newline, empty and not a line at all.
        let tail = lines.pop().unwrap_or_default();
        if !trailing_newline {
            self.buffer.push(tail);
        }
        Ok(lines)
    }

    /// Emit whatever is still buffered as a final line and reset.
    ///
    /// Call once after the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`QianfanError::UnsupportedInput`] when the input stopped in
    /// the middle of a UTF-8 sequence.
    pub fn flush(&mut self) -> Result<Vec<String>, QianfanError> {
        let dangling = std::mem::take(&mut self.utf8_tail);
        if self.buffer.is_empty() && !self.trailing_cr {
            return if dangling.is_empty() {
                Ok(Vec::new())
            } else {
                Err(truncated_utf8(&dangling))
            };
        }
        let line = self.buffer.concat();
        self.buffer.clear();
        self.trailing_cr = false;
        if !dangling.is_empty() {
            return Err(truncated_utf8(&dangling));
        }
        Ok(vec![line])
    }

    fn decode_text(&mut self, chunk: Chunk<'_>) -> Result<String, QianfanError> {
        match chunk {
            Chunk::Text(text) => {
                if !self.utf8_tail.is_empty() {
                    return Err(QianfanError::UnsupportedInput(
                        "text chunk received while a UTF-8 byte sequence is incomplete".to_string(),
                    ));
                }
                Ok(text.to_owned())
            }
            Chunk::Bytes(bytes) => {
                if self.utf8_tail.is_empty() {
                    return self.decode_utf8(bytes);
                }
                let mut joined = std::mem::take(&mut self.utf8_tail);
                joined.extend_from_slice(bytes);
                self.decode_utf8(&joined)
            }
        }
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> Result<String, QianfanError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_owned()),
            Err(err) if err.error_len().is_none() => {
                let valid_up_to = err.valid_up_to();
                self.utf8_tail.extend_from_slice(&bytes[valid_up_to..]);
                Ok(String::from_utf8_lossy(&bytes[..valid_up_to]).into_owned())
            }
            Err(err) => Err(QianfanError::UnsupportedInput(format!(
                "chunk is not valid UTF-8: {err}"
            ))),
        }
    }
}

fn truncated_utf8(bytes: &[u8]) -> QianfanError {
    QianfanError::UnsupportedInput(format!(
        "input ended inside a UTF-8 sequence ({} dangling bytes)",
        bytes.len()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "line1\nline2\r\nline3";

    fn decode_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = LineDecoder::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(decoder.decode(*chunk).unwrap());
        }
        lines.extend(decoder.flush().unwrap());
        lines
    }

    #[test]
    fn test_single_chunk() {
        assert_eq!(decode_all(&[SAMPLE.as_bytes()]), vec!["line1", "line2", "line3"]);
    }

    #[test]
    fn test_every_two_way_split() {
        let bytes = SAMPLE.as_bytes();
        for split in 0..=bytes.len() {
            let (left, right) = bytes.split_at(split);
            assert_eq!(
                decode_all(&[left, right]),
                vec!["line1", "line2", "line3"],
                "split at {split}"
            );
        }
    }

    #[test]
    fn test_every_three_way_split() {
        let bytes = SAMPLE.as_bytes();
        for first in 0..=bytes.len() {
            for second in first..=bytes.len() {
                let chunks = [&bytes[..first], &bytes[first..second], &bytes[second..]];
                assert_eq!(
                    decode_all(&chunks),
                    vec!["line1", "line2", "line3"],
                    "split at {first}/{second}"
                );
            }
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let bytes = SAMPLE.as_bytes();
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_all(&chunks), vec!["line1", "line2", "line3"]);
    }

    #[test]
    fn test_split_crlf_resolved_by_next_chunk() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.decode("a\r").unwrap(), Vec::<String>::new());
        assert_eq!(decoder.decode("\nb\n").unwrap(), vec!["a", "b"]);
        assert!(decoder.flush().unwrap().is_empty());
    }

    #[test]
    fn test_bare_cr_then_text_is_a_line_break() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.decode("a\r").unwrap().is_empty());
        assert_eq!(decoder.decode("b").unwrap(), vec!["a"]);
        assert_eq!(decoder.flush().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_blank_lines_are_preserved() {
        let mut decoder = LineDecoder::new();
        assert_eq!(
            decoder.decode("data: x\n\ndata: y\n\n").unwrap(),
            vec!["data: x", "", "data: y", ""]
        );
    }

    #[test]
    fn test_unicode_newlines() {
        let mut decoder = LineDecoder::new();
        assert_eq!(
            decoder.decode("a\u{2028}b\u{85}c\x0Bd\n").unwrap(),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let text = "héllo\nwörld\n";
        let bytes = text.as_bytes();
        for split in 0..=bytes.len() {
            let (left, right) = bytes.split_at(split);
            assert_eq!(decode_all(&[left, right]), vec!["héllo", "wörld"], "split at {split}");
        }
    }

    #[test]
    fn test_invalid_utf8_is_unsupported() {
        let mut decoder = LineDecoder::new();
        let err = decoder.decode(&[0xff_u8, b'a']).unwrap_err();
        assert!(matches!(err, QianfanError::UnsupportedInput(_)));
    }

    #[test]
    fn test_truncated_utf8_at_flush_is_unsupported() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.decode(&[b'a', 0xe6_u8]).unwrap().is_empty());
        assert!(matches!(
            decoder.flush().unwrap_err(),
            QianfanError::UnsupportedInput(_)
        ));
    }

    #[test]
    fn test_flush_on_empty_decoder() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.flush().unwrap().is_empty());
    }

    #[test]
    fn test_flush_with_only_trailing_cr_yields_empty_line() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.decode("a\n\r").unwrap(), vec!["a"]);
        assert_eq!(decoder.flush().unwrap(), vec![""]);
    }

    #[test]
    fn test_buffer_accumulates_fragments() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.decode("ab").unwrap().is_empty());
        assert!(decoder.decode("cd").unwrap().is_empty());
        assert_eq!(decoder.decode("e\nf").unwrap(), vec!["abcde"]);
        assert_eq!(decoder.flush().unwrap(), vec!["f"]);
    }
}
