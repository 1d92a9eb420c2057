/// Splits a chunked byte stream into newline-delimited text frames.
///
/// Bytes are buffered until a full line is seen, so multi-byte characters and
/// frames split across chunks decode correctly.
#[derive(Default)]
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            lines.push(to_text(&line[..idx]));
        }
        lines
    }

    /// Returns a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(to_text(&rest))
    }
}

fn to_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_partial_chunk_boundaries() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(br#"{"type":"run_sta"#).is_empty());
        let lines = decoder.push_chunk(b"rted\"}\n{\"type\":");
        assert_eq!(lines, vec![r#"{"type":"run_started"}"#.to_string()]);
        let lines = decoder.push_chunk(b"\"run_completed\"}\r\n\n");
        assert_eq!(
            lines,
            vec![r#"{"type":"run_completed"}"#.to_string(), String::new()]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn keeps_multibyte_characters_split_across_chunks() {
        let mut decoder = LineDecoder::default();
        let text = "héllo\n".as_bytes();
        assert!(decoder.push_chunk(&text[..2]).is_empty());
        assert_eq!(decoder.push_chunk(&text[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push_chunk(br#"{"type":"run_completed"}"#).is_empty());
        assert_eq!(
            decoder.finish().as_deref(),
            Some(r#"{"type":"run_completed"}"#)
        );
    }
}
