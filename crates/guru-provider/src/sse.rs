//! Incremental parser for `text/event-stream` bodies.
//!
//! Only `data:` fields matter to chat-completion streams. Bytes are buffered
//! until a full line is available, so neither a JSON payload nor a multi-byte
//! character is ever split across network chunks.

/// Payload that ends an OpenAI-style stream.
pub const DONE: &str = "[DONE]";

/// One complete `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseData {
    Json(String),
    Done,
}

/// Line-buffering SSE parser.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes from the response body. Returns the payloads of every
    /// line completed by this chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(data) = parse_line(&line) {
                out.push(data);
            }
        }
        out
    }

    /// Payload of a trailing line the server did not terminate.
    pub fn finish(&mut self) -> Option<SseData> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseData> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);
    // Comments (": keep-alive") and other fields are ignored.
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == DONE {
        return Some(SseData::Done);
    }
    Some(SseData::Json(data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            events,
            vec![
                SseData::Json("{\"a\":1}".to_string()),
                SseData::Json("{\"b\":2}".to_string()),
            ]
        );
    }

    #[test]
    fn buffers_partial_lines() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"content\":\"hel").is_empty());
        let events = parser.feed(b"lo\"}\r\n\r\n");
        assert_eq!(events, vec![SseData::Json("{\"content\":\"hello\"}".to_string())]);
    }

    #[test]
    fn keeps_multibyte_characters_split_across_chunks() {
        let text = "data: Olá\n".as_bytes();
        // Split inside the two-byte 'á'.
        let split = text.iter().position(|b| *b == 0xC3).expect("multibyte") + 1;
        let mut parser = SseParser::new();
        assert!(parser.feed(&text[..split]).is_empty());
        assert_eq!(parser.feed(&text[split..]), vec![SseData::Json("Olá".to_string())]);
    }

    #[test]
    fn recognizes_done_and_skips_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\nevent: ping\ndata: [DONE]\n");
        assert_eq!(events, vec![SseData::Done]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"x\":1}").is_empty());
        assert_eq!(parser.finish(), Some(SseData::Json("{\"x\":1}".to_string())));
        assert_eq!(parser.finish(), None);
    }
}
