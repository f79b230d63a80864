//! Incremental decoder for `text/event-stream` response bodies.
//!
//! Bytes are buffered until a full line is available, so multi-byte UTF-8
//! characters split across network reads decode correctly.

use llmrelay_core::UpstreamError;

/// The terminal payload OpenAI-compatible APIs send after the last delta.
pub const DONE_MARKER: &str = "[DONE]";

/// Default cap on a single line or event, matching the relay's default chunk limit.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024;

#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already searched for a newline.
    scanned: usize,
    data: Vec<String>,
    data_len: usize,
    max_event_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_event_bytes(DEFAULT_MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_event_bytes(max_event_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            data: Vec::new(),
            data_len: 0,
            max_event_bytes,
        }
    }

    /// Feed raw bytes; returns the `data` payload of every event completed by them.
    ///
    /// Fails with [`UpstreamError::Protocol`] once a pending line or event
    /// grows past the configured cap.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, UpstreamError> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.scanned = 0;
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line)? {
                events.push(event);
            }
        }
        self.scanned = self.buf.len();
        if self.buf.len() > self.max_event_bytes {
            return Err(self.too_large(self.buf.len()));
        }
        Ok(events)
    }

    /// Flush an event left unterminated when the body ended.
    pub fn finish(&mut self) -> Result<Option<String>, UpstreamError> {
        if !self.buf.is_empty() {
            let rest = std::mem::take(&mut self.buf);
            self.scanned = 0;
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r');
            if let Some(event) = self.process_line(line)? {
                return Ok(Some(event));
            }
        }
        Ok(self.dispatch())
    }

    fn process_line(&mut self, line: &str) -> Result<Option<String>, UpstreamError> {
        if line.is_empty() {
            return Ok(self.dispatch());
        }
        if line.starts_with(':') {
            return Ok(None);
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            self.data_len += value.len();
            if self.data_len > self.max_event_bytes {
                return Err(self.too_large(self.data_len));
            }
            self.data.push(value.to_string());
        }
        // event:, id:, retry: carry nothing the relay needs.
        Ok(None)
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        self.data_len = 0;
        Some(std::mem::take(&mut self.data).join("\n"))
    }

    fn too_large(&self, size: usize) -> UpstreamError {
        UpstreamError::Protocol(format!(
            "event stream line of {size} bytes exceeds limit of {} bytes",
            self.max_event_bytes
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data: {\"a\":1}\n\n").unwrap(), vec!["{\"a\":1}"]);
    }

    #[test]
    fn test_event_split_across_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: hel").unwrap().is_empty());
        assert!(decoder.push(b"lo\n").unwrap().is_empty());
        assert_eq!(decoder.push(b"\n").unwrap(), vec!["hello"]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let text = "data: кот\n\n".as_bytes();
        let (a, b) = text.split_at(8); // inside the first Cyrillic char
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(a).unwrap().is_empty());
        assert_eq!(decoder.push(b).unwrap(), vec!["кот"]);
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\r\nevent: message\r\ndata: x\r\n\r\n").unwrap();
        assert_eq!(events, vec!["x"]);
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data: a\ndata: b\n\n").unwrap(), vec!["a\nb"]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap().as_deref(), Some("tail"));
        assert!(decoder.finish().unwrap().is_none());
    }

    #[test]
    fn test_done_marker_is_plain_event() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data: [DONE]\n\n").unwrap(), vec![DONE_MARKER]);
    }

    #[test]
    fn test_oversized_line_without_newline_is_protocol_error() {
        let mut decoder = SseDecoder::with_max_event_bytes(16);
        assert!(decoder.push(b"data: 0123").unwrap().is_empty());
        let err = decoder.push(b"456789abcdef").unwrap_err();
        assert!(matches!(err, UpstreamError::Protocol(_)), "got {err:?}");
    }

    #[test]
    fn test_oversized_multiline_event_is_protocol_error() {
        let mut decoder = SseDecoder::with_max_event_bytes(8);
        assert!(decoder.push(b"data: abcde\n").unwrap().is_empty());
        assert!(matches!(
            decoder.push(b"data: fghij\n"),
            Err(UpstreamError::Protocol(_))
        ));
    }

    #[test]
    fn test_long_line_split_across_many_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: ").unwrap().is_empty());
        for _ in 0..1000 {
            assert!(decoder.push(b"x").unwrap().is_empty());
        }
        let events = decoder.push(b"\n\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].len(), 1000);
    }
}
