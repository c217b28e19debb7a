//! Incremental `text/event-stream` decoder
//!
//! Bytes arrive in arbitrary chunks; events are dispatched on blank lines.
//! Only the `event` and `data` fields are kept.

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "put".to_string(),
                data: "{\"path\":\"/\",\"data\":null}".to_string(),
            }]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: pa").is_empty());
        assert!(decoder.push(b"tch\ndata: {\"a\"").is_empty());
        let events = decoder.push(b":1}\n\nevent: keep-alive\ndata: null\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "patch");
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[1].event, "keep-alive");
    }

    #[test]
    fn test_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": heartbeat\r\nevent: put\r\ndata: 1\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "1");
    }

    #[test]
    fn test_multiline_data_and_default_event_name() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: first\ndata: second\n\n");
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "first\nsecond");
    }

    #[test]
    fn test_blank_lines_without_fields_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"\n\n\n").is_empty());
    }
}
