//! Incremental `text/event-stream` scanner used when relaying a streaming turn.
//!
//! Bytes arrive in arbitrary chunks; complete `data:` lines are handed back for immediate
//! forwarding while the text of the last non-empty `{"type":"end"}` event is remembered so the
//! final reply can be persisted once the upstream closes.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct EventPeek<'a> {
    #[serde(rename = "type", borrow)]
    kind: Option<&'a str>,
    text: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseRelay {
    pending: Vec<u8>,
    final_text: Option<String>,
}

impl SseRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the payloads of every `data:` line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = self.take_data(&line[..line.len() - 1]) {
                out.push(data);
            }
        }
        out
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        self.take_data(&line)
    }

    /// Text of the last non-empty `end` event seen so far
    pub fn final_text(&self) -> Option<&str> {
        self.final_text.as_deref()
    }

    fn take_data(&mut self, line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.strip_suffix('\r').unwrap_or(&line);
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data);

        if let Ok(event) = serde_json::from_str::<EventPeek>(data)
            && event.kind == Some("end")
            && let Some(text) = event.text
            && !text.is_empty()
        {
            self.final_text = Some(text);
        }

        Some(data.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut relay = SseRelay::new();

        assert!(relay.push(b"data: {\"type\":\"tok").is_empty());
        let frames = relay.push(b"en\",\"text\":\"he\"}\n\ndata: {\"type\":\"end\",\"text\":\"hello\"}\n\n");

        assert_eq!(
            frames,
            vec![
                "{\"type\":\"token\",\"text\":\"he\"}".to_string(),
                "{\"type\":\"end\",\"text\":\"hello\"}".to_string()
            ]
        );
        assert_eq!(relay.final_text(), Some("hello"));
    }

    #[test]
    fn test_last_end_event_wins() {
        let mut relay = SseRelay::new();
        relay.push(b"data: {\"type\":\"end\",\"text\":\"first\"}\n\ndata: {\"type\":\"end\",\"text\":\"second\"}\n\n");
        assert_eq!(relay.final_text(), Some("second"));
    }

    #[test]
    fn test_ignores_comments_and_non_json() {
        let mut relay = SseRelay::new();
        let frames = relay.push(b": keep-alive\r\nevent: ping\r\ndata: not json\r\n\r\n");
        assert_eq!(frames, vec!["not json".to_string()]);
        assert_eq!(relay.final_text(), None);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut relay = SseRelay::new();
        assert!(relay.push(b"data: {\"type\":\"end\",\"text\":\"bye\"}").is_empty());
        assert_eq!(relay.finish().as_deref(), Some("{\"type\":\"end\",\"text\":\"bye\"}"));
        assert_eq!(relay.final_text(), Some("bye"));
        assert_eq!(relay.finish(), None);
    }

    #[test]
    fn test_empty_end_keeps_earlier_text() {
        let mut relay = SseRelay::new();
        relay.push(b"data: {\"type\":\"end\",\"text\":\"first answer\"}\n\n");
        let frames = relay.push(b"data: {\"type\":\"end\",\"text\":\"\"}\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(relay.final_text(), Some("first answer"));
    }
}
