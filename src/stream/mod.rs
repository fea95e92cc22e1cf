//! Server-sent event framing and simulation stream aggregation.

pub mod aggregator;

pub use aggregator::StreamAggregator;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Bytes arrive in arbitrary chunks; a frame is emitted once its terminating
/// blank line has been seen. Only `data:` fields are kept, multi-line data is
/// joined with `\n`, and comment lines are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            if let Some(frame) = self.accept_line(text.trim_end_matches('\r')) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush a final frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string();
            if let Some(frame) = self.accept_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.data).join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: {\"stage\":\"emotion\"}\n\n");
        assert_eq!(frames, vec![r#"{"stage":"emotion"}"#.to_string()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"stage\":").is_empty());
        assert!(decoder.push(b"\"narratives\"}\n").is_empty());
        let frames = decoder.push(b"\ndata: {\"stage\":\"flashpoints\"}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], r#"{"stage":"narratives"}"#);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: 舆情\n\n".as_bytes();
        // Split inside the first CJK character.
        assert!(decoder.push(&bytes[..7]).is_empty());
        let frames = decoder.push(&bytes[7..]);
        assert_eq!(frames, vec!["舆情".to_string()]);
    }

    #[test]
    fn test_crlf_comments_and_multiline() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\r\nevent: update\r\ndata: a\r\ndata: b\r\n\r\n");
        assert_eq!(frames, vec!["a\nb".to_string()]);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
    }
}
