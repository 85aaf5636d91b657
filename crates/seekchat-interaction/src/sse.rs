//! Incremental decoder for the `text/event-stream` bodies returned by
//! streaming chat completions.
//!
//! Events are separated by a blank line. Each event carries one payload,
//! either a JSON chunk, the `: keep-alive` comment the server sends while the
//! model is busy, or the `[DONE]` terminator.

const KEEP_ALIVE: &str = ": keep-alive";
const DONE: &str = "[DONE]";
const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    KeepAlive,
    Done,
    Data(String),
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Undecoded tail of a multi-byte UTF-8 sequence split across chunks.
    partial: Vec<u8>,
    buffer: String,
    keep_alives: u32,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consecutive keep-alives since the last data event.
    ///
    /// The terminator does not reset the counter.
    pub fn trailing_keep_alives(&self) -> u32 {
        self.keep_alives
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds one body chunk and returns the events it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        self.decode_utf8(bytes);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let raw: String = self.buffer.drain(..end + 2).collect();
            if let Some(event) = self.classify(&raw) {
                let is_done = event == SseEvent::Done;
                events.push(event);
                if is_done {
                    self.buffer.clear();
                    break;
                }
            }
        }
        events
    }

    /// Flushes an unterminated final event at end of body.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        if !self.partial.is_empty() {
            let rest = std::mem::take(&mut self.partial);
            self.buffer.push_str(&String::from_utf8_lossy(&rest));
        }
        let raw = std::mem::take(&mut self.buffer);
        self.classify(&raw).into_iter().collect()
    }

    fn decode_utf8(&mut self, bytes: &[u8]) {
        self.partial.extend_from_slice(bytes);
        let mut input = std::mem::take(&mut self.partial);
        let mut offset = 0;
        loop {
            let err = match std::str::from_utf8(&input[offset..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => err,
            };
            let valid = offset + err.valid_up_to();
            self.buffer
                .push_str(&String::from_utf8_lossy(&input[offset..valid]));
            match err.error_len() {
                Some(len) => {
                    self.buffer.push(char::REPLACEMENT_CHARACTER);
                    offset = valid + len;
                }
                None => {
                    self.partial = input.split_off(valid);
                    return;
                }
            }
        }
    }

    fn classify(&mut self, raw: &str) -> Option<SseEvent> {
        let payload = raw.replacen(DATA_PREFIX, "", 1);
        let payload = payload.trim();
        match payload {
            "" => None,
            KEEP_ALIVE => {
                self.keep_alives += 1;
                Some(SseEvent::KeepAlive)
            }
            DONE => {
                self.done = true;
                Some(SseEvent::Done)
            }
            data => {
                self.keep_alives = 0;
                Some(SseEvent::Data(data.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_events_split_on_blank_line() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".into()),
                SseEvent::Data("{\"b\":2}".into()),
            ]
        );
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert!(decoder.push(b":1}\n").is_empty());
        assert_eq!(decoder.push(b"\n"), vec![SseEvent::Data("{\"a\":1}".into())]);
    }

    #[test]
    fn test_crlf_separators() {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(b"data: x\r\n\r");
        events.extend(decoder.push(b"\ndata: [DONE]\r\n\r\n"));
        assert_eq!(events, vec![SseEvent::Data("x".into()), SseEvent::Done]);
    }

    #[test]
    fn test_trailing_keep_alives_survive_done() {
        let mut decoder = SseDecoder::new();
        let mut body = String::from("data: {\"x\":1}\n\n");
        for _ in 0..5 {
            body.push_str(": keep-alive\n\n");
        }
        body.push_str("data: [DONE]\n\n");

        let events = decoder.push(body.as_bytes());
        assert_eq!(events.last(), Some(&SseEvent::Done));
        assert_eq!(decoder.trailing_keep_alives(), 5);
    }

    #[test]
    fn test_data_resets_keep_alive_counter() {
        let mut decoder = SseDecoder::new();
        decoder.push(b": keep-alive\n\n: keep-alive\n\n");
        assert_eq!(decoder.trailing_keep_alives(), 2);
        decoder.push(b"data: {}\n\n");
        assert_eq!(decoder.trailing_keep_alives(), 0);
    }

    #[test]
    fn test_input_after_done_is_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: [DONE]\n\ndata: late\n\n");
        assert_eq!(events, vec![SseEvent::Done]);
        assert!(decoder.push(b"data: later\n\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_multibyte_sequence_split_across_chunks() {
        let text = "data: 你好\n\n".as_bytes();
        let mut decoder = SseDecoder::new();
        // Split inside the first three-byte character.
        assert!(decoder.push(&text[..7]).is_empty());
        let events = decoder.push(&text[7..]);
        assert_eq!(events, vec![SseEvent::Data("你好".into())]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"tail\":true}").is_empty());
        assert_eq!(
            decoder.finish(),
            vec![SseEvent::Data("{\"tail\":true}".into())]
        );
    }
}
