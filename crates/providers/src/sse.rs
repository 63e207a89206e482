//! Incremental server-sent-event framing.
//!
//! Chat endpoints stream completions as SSE: events separated by a blank
//! line, payloads on `data:` lines. Body chunks arrive at arbitrary byte
//! boundaries, so the decoder buffers input and only releases payloads
//! whose terminating blank line has been seen. [`SseDecoder::finish`]
//! closes the stream and treats any unterminated remainder as a final
//! event, which tolerates servers that drop the connection mid-frame.

/// Stateful SSE frame decoder. Feed it body chunks as they arrive; it
/// hands back complete `data:` payloads in wire order.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Feed one body chunk, returning every payload it completed.
    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        self.take_complete()
    }

    /// Consume the decoder at end of body. A non-blank remainder is
    /// decoded as one last event even without its terminating blank line.
    pub(crate) fn finish(mut self) -> Vec<String> {
        if self.buffer.trim().is_empty() {
            return Vec::new();
        }
        self.buffer.push_str("\n\n");
        self.take_complete()
    }

    fn take_complete(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let event: String = self.buffer.drain(..end + 2).collect();
            payloads.extend(payloads_of(&event));
        }
        payloads
    }
}

/// Pull the `data:` payloads out of one event block. Field lines other
/// than `data:` (`event:`, `id:`, `retry:`, comments) carry nothing a chat
/// adapter needs and are dropped.
fn payloads_of(event: &str) -> impl Iterator<Item = String> + '_ {
    event
        .lines()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(decoder: &mut SseDecoder, s: &str) -> Vec<String> {
        decoder.feed(s.as_bytes())
    }

    #[test]
    fn one_event_per_blank_line() {
        let mut decoder = SseDecoder::default();
        let payloads = feed_str(&mut decoder, "data: alpha\n\ndata: beta\n\n");
        assert_eq!(payloads, vec!["alpha", "beta"]);
    }

    #[test]
    fn payload_split_across_feeds_waits_for_the_delimiter() {
        let mut decoder = SseDecoder::default();
        assert!(feed_str(&mut decoder, "data: {\"text\":").is_empty());
        assert!(feed_str(&mut decoder, "\"hi\"}").is_empty());
        let payloads = feed_str(&mut decoder, "\n\n");
        assert_eq!(payloads, vec![r#"{"text":"hi"}"#]);
    }

    #[test]
    fn delimiter_split_across_feeds() {
        let mut decoder = SseDecoder::default();
        assert!(feed_str(&mut decoder, "data: first\n").is_empty());
        let payloads = feed_str(&mut decoder, "\ndata: second\n\n");
        assert_eq!(payloads, vec!["first", "second"]);
    }

    #[test]
    fn non_data_field_lines_are_dropped() {
        let mut decoder = SseDecoder::default();
        let payloads = feed_str(
            &mut decoder,
            "event: message\nid: 7\nretry: 3000\ndata: kept\n\n",
        );
        assert_eq!(payloads, vec!["kept"]);
    }

    #[test]
    fn whitespace_around_the_payload_is_trimmed() {
        let mut decoder = SseDecoder::default();
        let payloads = feed_str(&mut decoder, "data:   {\"k\":1}  \n\n");
        assert_eq!(payloads, vec![r#"{"k":1}"#]);
    }

    #[test]
    fn blank_payloads_are_skipped() {
        let mut decoder = SseDecoder::default();
        assert!(feed_str(&mut decoder, "data: \n\n").is_empty());
        assert!(feed_str(&mut decoder, "data:\n\n").is_empty());
    }

    #[test]
    fn multi_line_event_yields_each_data_line() {
        let mut decoder = SseDecoder::default();
        let payloads = feed_str(&mut decoder, "data: one\ndata: two\n\n");
        assert_eq!(payloads, vec!["one", "two"]);
    }

    #[test]
    fn finish_on_an_empty_decoder_yields_nothing() {
        assert!(SseDecoder::default().finish().is_empty());
    }

    #[test]
    fn finish_flushes_an_unterminated_trailing_event() {
        let mut decoder = SseDecoder::default();
        assert!(feed_str(&mut decoder, "data: cut off mid-frame").is_empty());
        assert_eq!(decoder.finish(), vec!["cut off mid-frame"]);
    }

    #[test]
    fn finish_ignores_trailing_whitespace_noise() {
        let mut decoder = SseDecoder::default();
        assert!(feed_str(&mut decoder, "\n \n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn done_sentinel_is_an_ordinary_payload() {
        let mut decoder = SseDecoder::default();
        let payloads = feed_str(&mut decoder, "data: [DONE]\n\n");
        assert_eq!(payloads, vec!["[DONE]"]);
    }
}
