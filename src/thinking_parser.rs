// Thinking block parser for streaming responses
//
// A streaming state machine that splits interleaved upstream text into
// `Thinking` and `Text` segments. State is exactly `{mode, carry_buffer}`:
// `carry_buffer` holds whatever bytes have been accepted but not yet
// classified, whether that's "might still be the opening tag" (mode
// `Pending`) or "might still contain the closing tag" (mode `Thinking`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserMode {
    /// Looking for the opening `<thinking>` tag at the very start of the stream.
    Pending,
    /// Inside a thinking block, looking for the closing tag.
    Thinking,
    /// Thinking block closed; everything else is plain text.
    Text,
    /// No thinking block was ever opened; everything is plain text.
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Thinking(String),
    Text(String),
}

const OPEN_TAG: &str = "<thinking>";
const CLOSE_TAG: &str = "</thinking>";

/// Bytes retained across calls so a tag split across network frames never
/// produces spurious output: large enough to hold a fully-buffered closing
/// tag plus one lookahead byte for the fake-tag quote check.
const CLOSE_TAG_HOLDBACK: usize = CLOSE_TAG.len() + 1;

fn is_quote(c: char) -> bool {
    matches!(c, '`' | '\'' | '"')
}

/// A streaming `<thinking>...</thinking>` extractor. Pure function of input
/// plus state: no global mutable flags.
pub struct ThinkingParser {
    mode: ParserMode,
    carry_buffer: String,
}

impl ThinkingParser {
    pub fn new() -> Self {
        Self {
            mode: ParserMode::Pending,
            carry_buffer: String::new(),
        }
    }

    pub fn mode(&self) -> ParserMode {
        self.mode
    }

    /// Feed the next fragment of upstream text, returning zero or more
    /// segments extracted from it (and any carried-over bytes now resolved).
    pub fn feed(&mut self, input: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        if input.is_empty() {
            return out;
        }

        match self.mode {
            ParserMode::Pending => self.feed_pending(input, &mut out),
            ParserMode::Thinking => {
                self.carry_buffer.push_str(input);
                self.scan_thinking(&mut out);
            }
            ParserMode::Text | ParserMode::Passthrough => {
                out.push(Segment::Text(input.to_string()));
            }
        }

        out
    }

    fn feed_pending(&mut self, input: &str, out: &mut Vec<Segment>) {
        self.carry_buffer.push_str(input);
        let stripped = self.carry_buffer.trim_start();

        if let Some(after_tag) = stripped.strip_prefix(OPEN_TAG) {
            let after_tag = after_tag.to_string();
            self.carry_buffer.clear();
            self.mode = ParserMode::Thinking;
            self.carry_buffer.push_str(&after_tag);
            self.scan_thinking(out);
            return;
        }

        if OPEN_TAG.starts_with(stripped) {
            // Might still be receiving the opening tag; keep buffering.
            return;
        }

        // Buffer can no longer become `<thinking>`: this stream never opens one.
        self.mode = ParserMode::Passthrough;
        let buffered = std::mem::take(&mut self.carry_buffer);
        out.push(Segment::Text(buffered));
    }

    fn scan_thinking(&mut self, out: &mut Vec<Segment>) {
        if let Some(idx) = self.find_genuine_close() {
            let close_end = idx + CLOSE_TAG.len();
            if close_end == self.carry_buffer.len() {
                // The tag ends exactly at the buffer boundary: no lookahead byte
                // is available yet, so a quote arriving in the next frame could
                // still turn this into a fake tag. Hold it back instead of
                // committing to "genuine" prematurely.
                self.holdback_thinking_tail(out);
                return;
            }
            self.commit_close(idx, out);
            return;
        }

        self.holdback_thinking_tail(out);
    }

    fn commit_close(&mut self, idx: usize, out: &mut Vec<Segment>) {
        let thinking_text = self.carry_buffer[..idx].to_string();
        let rest = self.carry_buffer[idx + CLOSE_TAG.len()..].to_string();
        self.carry_buffer.clear();
        self.mode = ParserMode::Text;

        if !thinking_text.is_empty() {
            out.push(Segment::Thinking(thinking_text));
        }
        if !rest.is_empty() {
            out.push(Segment::Text(rest));
        }
    }

    /// Finds the first `</thinking>` occurrence that is not a fake tag
    /// (quote-adjacent on either side), scanning past fake occurrences.
    fn find_genuine_close(&self) -> Option<usize> {
        let buf = &self.carry_buffer;
        let mut search_from = 0;
        while let Some(rel) = buf[search_from..].find(CLOSE_TAG) {
            let idx = search_from + rel;
            if !self.is_fake_tag_at(idx) {
                return Some(idx);
            }
            search_from = idx + 1;
        }
        None
    }

    fn is_fake_tag_at(&self, idx: usize) -> bool {
        let buf = &self.carry_buffer;
        let before = buf[..idx].chars().next_back();
        let after = buf[idx + CLOSE_TAG.len()..].chars().next();
        before.is_some_and(is_quote) || after.is_some_and(is_quote)
    }

    /// No genuine close tag found yet: emit everything except a trailing
    /// holdback window, so a closing tag (or its quote-adjacency context)
    /// split across frames is never misread as plain content.
    fn holdback_thinking_tail(&mut self, out: &mut Vec<Segment>) {
        if self.carry_buffer.len() <= CLOSE_TAG_HOLDBACK {
            return;
        }
        let target = self.carry_buffer.len() - CLOSE_TAG_HOLDBACK;
        let safe_split = self
            .carry_buffer
            .char_indices()
            .map(|(i, _)| i)
            .take_while(|&i| i <= target)
            .last()
            .unwrap_or(0);
        if safe_split == 0 {
            return;
        }

        let emit = self.carry_buffer[..safe_split].to_string();
        self.carry_buffer = self.carry_buffer[safe_split..].to_string();
        out.push(Segment::Thinking(emit));
    }

    /// End-of-stream: any buffered thinking text is emitted as a final
    /// `Thinking` segment (an unterminated block is preserved and logged);
    /// buffered non-thinking text is emitted as `Text`. Idempotent: calling
    /// this twice in a row emits nothing on the second call.
    pub fn flush(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        if self.carry_buffer.is_empty() {
            return out;
        }

        match self.mode {
            ParserMode::Thinking => {
                // No more frames are coming, so a close tag held back only for
                // lack of a lookahead byte is now known genuine.
                if let Some(idx) = self.find_genuine_close() {
                    self.commit_close(idx, &mut out);
                } else {
                    tracing::warn!("thinking block never closed; flushing unterminated buffer");
                    out.push(Segment::Thinking(std::mem::take(&mut self.carry_buffer)));
                }
            }
            _ => {
                out.push(Segment::Text(std::mem::take(&mut self.carry_buffer)));
            }
        }

        out
    }
}

impl Default for ThinkingParser {
    fn default() -> Self {
        Self::new()
    }
}

fn concat_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Thinking(t) => t.as_str(),
            Segment::Text(t) => t.as_str(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(input: &str) -> (Vec<Segment>, Vec<Segment>) {
        let mut parser = ThinkingParser::new();
        let mut fed = parser.feed(input);
        let flushed = parser.flush();
        fed.extend(flushed.clone());
        (fed, flushed)
    }

    #[test]
    fn basic_thinking_block() {
        let (segments, _) = run("<thinking>Hello world</thinking>Done");
        assert_eq!(
            segments,
            vec![
                Segment::Thinking("Hello world".to_string()),
                Segment::Text("Done".to_string()),
            ]
        );
    }

    #[test]
    fn no_thinking_block_is_passthrough() {
        let mut parser = ThinkingParser::new();
        let segments = parser.feed("Hello world, this is regular content");
        assert_eq!(parser.mode(), ParserMode::Passthrough);
        assert_eq!(
            segments,
            vec![Segment::Text("Hello world, this is regular content".to_string())]
        );
    }

    #[test]
    fn split_opening_tag_across_frames() {
        let mut parser = ThinkingParser::new();
        let first = parser.feed("<think");
        assert!(first.is_empty());
        assert_eq!(parser.mode(), ParserMode::Pending);

        let second = parser.feed("ing>Hello");
        assert_eq!(parser.mode(), ParserMode::Thinking);
        assert!(second.is_empty() || matches!(second[0], Segment::Thinking(_)));
    }

    #[test]
    fn split_closing_tag_across_frames() {
        let mut parser = ThinkingParser::new();
        parser.feed("<thinking>partial thought ");
        // Split the closing tag itself across two feeds.
        let first = parser.feed("</thin");
        assert!(first.iter().all(|s| matches!(s, Segment::Thinking(_))));
        let second = parser.feed("king>After");
        assert_eq!(parser.mode(), ParserMode::Text);
        assert!(second.iter().any(|s| *s == Segment::Text("After".to_string())));
    }

    #[test]
    fn fake_closing_tag_adjacent_to_quote_is_literal() {
        let mut parser = ThinkingParser::new();
        let segments = parser.feed("<thinking>the tag is `</thinking>` literally, not real</thinking>real end");
        assert_eq!(parser.mode(), ParserMode::Text);
        // The first, quote-adjacent occurrence must not have closed the block.
        let thinking: String = segments
            .iter()
            .filter_map(|s| match s {
                Segment::Thinking(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert!(thinking.contains("`</thinking>`"));
    }

    #[test]
    fn whitespace_before_opening_tag_is_stripped_for_detection() {
        let mut parser = ThinkingParser::new();
        let segments = parser.feed("   <thinking>Content</thinking>Done");
        assert!(segments.iter().any(|s| *s == Segment::Thinking("Content".to_string())));
        assert!(segments.iter().any(|s| *s == Segment::Text("Done".to_string())));
    }

    #[test]
    fn flush_on_unterminated_block_preserves_content() {
        let mut parser = ThinkingParser::new();
        parser.feed("<thinking>Incomplete thinking");
        assert_eq!(parser.mode(), ParserMode::Thinking);

        let flushed = parser.flush();
        assert_eq!(flushed, vec![Segment::Thinking("Incomplete thinking".to_string())]);
    }

    #[test]
    fn flush_is_idempotent() {
        let mut parser = ThinkingParser::new();
        parser.feed("<thinking>Incomplete");
        let first = parser.flush();
        assert!(!first.is_empty());
        let second = parser.flush();
        assert!(second.is_empty());
    }

    #[test]
    fn flush_in_pending_state_emits_as_text() {
        let mut parser = ThinkingParser::new();
        parser.feed("<thin");
        assert_eq!(parser.mode(), ParserMode::Pending);
        let flushed = parser.flush();
        assert_eq!(flushed, vec![Segment::Text("<thin".to_string())]);
    }

    #[test]
    fn totality_concat_equals_input_with_tags_stripped() {
        let input = "<thinking>step one, step two</thinking>final answer";
        let mut parser = ThinkingParser::new();
        let mut segments = parser.feed(input);
        segments.extend(parser.flush());

        let expected = "step one, step twofinal answer";
        assert_eq!(concat_segments(&segments), expected);
    }

    proptest::proptest! {
        #[test]
        fn totality_holds_for_arbitrary_fragmented_feeds(
            chunks in proptest::collection::vec("[a-zA-Z0-9 <>/_.,]{0,12}", 0..12)
        ) {
            let whole: String = chunks.concat();
            let mut parser = ThinkingParser::new();
            let mut segments = Vec::new();
            for chunk in &chunks {
                segments.extend(parser.feed(chunk));
            }
            segments.extend(parser.flush());

            let expected = strip_first_genuine_tag_pair(&whole);
            proptest::prop_assert_eq!(concat_segments(&segments), expected);
        }
    }

    /// Reference model used only by the property test: strips the first
    /// legitimate (non-fake) `<thinking>...</thinking>` pair at the very
    /// start of the string, mirroring what the FSM is defined to do.
    fn strip_first_genuine_tag_pair(input: &str) -> String {
        let stripped = input.trim_start();
        let leading_ws_len = input.len() - stripped.len();
        let Some(after_open) = stripped.strip_prefix(OPEN_TAG) else {
            return input.to_string();
        };

        let mut search_from = 0;
        loop {
            let Some(rel) = after_open[search_from..].find(CLOSE_TAG) else {
                // unterminated: whole remainder is thinking content
                return format!("{}{}", &input[..leading_ws_len], after_open);
            };
            let idx = search_from + rel;
            let before = after_open[..idx].chars().next_back();
            let after = after_open[idx + CLOSE_TAG.len()..].chars().next();
            if before.is_some_and(is_quote) || after.is_some_and(is_quote) {
                search_from = idx + 1;
                continue;
            }
            let thinking = &after_open[..idx];
            let rest = &after_open[idx + CLOSE_TAG.len()..];
            return format!("{}{}{}", &input[..leading_ws_len], thinking, rest);
        }
    }
}
