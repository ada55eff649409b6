//! Incremental parser turning raw model output into [`StreamEvent`]s.
//!
//! The parser is fed arbitrary byte chunks. Events are only ever emitted at
//! points determined by the content itself (a marker, a newline inside text,
//! a run reaching [`RUN_FLUSH_BYTES`], or [`StreamParser::finalize`]), so the
//! event sequence does not depend on where the chunk boundaries fall.

use crate::marker::{self, Marker, Scan};
use skein_core::event::{StreamErrorKind, StreamEvent};
use skein_core::tool::{CallStatus, InvalidReason, ToolCall};

/// Default cap on one call's argument buffer.
pub const DEFAULT_MAX_ARGUMENT_BYTES: usize = 1024 * 1024;

/// A text run or argument fragment longer than this is emitted in pieces.
/// Pieces are cut on UTF-8 sequence boundaries.
pub const RUN_FLUSH_BYTES: usize = 8 * 1024;

/// Counters for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    pub events: usize,
    pub calls_opened: usize,
    pub calls_completed: usize,
    pub truncated: usize,
}

/// Where plain bytes currently go.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Text,
    Call(String),
}

#[derive(Debug)]
struct OpenCall {
    call: ToolCall,
    overflowed: bool,
}

/// Stateful parser for one model response.
#[derive(Debug)]
pub struct StreamParser {
    /// Undecided bytes, starting at a `<` that may begin a marker.
    pending: Vec<u8>,
    /// The text run or argument fragment being collected.
    run: Vec<u8>,
    target: Target,
    /// Open calls in the order they were opened.
    open: Vec<OpenCall>,
    max_argument_bytes: usize,
    finalized: bool,
    stats: ParserStats,
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ARGUMENT_BYTES)
    }
}

impl StreamParser {
    pub fn new(max_argument_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            run: Vec::new(),
            target: Target::Text,
            open: Vec::new(),
            max_argument_bytes,
            finalized: false,
            stats: ParserStats::default(),
        }
    }

    /// Feed one chunk and return the events it completes.
    pub fn process(&mut self, chunk: impl AsRef<[u8]>) -> Vec<StreamEvent> {
        let chunk = chunk.as_ref();
        if self.finalized {
            tracing::debug!(bytes = chunk.len(), "Ignoring input after finalize");
            return Vec::new();
        }
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        self.scan(false, &mut events);
        self.stats.events += events.len();
        events
    }

    /// Signal end of input. Flushes buffered content and force-completes
    /// every call still open as truncated. A second call returns nothing.
    pub fn finalize(&mut self) -> Vec<StreamEvent> {
        if self.finalized {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.scan(true, &mut events);
        self.flush_run(&mut events);

        for mut open in std::mem::take(&mut self.open) {
            if !open.overflowed {
                open.call.status = CallStatus::Invalid(InvalidReason::Truncated);
            }
            tracing::warn!(
                call_id = %open.call.id,
                tool = %open.call.name,
                buffered = open.call.raw_arguments.len(),
                "Stream ended with tool call still open"
            );
            self.stats.truncated += 1;
            self.stats.calls_completed += 1;
            events.push(StreamEvent::ToolCallComplete { call: open.call });
        }

        self.target = Target::Text;
        self.finalized = true;
        self.stats.events += events.len();
        tracing::debug!(stats = ?self.stats, "Stream parser finalized");
        events
    }

    /// Process every chunk, then finalize.
    pub fn feed_all<I, C>(&mut self, chunks: I) -> Vec<StreamEvent>
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(self.process(chunk));
        }
        events.extend(self.finalize());
        events
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Ids of calls currently open, in opening order.
    pub fn open_calls(&self) -> Vec<&str> {
        self.open.iter().map(|o| o.call.id.as_str()).collect()
    }

    fn scan(&mut self, eof: bool, events: &mut Vec<StreamEvent>) {
        let buf = std::mem::take(&mut self.pending);
        let mut i = 0;
        while i < buf.len() {
            let Some(offset) = buf[i..].iter().position(|&b| b == b'<') else {
                self.push_bytes(&buf[i..], events);
                return;
            };
            let start = i + offset;
            self.push_bytes(&buf[i..start], events);

            match marker::scan(&buf[start..], eof) {
                Scan::Incomplete => {
                    self.pending = buf[start..].to_vec();
                    return;
                }
                Scan::Literal => {
                    self.push_bytes(&buf[start..start + 1], events);
                    i = start + 1;
                }
                Scan::Marker(marker, len) => {
                    self.flush_run(events);
                    self.apply(marker, events);
                    i = start + len;
                }
            }
        }
    }

    fn push_bytes(&mut self, mut bytes: &[u8], events: &mut Vec<StreamEvent>) {
        if self.target != Target::Text {
            self.extend_run(bytes, events);
            return;
        }
        while let Some(nl) = bytes.iter().position(|&b| b == b'\n') {
            self.extend_run(&bytes[..=nl], events);
            self.flush_run(events);
            bytes = &bytes[nl + 1..];
        }
        self.extend_run(bytes, events);
    }

    /// Append to the run, emitting full-size pieces as soon as the bytes
    /// after them are known.
    fn extend_run(&mut self, bytes: &[u8], events: &mut Vec<StreamEvent>) {
        self.run.extend_from_slice(bytes);
        while self.run.len() > RUN_FLUSH_BYTES {
            let rest = self.run.split_off(sequence_boundary(&self.run, RUN_FLUSH_BYTES));
            self.flush_run(events);
            self.run = rest;
        }
    }

    fn flush_run(&mut self, events: &mut Vec<StreamEvent>) {
        if self.run.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.run).into_owned();
        self.run.clear();

        match &self.target {
            Target::Text => events.push(StreamEvent::TextDelta { text }),
            Target::Call(id) => {
                let limit = self.max_argument_bytes;
                if let Some(open) = self.open.iter_mut().find(|o| &o.call.id == id) {
                    if !open.overflowed {
                        if open.call.raw_arguments.len() + text.len() > limit {
                            tracing::warn!(call_id = %id, limit, "Tool call arguments too large");
                            open.overflowed = true;
                            open.call.status = CallStatus::Invalid(InvalidReason::TooLarge { limit });
                        } else {
                            open.call.raw_arguments.push_str(&text);
                        }
                    }
                }
                events.push(StreamEvent::ToolCallArgsDelta {
                    call_id: id.clone(),
                    fragment: text,
                });
            }
        }
    }

    fn apply(&mut self, marker: Marker, events: &mut Vec<StreamEvent>) {
        match marker {
            Marker::Call { id, name } => {
                if self.is_open(&id) {
                    tracing::warn!(call_id = %id, "Tool call id reused while open");
                    events.push(StreamEvent::StreamError {
                        kind: StreamErrorKind::DuplicateCall(id.clone()),
                    });
                } else {
                    tracing::debug!(call_id = %id, tool = %name, "Tool call opened");
                    self.stats.calls_opened += 1;
                    self.open.push(OpenCall {
                        call: ToolCall::open(id.clone(), name.clone()),
                        overflowed: false,
                    });
                    events.push(StreamEvent::ToolCallStart {
                        call_id: id.clone(),
                        name,
                    });
                }
                self.target = Target::Call(id);
            }
            Marker::Args { id } => {
                if self.is_open(&id) {
                    self.target = Target::Call(id);
                } else {
                    self.target = Target::Text;
                    events.push(self.unknown(id));
                }
            }
            Marker::End { id } => {
                let Some(index) = self.open.iter().position(|o| o.call.id == id) else {
                    events.push(self.unknown(id));
                    return;
                };
                let open = self.open.remove(index);
                if self.target == Target::Call(id) {
                    self.target = Target::Text;
                }
                self.stats.calls_completed += 1;
                events.push(StreamEvent::ToolCallComplete {
                    call: close(open),
                });
            }
            Marker::Done => events.push(StreamEvent::TurnDone),
            Marker::Error { kind } => {
                tracing::warn!(kind = %kind, "Provider reported an in-band error");
                events.push(StreamEvent::StreamError {
                    kind: StreamErrorKind::Provider(kind),
                });
            }
        }
    }

    fn is_open(&self, id: &str) -> bool {
        self.open.iter().any(|o| o.call.id == id)
    }

    fn unknown(&self, id: String) -> StreamEvent {
        tracing::warn!(call_id = %id, "Marker references a call that is not open");
        StreamEvent::StreamError {
            kind: StreamErrorKind::UnknownCall(id),
        }
    }
}

/// The largest cut at or below `limit` that does not land inside a UTF-8
/// sequence. `bytes` must be longer than `limit`.
fn sequence_boundary(bytes: &[u8], limit: usize) -> usize {
    (limit.saturating_sub(3)..=limit)
        .rev()
        .find(|&i| bytes[i] & 0xC0 != 0x80)
        .unwrap_or(limit)
}

/// Parse a closed call's buffer. Whitespace-only arguments mean `{}`.
fn close(open: OpenCall) -> ToolCall {
    let mut call = open.call;
    if open.overflowed {
        return call;
    }
    let raw = call.raw_arguments.trim();
    call.status = if raw.is_empty() {
        CallStatus::Parsed(serde_json::Value::Object(Default::default()))
    } else {
        match serde_json::from_str(raw) {
            Ok(value) => CallStatus::Parsed(value),
            Err(e) => CallStatus::Invalid(InvalidReason::Malformed {
                message: e.to_string(),
            }),
        }
    };
    call
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCENARIO: &str = r#"hello <|call:1:x|>{"a":<|args:1|>1}<|end:1|> world"#;

    fn parse_chunks(chunks: &[&[u8]]) -> Vec<StreamEvent> {
        StreamParser::default().feed_all(chunks.iter().copied())
    }

    fn parse(input: &[u8]) -> Vec<StreamEvent> {
        parse_chunks(&[input])
    }

    fn text(s: &str) -> StreamEvent {
        StreamEvent::TextDelta { text: s.into() }
    }

    fn completed(events: &[StreamEvent]) -> Vec<ToolCall> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ToolCallComplete { call } => Some(call.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn single_call_scenario() {
        let events = parse_chunks(&[SCENARIO.as_bytes()]);
        assert_eq!(
            events,
            vec![
                text("hello "),
                StreamEvent::ToolCallStart {
                    call_id: "1".into(),
                    name: "x".into()
                },
                StreamEvent::ToolCallArgsDelta {
                    call_id: "1".into(),
                    fragment: r#"{"a":"#.into()
                },
                StreamEvent::ToolCallArgsDelta {
                    call_id: "1".into(),
                    fragment: "1}".into()
                },
                StreamEvent::ToolCallComplete {
                    call: ToolCall {
                        id: "1".into(),
                        name: "x".into(),
                        raw_arguments: r#"{"a":1}"#.into(),
                        status: CallStatus::Parsed(json!({"a": 1})),
                    }
                },
                text(" world"),
            ]
        );
    }

    #[test]
    fn scenario_is_identical_at_arbitrary_split_points() {
        let whole = parse_chunks(&[SCENARIO.as_bytes()]);
        let bytes = SCENARIO.as_bytes();
        let cuts = [3, 9, 17, 24, 40];
        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut prev = 0;
        for cut in cuts {
            chunks.push(&bytes[prev..cut]);
            prev = cut;
        }
        chunks.push(&bytes[prev..]);
        assert_eq!(parse_chunks(&chunks), whole);

        let bytewise: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(parse_chunks(&bytewise), whole);
    }

    #[test]
    fn text_is_emitted_per_line() {
        let mut parser = StreamParser::default();
        assert!(parser.process("first ").is_empty());
        assert_eq!(parser.process("line\nsecond"), vec![text("first line\n")]);
        assert_eq!(parser.finalize(), vec![text("second")]);
    }

    #[test]
    fn interleaved_calls_accumulate_independently() {
        let input = concat!(
            "<|call:a:read_file|>{\"path\":",
            "<|call:b:list_dir|>{\"path\":\".\"}",
            "<|args:a|>\"notes.md\"}",
            "<|end:b|><|end:a|><|done|>"
        );
        let events = parse_chunks(&[input.as_bytes()]);
        let calls = completed(&events);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "b");
        assert_eq!(calls[0].arguments(), Some(&json!({"path": "."})));
        assert_eq!(calls[1].id, "a");
        assert_eq!(calls[1].arguments(), Some(&json!({"path": "notes.md"})));
        assert_eq!(events.last(), Some(&StreamEvent::TurnDone));
    }

    #[test]
    fn malformed_arguments_still_complete() {
        let events = parse(b"<|call:c1:x|>{\"a\": nope<|end:c1|>");
        let calls = completed(&events);
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            calls[0].status,
            CallStatus::Invalid(InvalidReason::Malformed { .. })
        ));
    }

    #[test]
    fn empty_arguments_parse_as_empty_object() {
        let events = parse(b"<|call:c1:now|><|end:c1|>");
        assert_eq!(completed(&events)[0].arguments(), Some(&json!({})));
    }

    #[test]
    fn finalize_truncates_open_calls_in_open_order() {
        let mut parser = StreamParser::default();
        parser.process("<|call:first:x|>{\"a\"<|call:second:y|>{");
        assert_eq!(parser.open_calls(), vec!["first", "second"]);

        let events = parser.finalize();
        let calls = completed(&events);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "first");
        assert_eq!(calls[1].id, "second");
        assert!(calls
            .iter()
            .all(|c| c.status == CallStatus::Invalid(InvalidReason::Truncated)));
        assert_eq!(parser.stats().truncated, 2);

        assert!(parser.finalize().is_empty());
        assert!(parser.process("more").is_empty());
    }

    #[test]
    fn unknown_and_duplicate_ids_are_reported() {
        let events = parse(b"<|end:ghost|><|call:c:x|>{}<|call:c:x|><|args:nope|>tail<|end:c|>");
        assert!(events.contains(&StreamEvent::StreamError {
            kind: StreamErrorKind::UnknownCall("ghost".into())
        }));
        assert!(events.contains(&StreamEvent::StreamError {
            kind: StreamErrorKind::DuplicateCall("c".into())
        }));
        assert!(events.contains(&StreamEvent::StreamError {
            kind: StreamErrorKind::UnknownCall("nope".into())
        }));
        // After an unknown `args`, plain bytes fall back to text.
        assert!(events.contains(&text("tail")));
        assert_eq!(completed(&events)[0].arguments(), Some(&json!({})));
    }

    #[test]
    fn oversized_arguments_become_too_large() {
        let mut parser = StreamParser::new(8);
        let mut events = parser.process("<|call:c:x|>{\"k\":\"0123456789\"}<|args:c|>{}<|end:c|>");
        events.extend(parser.finalize());
        let call = &completed(&events)[0];
        assert_eq!(call.status, CallStatus::Invalid(InvalidReason::TooLarge { limit: 8 }));
        // Fragments past the limit are still surfaced.
        let fragments = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCallArgsDelta { .. }))
            .count();
        assert_eq!(fragments, 2);
    }

    #[test]
    fn utf8_split_across_chunks_is_reassembled() {
        let bytes = "héllo → wörld\n".as_bytes();
        let mid = bytes.iter().position(|&b| b == 0xc3).unwrap() + 1;
        let events = parse_chunks(&[&bytes[..mid], &bytes[mid..]]);
        assert_eq!(events, vec![text("héllo → wörld\n")]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let events = parse(b"ok \xff\n");
        assert_eq!(events, vec![text("ok \u{fffd}\n")]);
    }

    #[test]
    fn lookalike_markers_are_text() {
        let events = parse(b"a <b> and <|nope|> and <|call:1|>");
        let joined: String = events
            .iter()
            .map(|e| match e {
                StreamEvent::TextDelta { text } => text.as_str(),
                _ => panic!("unexpected event {e:?}"),
            })
            .collect();
        assert_eq!(joined, "a <b> and <|nope|> and <|call:1|>");
    }

    fn deltas(events: &[StreamEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::TextDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn long_line_is_emitted_in_bounded_pieces() {
        let line = "x".repeat(RUN_FLUSH_BYTES * 3 + 10);
        let mut parser = StreamParser::default();
        let mut early = Vec::new();
        for chunk in line.as_bytes().chunks(1000) {
            early.extend(parser.process(chunk));
        }
        assert_eq!(deltas(&early).len(), 3, "pieces go out before the line ends");

        let mut events = early;
        events.extend(parser.finalize());
        assert!(deltas(&events).iter().all(|t| t.len() <= RUN_FLUSH_BYTES));
        assert_eq!(deltas(&events).concat(), line);
        assert_eq!(events, parse(line.as_bytes()));
    }

    #[test]
    fn pieces_do_not_split_characters() {
        // 'a' then two-byte characters: byte RUN_FLUSH_BYTES is mid-character.
        let line = format!("a{}", "é".repeat(RUN_FLUSH_BYTES));
        let bytewise: Vec<&[u8]> = line.as_bytes().chunks(7).collect();
        let events = parse_chunks(&bytewise);
        let pieces = deltas(&events);
        assert!(pieces.len() > 1);
        assert!(pieces.iter().all(|t| !t.contains('\u{fffd}')));
        assert_eq!(pieces[0].len(), RUN_FLUSH_BYTES - 1);
        assert_eq!(pieces.concat(), line);
    }

    #[test]
    fn long_arguments_are_fragmented_but_intact() {
        let value = "v".repeat(RUN_FLUSH_BYTES * 2);
        let input = format!(r#"<|call:c1:write_file|>{{"content":"{value}"}}<|end:c1|>"#);
        let events = parse(input.as_bytes());
        let fragments = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::ToolCallArgsDelta { .. }))
            .count();
        assert_eq!(fragments, 3);
        assert_eq!(completed(&events)[0].arguments(), Some(&json!({"content": value})));
    }

    #[test]
    fn provider_error_marker() {
        let events = parse(b"partial<|error:overloaded|>");
        assert_eq!(
            events,
            vec![
                text("partial"),
                StreamEvent::StreamError {
                    kind: StreamErrorKind::Provider("overloaded".into())
                }
            ]
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn split_at(bytes: &[u8], mut cuts: Vec<usize>) -> Vec<Vec<u8>> {
            cuts.iter_mut().for_each(|c| *c %= bytes.len() + 1);
            cuts.sort_unstable();
            let mut chunks = Vec::new();
            let mut prev = 0;
            for cut in cuts {
                chunks.push(bytes[prev..cut].to_vec());
                prev = cut;
            }
            chunks.push(bytes[prev..].to_vec());
            chunks
        }

        fn fragment() -> impl Strategy<Value = String> {
            prop_oneof![
                "[a-z \n]{0,12}",
                "\\{\"[a-z]{1,4}\":[0-9]{1,3}\\}",
                Just("<|call:c1:read_file|>".to_string()),
                Just("<|call:c2:list_dir|>".to_string()),
                Just("<|args:c1|>".to_string()),
                Just("<|args:c2|>".to_string()),
                Just("<|end:c1|>".to_string()),
                Just("<|end:c2|>".to_string()),
                Just("<|done|>".to_string()),
                Just("<|call:".to_string()),
                Just("<|".to_string()),
                Just("é→".to_string()),
            ]
        }

        proptest! {
            #[test]
            fn events_do_not_depend_on_chunking(
                parts in proptest::collection::vec(fragment(), 0..24),
                cuts in proptest::collection::vec(any::<usize>(), 0..10),
            ) {
                let input = parts.concat().into_bytes();
                let whole = StreamParser::default().feed_all([&input]);
                let chunked = StreamParser::default().feed_all(split_at(&input, cuts));
                prop_assert_eq!(whole, chunked);
            }

            #[test]
            fn arbitrary_bytes_never_panic(
                input in proptest::collection::vec(any::<u8>(), 0..512),
                cuts in proptest::collection::vec(any::<usize>(), 0..8),
            ) {
                let whole = StreamParser::new(64).feed_all([&input]);
                let chunked = StreamParser::new(64).feed_all(split_at(&input, cuts));
                prop_assert_eq!(whole, chunked);
            }

            #[test]
            fn every_opened_call_completes(parts in proptest::collection::vec(fragment(), 0..24)) {
                let events = StreamParser::default().feed_all([parts.concat()]);
                let starts = events.iter().filter(|e| matches!(e, StreamEvent::ToolCallStart { .. })).count();
                prop_assert_eq!(starts, completed(&events).len());
            }
        }
    }
}
