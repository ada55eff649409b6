//! In-band control markers.
//!
//! Markers are short ASCII tokens delimited by `<|` and `|>`:
//!
//! | Marker             | Meaning                                   |
//! |--------------------|-------------------------------------------|
//! | `<\|call:ID:NAME\|>` | open a tool call and target its arguments |
//! | `<\|args:ID\|>`      | start a new argument fragment for `ID`    |
//! | `<\|end:ID\|>`       | close call `ID`                           |
//! | `<\|done\|>`         | the model finished its turn               |
//! | `<\|error:KIND\|>`   | the provider reported an in-band error    |
//!
//! Anything between `<|` and `|>` that does not parse is literal text.

/// Longest span (including delimiters) scanned for a closing `|>`.
pub const MAX_MARKER_LEN: usize = 160;

/// Longest id, tool name or error kind.
pub const MAX_TOKEN_LEN: usize = 64;

pub const OPEN: &[u8] = b"<|";
pub const CLOSE: &[u8] = b"|>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    Call { id: String, name: String },
    Args { id: String },
    End { id: String },
    Done,
    Error { kind: String },
}

/// Result of looking at the bytes that start with `<`.
#[derive(Debug, PartialEq, Eq)]
pub enum Scan {
    /// A marker spanning this many bytes.
    Marker(Marker, usize),
    /// The `<` is ordinary content.
    Literal,
    /// Not enough input yet to decide.
    Incomplete,
}

/// Classify `rest`, which must start with `<`. With `eof` set, an undecided
/// prefix is literal.
pub fn scan(rest: &[u8], eof: bool) -> Scan {
    debug_assert_eq!(rest.first(), Some(&b'<'));
    if rest.len() < OPEN.len() {
        return if eof { Scan::Literal } else { Scan::Incomplete };
    }
    if !rest.starts_with(OPEN) {
        return Scan::Literal;
    }

    let window = &rest[..rest.len().min(MAX_MARKER_LEN)];
    let close = window[OPEN.len()..]
        .windows(CLOSE.len())
        .position(|w| w == CLOSE)
        .map(|pos| pos + OPEN.len());

    match close {
        Some(end) => match parse(&window[OPEN.len()..end]) {
            Some(marker) => Scan::Marker(marker, end + CLOSE.len()),
            None => Scan::Literal,
        },
        None if eof || rest.len() >= MAX_MARKER_LEN => Scan::Literal,
        None => Scan::Incomplete,
    }
}

fn parse(body: &[u8]) -> Option<Marker> {
    let body = std::str::from_utf8(body).ok()?;
    let mut parts = body.split(':');
    let marker = match parts.next()? {
        "call" => {
            let id = token(parts.next()?)?;
            let name = token(parts.next()?)?;
            Marker::Call { id, name }
        }
        "args" => Marker::Args {
            id: token(parts.next()?)?,
        },
        "end" => Marker::End {
            id: token(parts.next()?)?,
        },
        "done" => Marker::Done,
        "error" => Marker::Error {
            kind: token(parts.next()?)?,
        },
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(marker)
}

fn token(raw: &str) -> Option<String> {
    let valid = !raw.is_empty()
        && raw.len() <= MAX_TOKEN_LEN
        && raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));
    valid.then(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_marker_kind() {
        assert_eq!(
            scan(b"<|call:c1:read_file|>", false),
            Scan::Marker(Marker::Call { id: "c1".into(), name: "read_file".into() }, 21)
        );
        assert_eq!(scan(b"<|args:c1|>", false), Scan::Marker(Marker::Args { id: "c1".into() }, 11));
        assert_eq!(scan(b"<|end:c1|>rest", false), Scan::Marker(Marker::End { id: "c1".into() }, 10));
        assert_eq!(scan(b"<|done|>", false), Scan::Marker(Marker::Done, 8));
        assert_eq!(
            scan(b"<|error:overloaded|>", false),
            Scan::Marker(Marker::Error { kind: "overloaded".into() }, 20)
        );
    }

    #[test]
    fn undecided_prefix_waits_for_more_input() {
        assert_eq!(scan(b"<", false), Scan::Incomplete);
        assert_eq!(scan(b"<|call:1", false), Scan::Incomplete);
        assert_eq!(scan(b"<|call:1", true), Scan::Literal);
    }

    #[test]
    fn malformed_markers_are_literal() {
        assert_eq!(scan(b"<b>", false), Scan::Literal);
        assert_eq!(scan(b"<|call:1|>", false), Scan::Literal);
        assert_eq!(scan(b"<|end:a b|>", false), Scan::Literal);
        assert_eq!(scan(b"<|done:extra|>", false), Scan::Literal);
        assert_eq!(scan(b"<|unknown|>", false), Scan::Literal);
        assert_eq!(scan(b"<|>", false), Scan::Incomplete);
    }

    #[test]
    fn overlong_span_is_literal() {
        let mut bytes = b"<|call:".to_vec();
        bytes.extend(std::iter::repeat_n(b'a', MAX_MARKER_LEN));
        assert_eq!(scan(&bytes, false), Scan::Literal);
    }

    #[test]
    fn non_utf8_body_is_literal() {
        assert_eq!(scan(b"<|\xff\xfe|>", false), Scan::Literal);
    }
}
