//! Interpolation span matching for `{{variable}}` markers
//!
//! Offsets are byte offsets into the text buffer. A cursor that falls inside
//! a multi-byte character is moved back to the start of that character.

pub const OPEN_MARKER: &str = "{{";
pub const CLOSE_MARKER: &str = "}}";

/// Open interpolation region the cursor is currently in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSpan {
    /// Offset immediately after the open marker
    pub start: usize,
    /// Cursor offset
    pub end: usize,
    /// Trimmed text between the open marker and the cursor
    pub query: String,
}

fn clamp_cursor(text: &str, cursor: usize) -> usize {
    let mut cursor = cursor.min(text.len());
    while !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}

/// Find the interpolation span the cursor sits in, if any.
///
/// Only the nearest `{{` before the cursor counts. If a `}}` appears between
/// it and the cursor, the span is already closed.
pub fn find_active_span(text: &str, cursor: usize) -> Option<ActiveSpan> {
    let cursor = clamp_cursor(text, cursor);
    let before = &text[..cursor];

    let open = before.rfind(OPEN_MARKER)?;
    let start = open + OPEN_MARKER.len();
    let inside = &before[start..];

    if inside.contains(CLOSE_MARKER) {
        return None;
    }

    Some(ActiveSpan {
        start,
        end: cursor,
        query: inside.trim().to_string(),
    })
}

/// Replace `[span.start, span.end)` with `name}}`.
///
/// Returns the new text and the cursor offset right after the inserted
/// closing marker. Text outside the span is left untouched.
pub fn splice(text: &str, span: &ActiveSpan, name: &str) -> (String, usize) {
    let end = clamp_cursor(text, span.end);
    let start = clamp_cursor(text, span.start.min(end));

    let mut out = String::with_capacity(text.len() + name.len() + CLOSE_MARKER.len());
    out.push_str(&text[..start]);
    out.push_str(name);
    out.push_str(CLOSE_MARKER);
    let cursor = out.len();
    out.push_str(&text[end..]);

    (out, cursor)
}
