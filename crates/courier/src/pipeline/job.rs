use crate::{SurfaceId, Token};
use serde::Serialize;

/// A finalized upload promoted into a consumer-facing unit of work.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrintJob {
    pub token: Token,
    html: Option<String>,
    pub title: String,
    pub filename: String,
    pub chunk_size: usize,
    pub created_at: u64,
    /// The requester's context, if it identified itself.
    pub source_tab_id: Option<SurfaceId>,
    /// The consumer surface, once it has been opened.
    pub tab_id: Option<SurfaceId>,
}

impl PrintJob {
    pub(crate) const fn new(
        token: Token,
        html: Option<String>,
        title: String,
        filename: String,
        chunk_size: usize,
        created_at: u64,
        source_tab_id: Option<SurfaceId>,
    ) -> Self {
        Self {
            token,
            html,
            title,
            filename,
            chunk_size,
            created_at,
            source_tab_id,
            tab_id: None,
        }
    }

    pub fn html(&self) -> Option<&str> {
        self.html.as_deref()
    }
}

/// Returned by a print job metadata request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub title: String,
    pub filename: String,
    /// Payload length in bytes.
    pub length: usize,
    pub chunk_size: usize,
}

/// One slice of a job's payload.
///
/// An empty `chunk` whose `next_offset` equals the payload length marks the
/// end of the stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintChunk {
    pub chunk: String,
    pub next_offset: usize,
}

/// Per-request overrides applied when a job is started.
#[derive(Clone, Debug, Default)]
pub struct StartOptions {
    pub title: Option<String>,
    pub filename: Option<String>,
    pub source_tab_id: Option<SurfaceId>,
}

/// Returns the slice of `html` starting at `offset` spanning at most `length`
/// bytes, plus the offset to continue from.
///
/// A chunk never begins before `offset`: an offset inside a multi-byte
/// character starts at the next character. The end is snapped down to a
/// character boundary, but every call on a non-exhausted payload advances by
/// at least one character. An `offset` at or past the end yields
/// `("", html.len())`.
pub fn slice_chunk(html: &str, offset: usize, length: usize) -> (&str, usize) {
    let total = html.len();
    if offset >= total {
        return ("", total);
    }

    let start = ceil_char_boundary(html, offset);
    if start >= total {
        return ("", total);
    }
    let mut end = floor_char_boundary(html, start.saturating_add(length).min(total));
    if end <= start {
        end = ceil_char_boundary(html, start + 1);
    }
    (&html[start..end], end)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(s: &str, mut index: usize) -> usize {
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
