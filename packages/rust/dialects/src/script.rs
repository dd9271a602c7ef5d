//! Scripts with chunk markers, the format produced by tangling.
//!
//! ```text
//! #' Prose line.
//! ## ----setup, echo=FALSE----
//! x = 1
//! ```
//!
//! Prose lines lose their `#'` prefix, so segment text does not reproduce
//! the input byte-for-byte for this dialect.

use std::sync::LazyLock;

use regex::Regex;

use knitwork_shared::Segment;

use crate::builder::{OpenChunk, SegmentBuilder, content, no_inline, numbered_lines};

static CHUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:##|////|%%)\s*-{4,}\s*(.*?)\s*-*\s*$").expect("valid regex")
});

static PROSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:#|//|%)' ?(.*)$").expect("valid regex"));

pub(crate) fn split(text: &str) -> Vec<Segment> {
    let mut builder = SegmentBuilder::new(&no_inline);
    let mut open: Option<OpenChunk> = None;

    for (line_no, line) in numbered_lines(text) {
        let bare = content(line);

        if let Some(caps) = CHUNK_HEADER.captures(bare) {
            if let Some(chunk) = open.take() {
                builder.push_code(chunk.into_segment(true));
            }
            open = Some(OpenChunk::new(line_no, line, None, &caps[1]));
            continue;
        }

        if let Some(caps) = PROSE.captures(bare) {
            if let Some(chunk) = open.take() {
                builder.push_code(chunk.into_segment(true));
            }
            let terminator = &line[bare.len()..];
            builder.push_prose(line_no, &format!("{}{terminator}", &caps[1]));
            continue;
        }

        match open.as_mut() {
            Some(chunk) => chunk.push_body(line_no, line),
            None if bare.trim().is_empty() => builder.push_prose(line_no, line),
            // Code before any marker forms an unlabeled chunk.
            None => {
                let mut chunk = OpenChunk::new(line_no, "", None, "");
                chunk.push_body(line_no, line);
                open = Some(chunk);
            }
        }
    }

    if let Some(chunk) = open {
        builder.push_code(chunk.into_segment(true));
    }

    builder.finish()
}
