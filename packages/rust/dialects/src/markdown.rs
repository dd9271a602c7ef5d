//! Markdown documents: fenced chunks, backtick inline code, and markdown hooks.
//!
//! ````text
//! ```{calc label, echo=FALSE}
//! x = 1 + 1
//! ```
//!
//! The answer is `calc x`.
//! ````

use std::sync::LazyLock;

use regex::Regex;

use knitwork_shared::{ChunkOptions, InlineCode, ResultsMode, Segment};

use crate::builder::{OpenChunk, SegmentBuilder, content, numbered_lines};
use crate::hooks::{Hooks, PlotInfo, ensure_newline};

static CHUNK_BEGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\t >]*`{3,}\s*\{([A-Za-z0-9_]+)(.*)\}\s*$").expect("valid regex")
});

static CHUNK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\t >]*`{3,}\s*$").expect("valid regex"));

/// Split markdown into prose and fenced chunks.
///
/// Inline code is recognized only for the given engine names.
pub(crate) fn split(text: &str, inline_engines: &[&str]) -> Vec<Segment> {
    let inline_re = inline_pattern(inline_engines);
    let inline_finder = |prose: &str| find_inline(inline_re.as_ref(), prose);
    let mut builder = SegmentBuilder::new(&inline_finder);
    let mut open: Option<OpenChunk> = None;

    for (line_no, line) in numbered_lines(text) {
        let bare = content(line);
        match open.take() {
            Some(mut chunk) => {
                if CHUNK_END.is_match(bare) {
                    chunk.push_raw(line_no, line);
                    builder.push_code(chunk.into_segment(false));
                } else {
                    chunk.push_body(line_no, line);
                    open = Some(chunk);
                }
            }
            None => match CHUNK_BEGIN.captures(bare) {
                Some(caps) => {
                    open = Some(OpenChunk::new(
                        line_no,
                        line,
                        Some(caps[1].to_string()),
                        &caps[2],
                    ));
                }
                None => builder.push_prose(line_no, line),
            },
        }
    }

    // An unterminated chunk runs to the end of the document.
    if let Some(chunk) = open {
        builder.push_code(chunk.into_segment(false));
    }

    builder.finish()
}

fn inline_pattern(engines: &[&str]) -> Option<Regex> {
    if engines.is_empty() {
        return None;
    }
    let names = engines
        .iter()
        .map(|e| regex::escape(e))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"`({names}) +([^`\n]+?)\s*`")).ok()
}

fn find_inline(pattern: Option<&Regex>, prose: &str) -> Vec<InlineCode> {
    let Some(pattern) = pattern else {
        return Vec::new();
    };
    pattern
        .captures_iter(prose)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(InlineCode {
                engine: Some(caps[1].to_string()),
                code: caps[2].to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

/// Split a leading `---` metadata block from the rest of the document.
pub(crate) fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let mut lines = numbered_lines(text);
    let (_, first) = lines.next()?;
    if content(first) != "---" {
        return None;
    }
    let mut offset = first.len();
    for (_, line) in lines {
        offset += line.len();
        let bare = content(line);
        if bare == "---" || bare == "..." {
            return Some(text.split_at(offset));
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Markdown hooks: fenced source/output blocks and image links.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownHooks;

impl Hooks for MarkdownHooks {
    fn source(&self, code: &str, options: &ChunkOptions) -> String {
        format!("```{}\n{code}\n```\n", options.engine)
    }

    fn output(&self, text: &str, options: &ChunkOptions) -> String {
        if options.results == ResultsMode::Asis {
            return ensure_newline(text);
        }
        format!("```\n{text}\n```\n")
    }

    fn plot(&self, plot: &PlotInfo<'_>, _options: &ChunkOptions) -> String {
        let caption = match plot.caption {
            Some(cap) => cap.to_string(),
            None => format!("plot of chunk {}", plot.label),
        };
        format!("![{caption}]({})\n", plot.path)
    }

    fn chunk(&self, pieces: &[String], options: &ChunkOptions) -> String {
        static FENCE_JOIN: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"```\n\n```[A-Za-z0-9_]*\n").expect("valid regex"));

        let joined = pieces.join("\n");
        if options.collapse {
            FENCE_JOIN.replace_all(&joined, "").into_owned()
        } else {
            joined
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knitwork_shared::LineRange;
    use pretty_assertions::assert_eq;

    fn code_segments(segments: &[Segment]) -> Vec<&knitwork_shared::CodeSegment> {
        segments.iter().filter_map(Segment::as_code).collect()
    }

    #[test]
    fn split_prose_and_chunks() {
        let doc = "# Title\n\n```{calc setup, echo=FALSE}\nx = 1\ny = 2\n```\n\nAfter.\n";
        let segments = split(doc, &["calc"]);

        assert_eq!(segments.len(), 3);
        let chunk = code_segments(&segments)[0];
        assert_eq!(chunk.engine.as_deref(), Some("calc"));
        assert_eq!(chunk.options, "setup, echo=FALSE");
        assert_eq!(chunk.code, "x = 1\ny = 2");
        assert_eq!(chunk.lines, LineRange::new(3, 6));
        assert_eq!(segments[0].lines(), LineRange::new(1, 2));
        assert_eq!(segments[2].lines(), LineRange::new(7, 8));

        let rebuilt: String = segments.iter().map(Segment::raw).collect();
        assert_eq!(rebuilt, doc);
    }

    #[test]
    fn header_with_leading_comma() {
        let segments = split("```{calc, echo=FALSE}\n1\n```\n", &["calc"]);
        assert_eq!(code_segments(&segments)[0].options, "echo=FALSE");
    }

    #[test]
    fn plain_fences_are_prose() {
        let doc = "```rust\nfn main() {}\n```\n";
        let segments = split(doc, &["calc"]);
        assert_eq!(segments.len(), 1);
        assert!(matches!(segments[0], Segment::Prose(_)));
    }

    #[test]
    fn unterminated_chunk_runs_to_end() {
        let segments = split("Intro\n```{calc}\nx = 1\n", &["calc"]);
        let chunk = code_segments(&segments)[0];
        assert_eq!(chunk.code, "x = 1");
        assert_eq!(chunk.lines, LineRange::new(2, 3));
    }

    #[test]
    fn inline_code_for_known_engines_only() {
        let segments = split("Sum is `calc 1 + 2` and `code stays`.\n", &["calc"]);
        let Segment::Prose(prose) = &segments[0] else {
            panic!("expected prose");
        };
        assert_eq!(prose.inline.len(), 1);
        assert_eq!(prose.inline[0].code, "1 + 2");
        assert_eq!(&prose.text[prose.inline[0].span.clone()], "`calc 1 + 2`");
    }

    #[test]
    fn front_matter_detection() {
        let doc = "---\ntitle: Report\n---\nBody\n";
        let (front, rest) = split_front_matter(doc).expect("front matter");
        assert_eq!(front, "---\ntitle: Report\n---\n");
        assert_eq!(rest, "Body\n");
        assert!(split_front_matter("Body\n---\n").is_none());
    }

    #[test]
    fn hooks_render_fences() {
        let opts = ChunkOptions::default();
        assert_eq!(MarkdownHooks.source("x = 1", &opts), "```calc\nx = 1\n```\n");
        assert_eq!(MarkdownHooks.output("## 2", &opts), "```\n## 2\n```\n");

        let asis = ChunkOptions {
            results: ResultsMode::Asis,
            ..ChunkOptions::default()
        };
        assert_eq!(MarkdownHooks.output("**bold**", &asis), "**bold**\n");
    }

    #[test]
    fn chunk_hook_collapses_adjacent_fences() {
        let pieces = vec![
            "```calc\nx\n```\n".to_string(),
            "```\n## 2\n```\n".to_string(),
        ];
        let opts = ChunkOptions::default();
        assert_eq!(
            MarkdownHooks.chunk(&pieces, &opts),
            "```calc\nx\n```\n\n```\n## 2\n```\n"
        );

        let collapsed = ChunkOptions {
            collapse: true,
            ..ChunkOptions::default()
        };
        assert_eq!(
            MarkdownHooks.chunk(&pieces, &collapsed),
            "```calc\nx\n## 2\n```\n"
        );
    }

    #[test]
    fn plot_hook_uses_caption_or_label() {
        let opts = ChunkOptions::default();
        let info = PlotInfo {
            path: "figure/trend-1.svg",
            index: 1,
            number: 1,
            label: "trend",
            caption: None,
        };
        assert_eq!(
            MarkdownHooks.plot(&info, &opts),
            "![plot of chunk trend](figure/trend-1.svg)\n"
        );
    }
}
