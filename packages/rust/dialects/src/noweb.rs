//! Noweb documents (`<<label, opts>>=` … `@`) rendered as LaTeX.

use std::sync::LazyLock;

use regex::Regex;

use knitwork_shared::{ChunkOptions, InlineCode, Segment};

use crate::builder::{OpenChunk, SegmentBuilder, content, numbered_lines};
use crate::hooks::{Hooks, PlotInfo, ensure_newline};

static CHUNK_BEGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*<<(.*)>>=.*$").expect("valid regex"));

static CHUNK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*@\s*(%.*)?$").expect("valid regex"));

static INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\Sexpr\{([^}]*)\}").expect("valid regex"));

/// Split a noweb document. A new chunk header also closes an open chunk.
pub(crate) fn split(text: &str) -> Vec<Segment> {
    let mut builder = SegmentBuilder::new(&find_inline);
    let mut open: Option<OpenChunk> = None;

    for (line_no, line) in numbered_lines(text) {
        let bare = content(line);
        if let Some(caps) = CHUNK_BEGIN.captures(bare) {
            if let Some(chunk) = open.take() {
                builder.push_code(chunk.into_segment(true));
            }
            open = Some(OpenChunk::new(line_no, line, None, &caps[1]));
            continue;
        }
        match open.take() {
            Some(mut chunk) if CHUNK_END.is_match(bare) => {
                chunk.push_raw(line_no, line);
                builder.push_code(chunk.into_segment(true));
            }
            Some(mut chunk) => {
                chunk.push_body(line_no, line);
                open = Some(chunk);
            }
            None => builder.push_prose(line_no, line),
        }
    }

    if let Some(chunk) = open {
        builder.push_code(chunk.into_segment(true));
    }

    builder.finish()
}

fn find_inline(prose: &str) -> Vec<InlineCode> {
    INLINE
        .captures_iter(prose)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some(InlineCode {
                engine: None,
                code: caps[1].trim().to_string(),
                span: whole.range(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Environment wrapped around every chunk's output.
const CHUNK_ENV: &str = "knitout";

/// LaTeX hooks: verbatim blocks, `\includegraphics`, figure environments.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatexHooks;

impl Hooks for LatexHooks {
    fn source(&self, code: &str, _options: &ChunkOptions) -> String {
        format!("\\begin{{verbatim}}\n{code}\n\\end{{verbatim}}\n")
    }

    fn output(&self, text: &str, options: &ChunkOptions) -> String {
        if options.results == knitwork_shared::ResultsMode::Asis {
            return ensure_newline(text);
        }
        format!("\\begin{{verbatim}}\n{text}\n\\end{{verbatim}}\n")
    }

    fn plot(&self, plot: &PlotInfo<'_>, _options: &ChunkOptions) -> String {
        let graphic = format!("\\includegraphics{{{}}}", plot.path);
        match plot.caption {
            Some(cap) => format!(
                "\\begin{{figure}}\n{graphic}\n\\caption{{{cap}}}\\label{{fig:{}-{}}}\n\\end{{figure}}\n",
                plot.label, plot.number
            ),
            None => format!("{graphic}\n"),
        }
    }

    fn chunk(&self, pieces: &[String], _options: &ChunkOptions) -> String {
        if pieces.is_empty() {
            return String::new();
        }
        format!(
            "\\begin{{{CHUNK_ENV}}}\n{}\\end{{{CHUNK_ENV}}}\n",
            pieces.concat()
        )
    }

    fn document(&self, text: &str) -> String {
        let begin_env = format!("\\begin{{{CHUNK_ENV}}}");
        let definition = format!("\\newenvironment{{{CHUNK_ENV}}}{{}}{{}}");
        if !text.contains(&begin_env) || text.contains(&definition) {
            return text.to_string();
        }
        match text.find("\\begin{document}") {
            Some(pos) => format!("{}{definition}\n{}", &text[..pos], &text[pos..]),
            None => text.to_string(),
        }
    }

    fn wraps_asis(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knitwork_shared::LineRange;

    #[test]
    fn split_noweb_chunks() {
        let doc = "\\section{Intro}\n<<setup, echo=FALSE>>=\nx = 1\n\n@\nValue \\Sexpr{x}.\n<<>>=\ny = 2\n<<next>>=\nz = 3\n@\n";
        let segments = split(doc);
        let chunks: Vec<_> = segments.iter().filter_map(Segment::as_code).collect();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].options, "setup, echo=FALSE");
        assert_eq!(chunks[0].code, "x = 1");
        assert_eq!(chunks[0].lines, LineRange::new(2, 5));
        assert_eq!(chunks[1].options, "");
        assert_eq!(chunks[1].code, "y = 2");
        assert_eq!(chunks[2].code, "z = 3");

        let Segment::Prose(prose) = &segments[2] else {
            panic!("expected prose after first chunk");
        };
        assert_eq!(prose.inline.len(), 1);
        assert_eq!(prose.inline[0].code, "x");
        assert!(prose.inline[0].engine.is_none());

        let rebuilt: String = segments.iter().map(Segment::raw).collect();
        assert_eq!(rebuilt, doc);
    }

    #[test]
    fn plot_hook_with_caption() {
        let info = PlotInfo {
            path: "figure/a-1.svg",
            index: 3,
            number: 1,
            label: "a",
            caption: Some("Growth"),
        };
        let out = LatexHooks.plot(&info, &ChunkOptions::default());
        assert!(out.starts_with("\\begin{figure}"));
        assert!(out.contains("\\includegraphics{figure/a-1.svg}"));
        assert!(out.contains("\\caption{Growth}\\label{fig:a-1}"));
    }

    #[test]
    fn document_hook_defines_environment_once() {
        let doc = "\\documentclass{article}\n\\begin{document}\n\\begin{knitout}\nx\n\\end{knitout}\n\\end{document}\n";
        let out = LatexHooks.document(doc);
        assert!(out.contains("\\newenvironment{knitout}{}{}\n\\begin{document}"));
        assert_eq!(LatexHooks.document(&out), out);

        let plain = "\\begin{document}\nNo chunks.\n\\end{document}\n";
        assert_eq!(LatexHooks.document(plain), plain);
    }
}
