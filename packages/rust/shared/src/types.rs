//! Core domain types: document segments and evaluation results.

use std::ops::Range;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LineRange
// ---------------------------------------------------------------------------

/// Inclusive, 1-based range of source lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of lines covered (an empty segment still covers its start line).
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.start == 0 && self.end == 0
    }
}

impl std::fmt::Display for LineRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// One unit of a split document.
///
/// Segments partition the source text exactly: concatenating every
/// segment's `raw` text reproduces the input.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Prose(ProseSegment),
    Code(CodeSegment),
}

impl Segment {
    pub fn lines(&self) -> LineRange {
        match self {
            Self::Prose(p) => p.lines,
            Self::Code(c) => c.lines,
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Prose(p) => &p.text,
            Self::Code(c) => &c.raw,
        }
    }

    pub fn as_code(&self) -> Option<&CodeSegment> {
        match self {
            Self::Code(c) => Some(c),
            Self::Prose(_) => None,
        }
    }
}

/// Prose between chunks, with any inline code expressions it contains.
#[derive(Debug, Clone, PartialEq)]
pub struct ProseSegment {
    pub text: String,
    /// Inline expressions in source order; spans index into `text`.
    pub inline: Vec<InlineCode>,
    pub lines: LineRange,
}

/// An inline expression such as `` `calc x` `` or `\Sexpr{x}`.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineCode {
    /// Engine name; `None` means the configured default engine.
    pub engine: Option<String>,
    pub code: String,
    /// Byte span of the whole inline token within the prose text.
    pub span: Range<usize>,
}

/// A delimited code chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeSegment {
    /// Full chunk text including delimiters.
    pub raw: String,
    /// Engine named by the chunk header, if the dialect carries one.
    pub engine: Option<String>,
    /// Raw option string from the chunk header (label shorthand included).
    pub options: String,
    /// Chunk body without delimiters; no trailing newline.
    pub code: String,
    pub lines: LineRange,
}

// ---------------------------------------------------------------------------
// Evaluation results
// ---------------------------------------------------------------------------

/// One item produced by an execution engine, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultItem {
    /// Source code echoed for one evaluated expression.
    Source { code: String },

    /// Printed output or a visible value.
    Text {
        text: String,
        /// Already final markup; must not be comment-prefixed.
        #[serde(default)]
        asis: bool,
        #[serde(default = "default_true")]
        cacheable: bool,
        /// Side-channel values surfaced by custom result handlers.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        metadata: Vec<serde_json::Value>,
    },

    Warning {
        #[serde(default)]
        call: Option<String>,
        message: String,
    },

    Message { message: String },

    Error {
        #[serde(default)]
        call: Option<String>,
        message: String,
    },

    Plot(RecordedPlot),

    /// A result kind this pipeline has no rendering for.
    Other {
        name: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

fn default_true() -> bool {
    true
}

impl ResultItem {
    /// Plain printed text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            asis: false,
            cacheable: true,
            metadata: Vec::new(),
        }
    }

    /// Text that is already final markup.
    pub fn asis(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            asis: true,
            cacheable: true,
            metadata: Vec::new(),
        }
    }

    pub fn source(code: impl Into<String>) -> Self {
        Self::Source { code: code.into() }
    }

    pub fn is_cacheable(&self) -> bool {
        match self {
            Self::Text { cacheable, .. } => *cacheable,
            _ => true,
        }
    }

    /// Short name of the variant, used in logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Source { .. } => "source",
            Self::Text { .. } => "text",
            Self::Warning { .. } => "warning",
            Self::Message { .. } => "message",
            Self::Error { .. } => "error",
            Self::Plot(_) => "plot",
            Self::Other { name, .. } => name.as_str(),
        }
    }
}

/// A plot recorded by the engine, replayed by a graphics device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordedPlot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Data points in drawing order.
    pub points: Vec<(f64, f64)>,
}
