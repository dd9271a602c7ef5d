//! Output hooks: the markup boundary between the pipeline and a format.
//!
//! The pipeline never writes markup itself. Every piece of chunk output is
//! passed through one of these hook points.

use knitwork_shared::ChunkOptions;

/// Figure details handed to the `plot` hook.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotInfo<'a> {
    /// Path of the first file written for this figure.
    pub path: &'a str,
    /// Document-wide figure index (1-based, never reused).
    pub index: usize,
    /// Position of the figure within its chunk (1-based).
    pub number: usize,
    pub label: &'a str,
    pub caption: Option<&'a str>,
}

/// Formatting functions for each hook point.
pub trait Hooks {
    /// Echoed source code.
    fn source(&self, code: &str, options: &ChunkOptions) -> String;

    /// Printed output (already comment-prefixed unless `results` is `asis`).
    fn output(&self, text: &str, options: &ChunkOptions) -> String;

    fn warning(&self, text: &str, options: &ChunkOptions) -> String {
        self.output(text, options)
    }

    fn message(&self, text: &str, options: &ChunkOptions) -> String {
        self.output(text, options)
    }

    fn error(&self, text: &str, options: &ChunkOptions) -> String {
        self.output(text, options)
    }

    fn plot(&self, plot: &PlotInfo<'_>, options: &ChunkOptions) -> String;

    /// Value of an inline expression.
    fn inline(&self, value: &str) -> String {
        value.to_string()
    }

    /// Assemble the non-empty pieces of one chunk.
    fn chunk(&self, pieces: &[String], _options: &ChunkOptions) -> String {
        pieces.concat()
    }

    /// Final whole-document transform.
    fn document(&self, text: &str) -> String {
        text.to_string()
    }

    /// Whether as-is text must still go through the `output` hook.
    fn wraps_asis(&self) -> bool {
        false
    }
}

/// Append a newline unless `text` is empty or already ends with one.
pub fn ensure_newline(text: &str) -> String {
    if text.is_empty() || text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{text}\n")
    }
}
