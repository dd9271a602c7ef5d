//! The boundary between the pipeline and code execution.
//!
//! An [`Engine`] turns code text into ordered [`ResultItem`]s. While it runs,
//! it can reach back into the pipeline through [`EvalHost`]: knit a child
//! document, request early termination, surface metadata, or change the
//! chunk defaults for the rest of the run.

use std::path::PathBuf;

use knitwork_shared::{ChunkOptions, OptionLayer, Result, ResultItem};

/// One evaluation request.
#[derive(Debug, Clone, Copy)]
pub struct EvalRequest<'a> {
    pub code: &'a str,
    /// Engine name selected by the chunk (or inline expression).
    pub engine: &'a str,
    pub label: &'a str,
    /// Inline expressions only print their value; no source items are needed.
    pub inline: bool,
}

/// What a child document is made of.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildSource {
    /// Resolved against the directory of the calling document.
    Path(PathBuf),
    Text(String),
}

/// Pipeline services available to running code.
pub trait EvalHost {
    /// Knit a child document with the calling engine and return its output.
    fn knit_child(
        &mut self,
        engine: &mut dyn Engine,
        source: ChildSource,
        overrides: OptionLayer,
    ) -> Result<String>;

    /// Stop after the current segment; `closing` is appended to the document.
    fn exit(&mut self, closing: Option<String>);

    fn push_metadata(&mut self, value: serde_json::Value);

    /// Merge into the active chunk defaults for the rest of the run.
    fn set_chunk_defaults(&mut self, layer: OptionLayer);

    /// Options of the chunk being evaluated, if any.
    fn options(&self) -> Option<&ChunkOptions>;
}

/// An execution engine with a persistent evaluation context.
pub trait Engine {
    /// Engine names this evaluator accepts.
    fn languages(&self) -> &[&'static str];

    fn supports(&self, engine: &str) -> bool {
        self.languages().contains(&engine)
    }

    fn evaluate(
        &mut self,
        request: &EvalRequest<'_>,
        host: &mut dyn EvalHost,
    ) -> Result<Vec<ResultItem>>;

    /// Line comment marker of the language.
    fn comment_prefix(&self) -> &'static str {
        "#"
    }

    /// File extension for tangled scripts.
    fn script_extension(&self) -> &'static str {
        "txt"
    }

    /// Snapshot of the evaluation context.
    ///
    /// Cached chunks store the entries that changed while they ran.
    fn capture_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Merge a stored delta into the live context.
    fn restore_state(&mut self, _state: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}
