//! Process-wide pipeline state for one top-level invocation.
//!
//! A fresh [`PipelineState`] is built for every top-level run and shared by
//! reference with child documents. Dropping it discards every mutation made
//! during the run.

use std::path::PathBuf;

use serde::Serialize;

use knitwork_dialects::Dialect;
use knitwork_shared::{ChunkOptions, OptionLayer};

use crate::concordance::Concordance;
use crate::options::LabelRegistry;

/// Condition kinds recorded in the run log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Warning,
    Message,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub label: String,
    pub kind: LogKind,
    pub message: String,
}

/// Warnings, messages and errors raised by evaluated code, keyed by chunk label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn push(&mut self, label: &str, kind: LogKind, message: impl Into<String>) {
        self.entries.push(LogEntry {
            label: label.to_string(),
            kind,
            message: message.into(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn for_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.entries.iter().filter(move |e| e.label == label)
    }

    pub fn count(&self, kind: LogKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the segment loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop; the top level appends the closing text.
    Terminate(String),
}

/// A document being knitted; the top-level document is the first frame.
#[derive(Debug, Clone)]
pub(crate) struct DocumentFrame {
    pub name: String,
    /// Absolute directory that child paths are resolved against.
    pub dir: PathBuf,
    pub dialect: Dialect,
    pub front_matter: bool,
}

/// The chunk currently being evaluated.
#[derive(Debug, Clone)]
pub(crate) struct ChunkContext {
    /// Options written on the chunk itself.
    pub explicit: OptionLayer,
    pub options: ChunkOptions,
}

#[derive(Debug, Default)]
pub(crate) struct PipelineState {
    pub fig_counter: usize,
    pub chunk_counter: usize,
    /// Code chunks declared so far across the tree, for progress reporting.
    pub chunk_total: usize,
    pub labels: LabelRegistry,
    pub log: RunLog,
    pub metadata: Vec<serde_json::Value>,
    pub concordance: Concordance,
    /// Active chunk defaults (config `[chunk]` plus changes made from code).
    pub defaults: OptionLayer,
    /// Set once termination is requested; holds the closing text.
    pub exit: Option<String>,
    /// Top-level segment outputs so far.
    pub outputs: Vec<String>,
    /// Relative paths of every figure file written.
    pub figures: Vec<String>,
    pub frames: Vec<DocumentFrame>,
    pub current: Option<ChunkContext>,
}

impl PipelineState {
    pub fn new(defaults: OptionLayer, top: DocumentFrame) -> Self {
        Self {
            concordance: Concordance::new(top.name.clone()),
            defaults,
            frames: vec![top],
            ..Self::default()
        }
    }

    pub fn flow(&self) -> Flow {
        match &self.exit {
            Some(closing) => Flow::Terminate(closing.clone()),
            None => Flow::Continue,
        }
    }

    /// Nesting depth; the top-level document is depth 0.
    pub fn depth(&self) -> usize {
        self.frames.len().saturating_sub(1)
    }

    pub fn frame(&self) -> Option<&DocumentFrame> {
        self.frames.last()
    }

    pub fn document_name(&self) -> String {
        self.frame().map(|f| f.name.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_filters_by_label_and_kind() {
        let mut log = RunLog::default();
        log.push("a", LogKind::Warning, "Warning: careful");
        log.push("b", LogKind::Message, "hello");
        log.push("a", LogKind::Error, "Error: boom");

        assert_eq!(log.for_label("a").count(), 2);
        assert_eq!(log.count(LogKind::Message), 1);
        assert!(!log.is_empty());
    }

    #[test]
    fn flow_reflects_exit_request() {
        let mut state = PipelineState::default();
        assert_eq!(state.flow(), Flow::Continue);
        state.exit = Some("bye\n".into());
        assert_eq!(state.flow(), Flow::Terminate("bye\n".into()));
        assert_eq!(state.depth(), 0);
    }
}
