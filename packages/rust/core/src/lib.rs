//! Chunk processing pipeline for Knitwork.
//!
//! This crate turns a split document into woven output or a tangled script:
//! options are resolved per chunk, chunks are evaluated through an
//! [`Engine`], results are wrapped by output hooks, and child documents are
//! knitted recursively on the same [`PipelineState`](state) (e.g.
//! [`Knitter::knit`]).

pub mod cache;
mod child;
pub mod concordance;
mod driver;
pub mod engine;
pub mod options;
pub mod pipeline;
pub mod plot;
pub mod state;
mod tangle;
mod wrap;

#[cfg(test)]
mod testing;

pub use cache::{CacheEntry, ChunkCache, fingerprint};
pub use child::MAX_CHILD_DEPTH;
pub use concordance::{Concordance, ConcordanceEntry};
pub use engine::{ChildSource, Engine, EvalHost, EvalRequest};
pub use options::{ChunkDecl, LabelRegistry, ResolvedChunk, parse_options, parse_value};
pub use pipeline::{
    Input, KnitOutput, KnitRequest, Knitter, Mode, ProgressReporter, SilentProgress, Sink,
    WorkingDirGuard, output_path_for,
};
pub use plot::{FigureSpec, PlotWriter, SvgDevice, figure_specs, render_svg};
pub use state::{Flow, LogEntry, LogKind, RunLog};
