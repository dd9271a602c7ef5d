//! Shared types, error model, and configuration for Knitwork.
//!
//! This crate is the foundation depended on by all other Knitwork crates.
//! It provides:
//! - [`KnitError`]: the unified error type
//! - Domain types ([`Segment`], [`ResultItem`], [`LineRange`])
//! - Chunk options ([`ChunkOptions`], [`OptionValue`], [`OptionLayer`])
//! - Configuration ([`AppConfig`], [`KnitConfig`], config loading)

pub mod chunk;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use chunk::{
    ChunkOptions, EvalSelection, FigShow, KNOWN_OPTIONS, OptionLayer, OptionValue, ResultsMode,
    canonical_name,
};
pub use config::{
    AppConfig, KnitConfig, KnitSection, TangleSection, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{KnitError, Result};
pub use types::{
    CodeSegment, InlineCode, LineRange, ProseSegment, RecordedPlot, ResultItem, Segment,
};
