//! Test doubles: a scripted engine and a recording graphics device.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use knitwork_dialects::{Dialect, Hooks};
use knitwork_shared::{KnitConfig, RecordedPlot, Result, ResultItem};

use crate::cache::ChunkCache;
use crate::engine::{ChildSource, Engine, EvalHost, EvalRequest};
use crate::options::parse_options;
use crate::pipeline::{Knit, KnitOutput, KnitRequest, Knitter, SilentProgress};
use crate::plot::{FigureSpec, PlotWriter};
use crate::state::{DocumentFrame, PipelineState};

/// Engine answering from a table of canned responses.
///
/// Unknown code prints `<code>`. A few directives exercise the host:
/// `@exit`, `@child <text with \n escapes>`, `@defaults <options>`, `@meta`.
#[derive(Default)]
pub(crate) struct ScriptedEngine {
    responses: HashMap<String, Vec<ResultItem>>,
    inline: HashMap<String, String>,
    pub calls: usize,
    pub restored: usize,
    pub seen: Vec<String>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&mut self, code: &str, items: Vec<ResultItem>) {
        self.responses.insert(code.to_string(), items);
    }

    pub fn respond_inline(&mut self, code: &str, value: &str) {
        self.inline.insert(code.to_string(), value.to_string());
    }
}

impl Engine for ScriptedEngine {
    fn languages(&self) -> &[&'static str] {
        &["calc"]
    }

    fn evaluate(
        &mut self,
        request: &EvalRequest<'_>,
        host: &mut dyn EvalHost,
    ) -> Result<Vec<ResultItem>> {
        self.calls += 1;
        self.seen.push(request.code.to_string());
        let code = request.code;

        if code == "@exit" {
            host.exit(Some("THE END\n".into()));
            return Ok(Vec::new());
        }
        if code == "@meta" {
            host.push_metadata(serde_json::json!({ "from": "meta" }));
            return Ok(Vec::new());
        }
        if let Some(text) = code.strip_prefix("@child ") {
            let text = text.replace("\\n", "\n");
            let out = host.knit_child(self, ChildSource::Text(text), Default::default())?;
            return Ok(vec![ResultItem::asis(out)]);
        }
        if let Some(raw) = code.strip_prefix("@defaults ") {
            let layer = parse_options(raw).map_err(knitwork_shared::KnitError::Engine)?;
            host.set_chunk_defaults(layer);
            return Ok(Vec::new());
        }

        if request.inline {
            if let Some(value) = self.inline.get(code) {
                return Ok(vec![ResultItem::text(value.clone())]);
            }
        }
        match self.responses.get(code) {
            Some(items) => Ok(items.clone()),
            None => Ok(vec![ResultItem::text(format!("<{code}>"))]),
        }
    }

    fn capture_state(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({ "calls": self.calls }))
    }

    fn restore_state(&mut self, _state: &serde_json::Value) -> Result<()> {
        self.restored += 1;
        Ok(())
    }
}

/// Plot device that records what it was asked to write.
#[derive(Default)]
pub(crate) struct RecordingDevice {
    pub written: Vec<(String, FigureSpec)>,
}

impl PlotWriter for RecordingDevice {
    fn write(&mut self, _plot: &RecordedPlot, spec: &FigureSpec, stem: &str) -> Result<String> {
        self.written.push((stem.to_string(), spec.clone()));
        Ok(format!("{stem}.{}", spec.ext))
    }
}

/// Owns the collaborators a bare [`Knit`] session borrows.
pub(crate) struct Harness {
    pub config: KnitConfig,
    pub cache: ChunkCache,
    pub device: RecordingDevice,
    dir: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            config: KnitConfig::default(),
            cache: ChunkCache::in_memory(),
            device: RecordingDevice::default(),
            dir: std::env::temp_dir(),
        }
    }

    pub fn session<'a>(&'a mut self, hooks: &'a dyn Hooks) -> Knit<'a> {
        let frame = DocumentFrame {
            name: "test.md".into(),
            dir: self.dir.clone(),
            dialect: Dialect::Markdown,
            front_matter: false,
        };
        Knit {
            config: &self.config,
            hooks,
            plots: &mut self.device,
            cache: &mut self.cache,
            progress: &SilentProgress,
            state: PipelineState::new(self.config.chunk_defaults.clone(), frame),
        }
    }
}

pub(crate) fn knit_with(
    knitter: &mut Knitter,
    engine: &mut ScriptedEngine,
    text: &str,
) -> Result<KnitOutput> {
    knitter.knit(
        engine,
        &mut RecordingDevice::default(),
        &KnitRequest::text(text),
        &SilentProgress,
    )
}

pub(crate) fn knit_text(engine: &mut ScriptedEngine, text: &str) -> Result<KnitOutput> {
    knit_with(&mut Knitter::new(KnitConfig::default()), engine, text)
}

pub(crate) fn knit_path(engine: &mut ScriptedEngine, path: &Path) -> Result<KnitOutput> {
    Knitter::new(KnitConfig::default()).knit(
        engine,
        &mut RecordingDevice::default(),
        &KnitRequest::path(path),
        &SilentProgress,
    )
}

pub(crate) fn tangle_text(
    engine: &mut ScriptedEngine,
    text: &str,
    documentation: u8,
) -> Result<KnitOutput> {
    Knitter::new(KnitConfig::default()).knit(
        engine,
        &mut RecordingDevice::default(),
        &KnitRequest::text(text).tangle(documentation),
        &SilentProgress,
    )
}

pub(crate) fn tangle_path(
    engine: &mut ScriptedEngine,
    path: &Path,
    documentation: u8,
) -> Result<KnitOutput> {
    Knitter::new(KnitConfig::default()).knit(
        engine,
        &mut RecordingDevice::default(),
        &KnitRequest::path(path).tangle(documentation),
        &SilentProgress,
    )
}
