//! Document Pipeline: input → segments → woven document or tangled script.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};

use knitwork_dialects::{Dialect, Hooks};
use knitwork_shared::{
    InlineCode, KnitConfig, KnitError, LineRange, OptionLayer, ProseSegment, Result, ResultItem,
    Segment,
};

use crate::cache::ChunkCache;
use crate::concordance::Concordance;
use crate::engine::{Engine, EvalRequest};
use crate::options::{ChunkDecl, base_options};
use crate::plot::PlotWriter;
use crate::state::{ChunkContext, DocumentFrame, Flow, LogKind, PipelineState, RunLog};
use crate::wrap::error_text;

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Where the document comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Path(PathBuf),
    /// Literal text; `name` is used in diagnostics.
    Text { text: String, name: String },
}

impl Input {
    pub fn name(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::Text { name, .. } => name.clone(),
        }
    }
}

/// Where the result goes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Sink {
    #[default]
    Return,
    File(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Weave,
    /// Extract code only; `documentation` is 0, 1 or 2.
    Tangle { documentation: u8 },
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Weave => "weave",
            Self::Tangle { .. } => "tangle",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnitRequest {
    pub input: Input,
    pub output: Sink,
    pub mode: Mode,
    /// Overrides detection when set.
    pub dialect: Option<Dialect>,
}

impl KnitRequest {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            input: Input::Path(path.into()),
            output: Sink::Return,
            mode: Mode::Weave,
            dialect: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            input: Input::Text {
                text: text.into(),
                name: "<text>".into(),
            },
            output: Sink::Return,
            mode: Mode::Weave,
            dialect: None,
        }
    }

    pub fn to_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Sink::File(path.into());
        self
    }

    pub fn tangle(mut self, documentation: u8) -> Self {
        self.mode = Mode::Tangle { documentation };
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }
}

/// Result of one top-level run.
#[derive(Debug, Clone, Default)]
pub struct KnitOutput {
    pub text: String,
    /// Set when the result was written to a file sink.
    pub path: Option<PathBuf>,
    pub log: RunLog,
    pub concordance: Concordance,
    /// Relative paths of figure files written.
    pub figures: Vec<String>,
    /// Code chunks processed, children included.
    pub chunks: usize,
    pub elapsed: Duration,
}

/// Derived output path for an input file.
///
/// Falls back to `<stem>.knit.<ext>` when the derived path is the input itself.
pub fn output_path_for(input: &Path, mode: Mode, dialect: Dialect, script_ext: &str) -> PathBuf {
    let ext = match mode {
        Mode::Weave => dialect.output_extension(),
        Mode::Tangle { .. } => script_ext,
    };
    let candidate = input.with_extension(ext);
    if candidate == input {
        input.with_extension(format!("knit.{ext}"))
    } else {
        candidate
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before each code chunk is driven.
    fn chunk(&self, label: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, output: &KnitOutput);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn chunk(&self, _label: &str, _current: usize, _total: usize) {}
    fn done(&self, _output: &KnitOutput) {}
}

// ---------------------------------------------------------------------------
// Working directory
// ---------------------------------------------------------------------------

/// Changes the working directory and restores the previous one on drop.
pub struct WorkingDirGuard {
    previous: PathBuf,
}

impl WorkingDirGuard {
    pub fn enter(dir: &Path) -> Result<Self> {
        let previous = std::env::current_dir().map_err(|e| KnitError::io(".", e))?;
        std::env::set_current_dir(dir).map_err(|e| KnitError::io(dir, e))?;
        debug!(dir = %dir.display(), "changed working directory");
        Ok(Self { previous })
    }
}

impl Drop for WorkingDirGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.previous) {
            warn!(dir = %self.previous.display(), error = %e, "could not restore working directory");
        }
    }
}

// ---------------------------------------------------------------------------
// Knitter
// ---------------------------------------------------------------------------

/// Long-lived entry point; owns the configuration and the chunk cache.
pub struct Knitter {
    config: KnitConfig,
    cache: ChunkCache,
    metadata: Vec<serde_json::Value>,
}

impl Knitter {
    pub fn new(config: KnitConfig) -> Self {
        let cache = match &config.cache_dir {
            Some(dir) => ChunkCache::persistent(dir),
            None => ChunkCache::in_memory(),
        };
        Self {
            config,
            cache,
            metadata: Vec::new(),
        }
    }

    pub fn config(&self) -> &KnitConfig {
        &self.config
    }

    pub fn cache(&self) -> &ChunkCache {
        &self.cache
    }

    /// Metadata pushed during the last run; cleared on retrieval.
    pub fn take_metadata(&mut self) -> Vec<serde_json::Value> {
        std::mem::take(&mut self.metadata)
    }

    /// Run one top-level weave or tangle.
    ///
    /// On an evaluation failure the output produced so far is written to a
    /// file sink and carried in [`KnitError::Evaluation`].
    #[instrument(skip_all, fields(input = %request.input.name(), mode = request.mode.name()))]
    pub fn knit(
        &mut self,
        engine: &mut dyn Engine,
        plots: &mut dyn PlotWriter,
        request: &KnitRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<KnitOutput> {
        let start = Instant::now();
        self.metadata.clear();

        progress.phase("Reading input");
        let (text, path) = match &request.input {
            Input::Path(path) => (
                std::fs::read_to_string(path).map_err(|e| KnitError::io(path, e))?,
                Some(path.as_path()),
            ),
            Input::Text { text, .. } => (text.clone(), None),
        };
        let dialect = match request.dialect {
            Some(dialect) => dialect,
            None => Dialect::detect(path, &text)?,
        };
        info!(dialect = %dialect, bytes = text.len(), "starting knit");

        if text.is_empty() {
            let output = KnitOutput {
                path: write_sink(&request.output, "")?,
                elapsed: start.elapsed(),
                ..KnitOutput::default()
            };
            progress.done(&output);
            return Ok(output);
        }

        let dir = match path.and_then(Path::parent) {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let dir = std::path::absolute(&dir).map_err(|e| KnitError::io(&dir, e))?;
        let frame = DocumentFrame {
            name: request.input.name(),
            dir: dir.clone(),
            dialect,
            front_matter: dialect.has_front_matter(&text),
        };
        let _cwd = if self.config.change_dir {
            Some(WorkingDirGuard::enter(&dir)?)
        } else {
            None
        };

        let mut session = Knit {
            config: &self.config,
            hooks: dialect.hooks(),
            plots,
            cache: &mut self.cache,
            progress,
            state: PipelineState::new(self.config.chunk_defaults.clone(), frame),
        };

        progress.phase("Splitting document");
        let segments = dialect.split(&text, engine.languages());
        debug!(segments = segments.len(), "document split");

        progress.phase(match request.mode {
            Mode::Weave => "Weaving",
            Mode::Tangle { .. } => "Tangling",
        });
        let result = match request.mode {
            Mode::Weave => session.weave(engine, &segments),
            Mode::Tangle { documentation } => session.tangle(engine, &segments, documentation),
        };

        let body = match result {
            Ok(body) => body,
            Err(KnitError::Evaluation {
                document,
                label,
                lines,
                message,
                ..
            }) => {
                let partial = session.state.outputs.concat();
                self.metadata = std::mem::take(&mut session.state.metadata);
                write_sink(&request.output, &partial)?;
                error!(%document, %label, %lines, "evaluation failed; partial output flushed");
                return Err(KnitError::Evaluation {
                    document,
                    label,
                    lines,
                    message,
                    partial_output: partial,
                });
            }
            Err(e) => return Err(e),
        };

        let state = session.state;
        self.metadata = state.metadata;
        let output = KnitOutput {
            path: write_sink(&request.output, &body)?,
            text: body,
            log: state.log,
            concordance: state.concordance,
            figures: state.figures,
            chunks: state.chunk_counter,
            elapsed: start.elapsed(),
        };

        progress.done(&output);
        info!(
            chunks = output.chunks,
            figures = output.figures.len(),
            warnings = output.log.count(LogKind::Warning),
            cache_hits = self.cache.hits(),
            elapsed_ms = output.elapsed.as_millis(),
            "knit complete"
        );
        Ok(output)
    }
}

fn write_sink(sink: &Sink, text: &str) -> Result<Option<PathBuf>> {
    match sink {
        Sink::Return => Ok(None),
        Sink::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| KnitError::io(parent, e))?;
            }
            std::fs::write(path, text).map_err(|e| KnitError::io(path, e))?;
            Ok(Some(path.clone()))
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One top-level invocation: collaborators plus the shared pipeline state.
///
/// Child documents run on the same session.
pub(crate) struct Knit<'a> {
    pub config: &'a KnitConfig,
    pub hooks: &'a dyn Hooks,
    pub plots: &'a mut dyn PlotWriter,
    pub cache: &'a mut ChunkCache,
    pub progress: &'a dyn ProgressReporter,
    pub state: PipelineState,
}

impl Knit<'_> {
    /// Weave the top-level document: segments, closing text, document hook.
    pub(crate) fn weave(&mut self, engine: &mut dyn Engine, segments: &[Segment]) -> Result<String> {
        self.run_document(engine, segments, false)?;
        let closing = match self.state.flow() {
            Flow::Terminate(closing) => closing,
            Flow::Continue => String::new(),
        };
        let mut body = self.state.outputs.concat();
        body.push_str(&closing);
        Ok(self.hooks.document(&body))
    }

    /// Declare every chunk of a document before anything is evaluated.
    pub(crate) fn declare_all(&mut self, segments: &[Segment]) -> Result<Vec<Option<ChunkDecl>>> {
        segments
            .iter()
            .map(|segment| match segment {
                Segment::Code(chunk) => {
                    self.state.chunk_total += 1;
                    self.state.labels.declare(chunk).map(Some)
                }
                Segment::Prose(_) => Ok(None),
            })
            .collect()
    }

    /// Weave segments in order until done or termination is requested.
    ///
    /// Top-level output is accumulated in the state; nested output is returned.
    #[instrument(skip_all, fields(depth = self.state.depth(), segments = segments.len()))]
    pub(crate) fn run_document(
        &mut self,
        engine: &mut dyn Engine,
        segments: &[Segment],
        is_nested: bool,
    ) -> Result<String> {
        let decls = self.declare_all(segments)?;
        let mut nested = String::new();

        for (segment, decl) in segments.iter().zip(decls) {
            if let Flow::Terminate(_) = self.state.flow() {
                debug!(line = segment.lines().start, "termination requested; skipping the rest");
                break;
            }
            let piece = match (segment, &decl) {
                (Segment::Code(chunk), Some(decl)) => self.drive_chunk(engine, chunk, decl)?,
                (Segment::Prose(prose), _) => self.weave_prose(engine, prose)?,
                (Segment::Code(_), None) => String::new(),
            };
            if is_nested {
                nested.push_str(&piece);
            } else {
                self.state.concordance.record(segment.lines(), &piece);
                self.state.outputs.push(piece);
            }
        }

        Ok(nested)
    }

    /// Prose with inline expressions replaced by their values.
    fn weave_prose(&mut self, engine: &mut dyn Engine, prose: &ProseSegment) -> Result<String> {
        if prose.inline.is_empty() {
            return Ok(prose.text.clone());
        }
        let mut out = String::with_capacity(prose.text.len());
        let mut cursor = 0;
        for inline in &prose.inline {
            out.push_str(&prose.text[cursor..inline.span.start]);
            let line = prose.lines.start + prose.text[..inline.span.start].matches('\n').count();
            match self.eval_inline(engine, inline, line)? {
                Some(value) => out.push_str(&value),
                None => out.push_str(&prose.text[inline.span.clone()]),
            }
            cursor = inline.span.end;
        }
        out.push_str(&prose.text[cursor..]);
        Ok(out)
    }

    /// Evaluate one inline expression; `None` leaves the source text in place.
    fn eval_inline(
        &mut self,
        engine: &mut dyn Engine,
        inline: &InlineCode,
        line: usize,
    ) -> Result<Option<String>> {
        let label = format!("inline-{line}");
        let lines = LineRange::new(line, line);
        let mut options = base_options(&self.state.defaults, self.config)
            .map_err(|msg| KnitError::malformed(&label, lines, msg))?;
        options.label = label.clone();

        let engine_name = inline.engine.clone().unwrap_or_else(|| options.engine.clone());
        if options.eval.is_nothing() || !engine.supports(&engine_name) {
            debug!(%label, engine = %engine_name, "inline expression not evaluated");
            return Ok(None);
        }

        let allow_error = options.error;
        let previous = self.state.current.replace(ChunkContext {
            explicit: OptionLayer::new(),
            options,
        });
        let request = EvalRequest {
            code: &inline.code,
            engine: &engine_name,
            label: &label,
            inline: true,
        };
        let result = engine.evaluate(&request, self);
        self.state.current = previous;

        let mut value = String::new();
        for item in result? {
            match item {
                ResultItem::Text { text, metadata, .. } => {
                    value.push_str(&text);
                    self.state.metadata.extend(metadata);
                }
                ResultItem::Warning { call, message } => {
                    let text = match call {
                        Some(call) => format!("Warning in {call}: {message}"),
                        None => format!("Warning: {message}"),
                    };
                    warn!(%label, "{text}");
                    self.state.log.push(&label, LogKind::Warning, text);
                }
                ResultItem::Message { message } => {
                    self.state.log.push(&label, LogKind::Message, message);
                }
                ResultItem::Error { call, message } => {
                    let text = error_text(call.as_deref(), &message);
                    self.state.log.push(&label, LogKind::Error, &text);
                    if !allow_error {
                        return Err(KnitError::Evaluation {
                            document: self.state.document_name(),
                            label,
                            lines,
                            message: text,
                            partial_output: String::new(),
                        });
                    }
                    value.push_str(&text);
                }
                other => debug!(%label, kind = other.kind(), "inline result dropped"),
            }
        }
        Ok(Some(self.hooks.inline(value.trim())))
    }
}
