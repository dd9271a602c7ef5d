//! Chunk Driver: resolve, evaluate or reuse the cache, wrap, assemble.

use chrono::Utc;
use tracing::{debug, instrument, warn};

use knitwork_dialects::ensure_newline;
use knitwork_shared::{
    ChunkOptions, CodeSegment, EvalSelection, FigShow, KnitError, Result, ResultItem, ResultsMode,
};

use crate::cache::{CacheEntry, fingerprint, state_delta};
use crate::engine::{ChildSource, Engine, EvalRequest};
use crate::options::ChunkDecl;
use crate::pipeline::Knit;
use crate::state::{ChunkContext, LogKind};
use crate::wrap::error_text;

impl Knit<'_> {
    /// Produce the output text of one code chunk.
    #[instrument(skip_all, fields(label = %decl.label, lines = %chunk.lines))]
    pub(crate) fn drive_chunk(
        &mut self,
        engine: &mut dyn Engine,
        chunk: &CodeSegment,
        decl: &ChunkDecl,
    ) -> Result<String> {
        let resolved = self
            .state
            .labels
            .resolve(decl, &self.state.defaults, self.config)?;
        let options = resolved.options;

        self.state.chunk_counter += 1;
        self.progress
            .chunk(&options.label, self.state.chunk_counter, self.state.chunk_total);

        let previous = self.state.current.replace(ChunkContext {
            explicit: decl.literal.clone(),
            options: options.clone(),
        });
        let result = self.drive_resolved(engine, chunk, &resolved.code, &options);
        self.state.current = previous;
        result
    }

    fn drive_resolved(
        &mut self,
        engine: &mut dyn Engine,
        chunk: &CodeSegment,
        code: &str,
        options: &ChunkOptions,
    ) -> Result<String> {
        if !options.child.is_empty() {
            let mut out = String::new();
            for child in &options.child {
                let text = self.knit_child_document(
                    engine,
                    ChildSource::Path(child.into()),
                    Default::default(),
                )?;
                out.push_str(&text);
            }
            return Ok(if options.include {
                ensure_newline(&out)
            } else {
                String::new()
            });
        }

        let supported = engine.supports(&options.engine);
        if !supported {
            warn!(label = %options.label, engine = %options.engine, "no evaluator for engine; chunk not evaluated");
        }

        let items = if options.eval.is_nothing() || !supported {
            debug!(label = %options.label, "chunk not evaluated");
            Vec::new()
        } else {
            self.evaluate_chunk(engine, chunk, code, options)?
        };

        self.assemble(code, items, options)
    }

    /// Evaluate (or restore from cache) and check for fatal errors.
    fn evaluate_chunk(
        &mut self,
        engine: &mut dyn Engine,
        chunk: &CodeSegment,
        code: &str,
        options: &ChunkOptions,
    ) -> Result<Vec<ResultItem>> {
        let fp = options
            .cache
            .then(|| fingerprint(&options.engine, code, options));

        if let Some(fp) = &fp {
            if let Some(entry) = self.cache.lookup(&options.label, fp, &options.cache_path)? {
                debug!(label = %options.label, "cache hit");
                if let Some(state) = &entry.state {
                    engine.restore_state(state)?;
                }
                return Ok(entry.items);
            }
            debug!(label = %options.label, "cache miss");
        }
        let before = if fp.is_some() {
            engine.capture_state()
        } else {
            None
        };

        let sent = select_lines(code, &options.eval, engine.comment_prefix());
        let request = EvalRequest {
            code: &sent,
            engine: &options.engine,
            label: &options.label,
            inline: false,
        };
        let items = engine.evaluate(&request, self)?;

        if !options.error {
            let failure = items.iter().find_map(|item| match item {
                ResultItem::Error { call, message } => Some(error_text(call.as_deref(), message)),
                _ => None,
            });
            if let Some(message) = failure {
                self.state.log.push(&options.label, LogKind::Error, &message);
                return Err(KnitError::Evaluation {
                    document: self.state.document_name(),
                    label: options.label.clone(),
                    lines: chunk.lines,
                    message,
                    partial_output: String::new(),
                });
            }
        }

        if let Some(fp) = fp {
            if items.iter().any(|item| !item.is_cacheable()) {
                return Err(KnitError::NotCacheable {
                    label: options.label.clone(),
                });
            }
            let entry = CacheEntry {
                label: options.label.clone(),
                fingerprint: fp,
                items: items.clone(),
                state: engine
                    .capture_state()
                    .map(|after| state_delta(before.as_ref(), after)),
                created_at: Utc::now(),
            };
            self.cache.store(entry, &options.cache_path)?;
        }

        Ok(items)
    }

    /// Wrap every item and hand the pieces to the `chunk` hook.
    fn assemble(
        &mut self,
        code: &str,
        mut items: Vec<ResultItem>,
        options: &ChunkOptions,
    ) -> Result<String> {
        let has_source = items
            .iter()
            .any(|item| matches!(item, ResultItem::Source { .. }));
        if options.echo && !has_source {
            items.insert(0, ResultItem::source(code));
        }

        let mut pieces = Vec::new();
        let mut held_text = Vec::new();
        let mut held_plots = Vec::new();
        let mut plot_number = 0;

        for item in &items {
            if !options.echo && matches!(item, ResultItem::Source { .. }) {
                continue;
            }
            let piece = self.wrap(item, options, &mut plot_number)?;
            if piece.is_empty() {
                continue;
            }
            match item {
                ResultItem::Text { .. } if options.results == ResultsMode::Hold => {
                    held_text.push(piece)
                }
                ResultItem::Plot(_) if options.fig_show == FigShow::Hold => held_plots.push(piece),
                _ => pieces.push(piece),
            }
        }
        pieces.extend(held_text);
        pieces.extend(held_plots);

        if !options.include {
            debug!(label = %options.label, "chunk output excluded");
            return Ok(String::new());
        }
        if pieces.is_empty() {
            return Ok(String::new());
        }
        Ok(ensure_newline(&self.hooks.chunk(&pieces, options)))
    }
}

/// Comment out lines not selected by a partial `eval`.
fn select_lines(code: &str, eval: &EvalSelection, prefix: &str) -> String {
    match eval {
        EvalSelection::All | EvalSelection::Nothing => code.to_string(),
        EvalSelection::Lines(_) => code
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if eval.includes(i + 1) {
                    line.to_string()
                } else {
                    format!("{prefix}{prefix} {line}")
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
