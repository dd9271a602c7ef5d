//! Result Wrapper: one evaluation result item → output markup.

use tracing::{debug, warn};

use knitwork_dialects::PlotInfo;
use knitwork_shared::{ChunkOptions, FigShow, RecordedPlot, Result, ResultItem, ResultsMode};

use crate::pipeline::Knit;
use crate::plot::figure_specs;
use crate::state::LogKind;

impl Knit<'_> {
    /// Render one item. `plot_number` counts plots within the current chunk.
    pub(crate) fn wrap(
        &mut self,
        item: &ResultItem,
        options: &ChunkOptions,
        plot_number: &mut usize,
    ) -> Result<String> {
        match item {
            ResultItem::Source { code } => Ok(self.wrap_source(code, options)),
            ResultItem::Text {
                text,
                asis,
                metadata,
                ..
            } => {
                self.state.metadata.extend(metadata.iter().cloned());
                Ok(self.wrap_text(text, *asis, options))
            }
            ResultItem::Warning { call, message } => {
                let text = match call {
                    Some(call) => format!("Warning in {call}: {message}"),
                    None => format!("Warning: {message}"),
                };
                warn!(label = %options.label, "{text}");
                self.state.log.push(&options.label, LogKind::Warning, &text);
                if !options.warning {
                    return Ok(String::new());
                }
                Ok(self.hooks.warning(&comment_lines(&text, options), options))
            }
            ResultItem::Message { message } => {
                self.state.log.push(&options.label, LogKind::Message, message);
                if !options.message {
                    return Ok(String::new());
                }
                Ok(self.hooks.message(&comment_lines(message, options), options))
            }
            ResultItem::Error { call, message } => {
                let text = error_text(call.as_deref(), message);
                self.state.log.push(&options.label, LogKind::Error, &text);
                Ok(self.hooks.error(&comment_lines(&text, options), options))
            }
            ResultItem::Plot(plot) => self.wrap_plot(plot, options, plot_number),
            ResultItem::Other { name, .. } => {
                debug!(label = %options.label, kind = %name, "dropping result with no renderer");
                Ok(String::new())
            }
        }
    }

    fn wrap_source(&self, code: &str, options: &ChunkOptions) -> String {
        let code = code.strip_suffix('\n').unwrap_or(code);
        let code = if options.strip_white && !options.collapse {
            strip_white(code)
        } else {
            code.to_string()
        };
        if code.is_empty() {
            return String::new();
        }
        self.hooks.source(&code, options)
    }

    fn wrap_text(&self, text: &str, asis: bool, options: &ChunkOptions) -> String {
        if options.results == ResultsMode::Hide || text.is_empty() {
            return String::new();
        }
        if asis || options.results == ResultsMode::Asis {
            if !self.hooks.wraps_asis() {
                return text.to_string();
            }
            let forced = ChunkOptions {
                results: ResultsMode::Asis,
                ..options.clone()
            };
            return self.hooks.output(text, &forced);
        }
        let text = text.strip_suffix('\n').unwrap_or(text);
        self.hooks.output(&comment_lines(text, options), options)
    }

    fn wrap_plot(
        &mut self,
        plot: &RecordedPlot,
        options: &ChunkOptions,
        plot_number: &mut usize,
    ) -> Result<String> {
        self.state.fig_counter += 1;
        *plot_number += 1;
        let index = self.state.fig_counter;
        let stem = format!("{}{}-{}", options.fig_path, options.label, index);

        let mut first = None;
        for spec in figure_specs(options) {
            let path = self.plots.write(plot, &spec, &stem)?;
            self.state.figures.push(path.clone());
            first.get_or_insert(path);
        }

        if options.fig_show == FigShow::Hide {
            return Ok(String::new());
        }
        let Some(path) = first else {
            return Ok(String::new());
        };
        let info = PlotInfo {
            path: &path,
            index,
            number: *plot_number,
            label: &options.label,
            caption: options.fig_cap.as_deref(),
        };
        Ok(self.hooks.plot(&info, options))
    }
}

pub(crate) fn error_text(call: Option<&str>, message: &str) -> String {
    match call {
        Some(call) => format!("Error in {call}: {message}"),
        None => format!("Error: {message}"),
    }
}

/// Prefix every line with the `comment` option.
fn comment_lines(text: &str, options: &ChunkOptions) -> String {
    if options.comment.is_empty() {
        return text.to_string();
    }
    text.lines()
        .map(|line| format!("{} {line}", options.comment))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Trim blank lines at both ends and remove the indentation common to all lines.
fn strip_white(code: &str) -> String {
    let lines: Vec<&str> = code.lines().collect();
    let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return String::new();
    };
    let last = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .unwrap_or(first);
    let body = &lines[first..=last];

    let indent = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    body.iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}
