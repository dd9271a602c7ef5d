//! Graphics devices: recorded plots replayed into image files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use knitwork_shared::{ChunkOptions, KnitError, RecordedPlot, Result};

/// One combination of figure parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FigureSpec {
    /// Inches.
    pub width: f64,
    pub height: f64,
    pub dev: String,
    pub ext: String,
    pub dpi: f64,
}

/// Broadcast the list-valued figure options to the length of the longest.
pub fn figure_specs(options: &ChunkOptions) -> Vec<FigureSpec> {
    let n = [
        options.fig_width.len(),
        options.fig_height.len(),
        options.dev.len(),
        options.fig_ext.len(),
        options.dpi.len(),
    ]
    .into_iter()
    .max()
    .unwrap_or(0);

    if options.dev.is_empty() {
        return Vec::new();
    }

    (0..n)
        .map(|i| {
            let dev = cycle(&options.dev, i).cloned().unwrap_or_default();
            let ext = cycle(&options.fig_ext, i)
                .filter(|e| !e.is_empty())
                .cloned()
                .unwrap_or_else(|| dev.clone());
            FigureSpec {
                width: cycle(&options.fig_width, i).copied().unwrap_or(7.0),
                height: cycle(&options.fig_height, i).copied().unwrap_or(7.0),
                dev,
                ext,
                dpi: cycle(&options.dpi, i).copied().unwrap_or(72.0),
            }
        })
        .collect()
}

fn cycle<T>(items: &[T], i: usize) -> Option<&T> {
    if items.is_empty() {
        None
    } else {
        items.get(i % items.len())
    }
}

/// Writes recorded plots to files.
pub trait PlotWriter {
    /// Write `plot` for `spec` under `stem`; returns the path relative to the
    /// output directory.
    fn write(&mut self, plot: &RecordedPlot, spec: &FigureSpec, stem: &str) -> Result<String>;
}

/// SVG device writing below a root directory (usually the output directory).
#[derive(Debug, Clone)]
pub struct SvgDevice {
    root: PathBuf,
}

impl SvgDevice {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PlotWriter for SvgDevice {
    fn write(&mut self, plot: &RecordedPlot, spec: &FigureSpec, stem: &str) -> Result<String> {
        if spec.dev != "svg" {
            return Err(KnitError::config(format!(
                "unsupported graphics device '{}'",
                spec.dev
            )));
        }
        let relative = format!("{stem}.{}", spec.ext);
        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KnitError::io(parent, e))?;
        }
        std::fs::write(&path, render_svg(plot, spec)).map_err(|e| KnitError::io(&path, e))?;
        debug!(path = %path.display(), "wrote figure");
        Ok(relative)
    }
}

/// Render a plot as a polyline scaled into the figure box.
pub fn render_svg(plot: &RecordedPlot, spec: &FigureSpec) -> String {
    let width = (spec.width * spec.dpi).round();
    let height = (spec.height * spec.dpi).round();
    let margin = (width.min(height) * 0.1).round();

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );
    if let Some(title) = &plot.title {
        let _ = writeln!(svg, "<title>{}</title>", escape_xml(title));
    }
    let _ = writeln!(
        svg,
        r#"<rect x="0" y="0" width="{width}" height="{height}" fill="white"/>"#
    );

    if !plot.points.is_empty() {
        let (x_min, x_max) = bounds(plot.points.iter().map(|p| p.0));
        let (y_min, y_max) = bounds(plot.points.iter().map(|p| p.1));
        let scale = |v: f64, lo: f64, hi: f64, span: f64| {
            if hi > lo { (v - lo) / (hi - lo) * span } else { span / 2.0 }
        };
        let inner_w = width - 2.0 * margin;
        let inner_h = height - 2.0 * margin;
        let points = plot
            .points
            .iter()
            .map(|(x, y)| {
                let px = margin + scale(*x, x_min, x_max, inner_w);
                let py = height - margin - scale(*y, y_min, y_max, inner_h);
                format!("{px:.1},{py:.1}")
            })
            .collect::<Vec<_>>()
            .join(" ");
        let _ = writeln!(
            svg,
            r#"<polyline points="{points}" fill="none" stroke="black" stroke-width="1"/>"#
        );
    }

    svg.push_str("</svg>\n");
    svg
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
