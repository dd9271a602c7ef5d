//! Source-line concordance: which input lines produced which output lines.

use serde::{Deserialize, Serialize};

use knitwork_shared::{KnitError, LineRange, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcordanceEntry {
    pub source: LineRange,
    /// First output line (1-based) of this segment's output.
    pub output_start: usize,
    pub output_lines: usize,
}

/// Concordance for one top-level document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concordance {
    pub input: String,
    pub entries: Vec<ConcordanceEntry>,
}

impl Concordance {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            entries: Vec::new(),
        }
    }

    /// Record the output produced for one segment, appended after earlier ones.
    pub fn record(&mut self, source: LineRange, output: &str) {
        let output_start = self
            .entries
            .last()
            .map_or(1, |e| e.output_start + e.output_lines);
        self.entries.push(ConcordanceEntry {
            source,
            output_start,
            output_lines: count_lines(output),
        });
    }

    /// Source line of every output line, in output order.
    ///
    /// Output lines past the end of a segment's source map to its last line.
    pub fn line_map(&self) -> Vec<usize> {
        self.entries
            .iter()
            .flat_map(|e| {
                (0..e.output_lines).map(move |i| (e.source.start + i).min(e.source.end))
            })
            .collect()
    }

    /// Run-length form: the first source line, then `count delta` pairs.
    pub fn encode(&self) -> String {
        let map = self.line_map();
        let Some(first) = map.first() else {
            return String::new();
        };
        let mut parts = vec![first.to_string()];
        let mut run: Option<(usize, i64)> = None;
        for pair in map.windows(2) {
            let delta = pair[1] as i64 - pair[0] as i64;
            run = match run {
                Some((count, d)) if d == delta => Some((count + 1, d)),
                Some((count, d)) => {
                    parts.push(format!("{count} {d}"));
                    Some((1, delta))
                }
                None => Some((1, delta)),
            };
        }
        if let Some((count, d)) = run {
            parts.push(format!("{count} {d}"));
        }
        parts.join(" ")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| KnitError::config(format!("cannot serialize concordance: {e}")))
    }
}

fn count_lines(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let newlines = text.matches('\n').count();
    if text.ends_with('\n') { newlines } else { newlines + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_map_lines() {
        let mut c = Concordance::new("doc.md");
        c.record(LineRange::new(1, 2), "Text.\n\n");
        c.record(LineRange::new(3, 5), "```calc\nx = 1\n```\n\n```\n## 2\n```\n");
        c.record(LineRange::new(6, 6), "");

        assert_eq!(c.entries[1].output_start, 3);
        assert_eq!(c.entries[1].output_lines, 7);
        assert_eq!(c.entries[2].output_lines, 0);
        assert_eq!(c.line_map(), vec![1, 2, 3, 4, 5, 5, 5, 5, 5]);
    }

    #[test]
    fn encode_run_lengths() {
        let mut c = Concordance::new("doc.md");
        c.record(LineRange::new(1, 3), "a\nb\nc\n");
        c.record(LineRange::new(4, 4), "x\ny\nz\n");
        assert_eq!(c.line_map(), vec![1, 2, 3, 4, 4, 4]);
        assert_eq!(c.encode(), "1 3 1 2 0");
        assert_eq!(Concordance::new("empty").encode(), "");
    }
}
