//! Tangle: extract chunk code into a standalone script.
//!
//! Documentation levels:
//! - `0`: code only, each chunk behind a bare `## ----` marker
//! - `1`: `## ----label, options----` headers
//! - `2`: headers plus prose as `#' ` lines

use tracing::{debug, instrument};

use knitwork_dialects::ensure_newline;
use knitwork_shared::{EvalSelection, KnitError, Result, Segment};

use crate::engine::{ChildSource, Engine};
use crate::options::ChunkDecl;
use crate::pipeline::Knit;

impl Knit<'_> {
    /// Tangle the top-level document.
    pub(crate) fn tangle(
        &mut self,
        engine: &mut dyn Engine,
        segments: &[Segment],
        documentation: u8,
    ) -> Result<String> {
        if documentation > 2 {
            return Err(KnitError::config(format!(
                "documentation level must be 0, 1 or 2 (got {documentation})"
            )));
        }
        let pieces = self.tangle_segments(engine, segments, documentation)?;
        Ok(pieces.join("\n"))
    }

    #[instrument(skip_all, fields(depth = self.state.depth(), segments = segments.len()))]
    fn tangle_segments(
        &mut self,
        engine: &mut dyn Engine,
        segments: &[Segment],
        documentation: u8,
    ) -> Result<Vec<String>> {
        let decls = self.declare_all(segments)?;
        let prefix = engine.comment_prefix();
        let mut pieces = Vec::new();

        for (segment, decl) in segments.iter().zip(decls) {
            match (segment, decl) {
                (Segment::Prose(prose), _) if documentation == 2 => {
                    pieces.push(roxygen(&prose.text));
                }
                (Segment::Code(_), Some(decl)) => {
                    pieces.extend(self.tangle_chunk(engine, &decl, documentation, prefix)?);
                }
                _ => {}
            }
        }

        pieces.retain(|piece| !piece.trim().is_empty());
        Ok(pieces)
    }

    fn tangle_chunk(
        &mut self,
        engine: &mut dyn Engine,
        decl: &ChunkDecl,
        documentation: u8,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let resolved = self
            .state
            .labels
            .resolve(decl, &self.state.defaults, self.config)?;
        let options = resolved.options;
        self.state.chunk_counter += 1;

        if !options.purl {
            debug!(label = %options.label, "chunk excluded from tangle");
            return Ok(Vec::new());
        }

        if !options.child.is_empty() {
            let mut pieces = Vec::new();
            for child in &options.child {
                let loaded = self.load_child(ChildSource::Path(child.into()))?;
                let segments = loaded.frame.dialect.split(&loaded.text, engine.languages());
                self.state.frames.push(loaded.frame);
                let result = self.tangle_segments(engine, &segments, documentation);
                self.state.frames.pop();
                pieces.extend(result?);
            }
            return Ok(pieces);
        }

        // Level 0 emits bodies verbatim.
        let code = match &options.eval {
            _ if documentation == 0 => resolved.code,
            EvalSelection::Nothing => comment_out(&resolved.code, prefix, |_| false),
            EvalSelection::Lines(_) => {
                comment_out(&resolved.code, prefix, |n| options.eval.includes(n))
            }
            EvalSelection::All => resolved.code,
        };

        let marker = format!("{prefix}{prefix} ----");
        let header = match documentation {
            0 => marker,
            _ => format!("{marker}{}----", chunk_header(decl)),
        };
        Ok(vec![ensure_newline(&format!("{header}\n{code}"))])
    }
}

/// `label, name=value, ...` from the chunk's literal options.
fn chunk_header(decl: &ChunkDecl) -> String {
    let mut parts = vec![decl.label.clone()];
    for (name, value) in &decl.literal {
        if name == "label" || name == "engine" {
            continue;
        }
        parts.push(format!("{name}={value}"));
    }
    parts.join(", ")
}

fn comment_out(code: &str, prefix: &str, keep: impl Fn(usize) -> bool) -> String {
    code.lines()
        .enumerate()
        .map(|(i, line)| {
            if keep(i + 1) {
                line.to_string()
            } else {
                format!("{prefix} {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn roxygen(prose: &str) -> String {
    if prose.trim().is_empty() {
        return String::new();
    }
    prose
        .trim_matches('\n')
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                "#'".to_string()
            } else {
                format!("#' {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEngine, tangle_text};
    use pretty_assertions::assert_eq;

    const DOC: &str = "Intro prose.\n\n```{calc setup, echo=FALSE}\nx = 1\n```\n\nMiddle.\n\n```{calc, eval=FALSE}\ny = 2\n```\n\n```{calc hidden, purl=FALSE}\nz = 3\n```\n";

    #[test]
    fn documentation_levels() {
        let mut engine = ScriptedEngine::new();

        let bare = tangle_text(&mut engine, DOC, 0).unwrap();
        assert_eq!(bare.text, "## ----\nx = 1\n\n## ----\ny = 2\n");

        let headers = tangle_text(&mut engine, DOC, 1).unwrap();
        assert_eq!(
            headers.text,
            "## ----setup, echo=FALSE----\nx = 1\n\n## ----unnamed-chunk-1, eval=FALSE----\n# y = 2\n"
        );

        let prose = tangle_text(&mut engine, DOC, 2).unwrap();
        assert!(prose.text.starts_with("#' Intro prose.\n\n## ----setup"));
        assert!(prose.text.contains("#' Middle.\n"));
        assert_eq!(engine.calls, 0);
    }

    #[test]
    fn tangled_script_resplits_to_original_bodies() {
        let doc = "Prose.\n```{calc a}\nfirst = 1\nsecond = 2\n```\nMore.\n```{calc b}\nthird = 3\n```\n```{calc c, eval=FALSE}\nskipped = 4\n```\n";
        let mut engine = ScriptedEngine::new();
        let script = tangle_text(&mut engine, doc, 0).unwrap().text;

        let segments = knitwork_dialects::Dialect::Script.split(&script, &[]);
        let bodies: Vec<_> = segments
            .iter()
            .map(|s| s.as_code().map(|c| c.code.as_str()))
            .collect();
        assert_eq!(
            bodies,
            vec![Some("first = 1\nsecond = 2"), Some("third = 3"), Some("skipped = 4")]
        );
    }

    #[test]
    fn child_chunks_tangle_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.md"), "```{calc inner}\nk = 9\n```\n").unwrap();
        let main = dir.path().join("main.md");
        std::fs::write(&main, "```{calc a}\nx\n```\n```{calc, child='c.md'}\n```\n").unwrap();

        let mut engine = ScriptedEngine::new();
        let out = crate::testing::tangle_path(&mut engine, &main, 1).unwrap();
        assert_eq!(out.text, "## ----a----\nx\n\n## ----inner----\nk = 9\n");
    }

    #[test]
    fn roxygen_prose_lines() {
        assert_eq!(roxygen("\nOne.\n\nTwo.\n\n"), "#' One.\n#'\n#' Two.\n");
        assert_eq!(roxygen("\n \n"), "");
    }
}
