//! Child-Document Recursion and the host services offered to running code.

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use knitwork_dialects::Dialect;
use knitwork_shared::{ChunkOptions, KnitError, OptionLayer, Result};

use crate::engine::{ChildSource, Engine, EvalHost};
use crate::options::{NOT_INHERITED, canonical_layer};
use crate::pipeline::Knit;
use crate::state::DocumentFrame;

/// Maximum nesting of child documents.
pub const MAX_CHILD_DEPTH: usize = 32;

/// A child document read and ready to split.
pub(crate) struct LoadedChild {
    pub text: String,
    pub frame: DocumentFrame,
}

impl Knit<'_> {
    /// Read a child document relative to the calling document.
    pub(crate) fn load_child(&self, source: ChildSource) -> Result<LoadedChild> {
        if self.state.depth() >= MAX_CHILD_DEPTH {
            return Err(KnitError::config(format!(
                "child documents nested deeper than {MAX_CHILD_DEPTH} levels"
            )));
        }
        let parent = self
            .state
            .frame()
            .cloned()
            .ok_or_else(|| KnitError::config("child document without a parent document"))?;

        let (text, name, dir, dialect) = match source {
            ChildSource::Path(path) => {
                let path = if path.is_absolute() {
                    path
                } else {
                    parent.dir.join(path)
                };
                let text = std::fs::read_to_string(&path).map_err(|e| KnitError::io(&path, e))?;
                let dialect = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(Dialect::from_extension)
                    .unwrap_or(parent.dialect);
                let dir = path
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| parent.dir.clone());
                (text, path.display().to_string(), dir, dialect)
            }
            ChildSource::Text(text) => (
                text,
                format!("{} (child)", parent.name),
                parent.dir.clone(),
                parent.dialect,
            ),
        };

        let own_front_matter = dialect.has_front_matter(&text);
        let text = if parent.front_matter {
            dialect.strip_front_matter(&text).to_string()
        } else {
            text
        };

        Ok(LoadedChild {
            text,
            frame: DocumentFrame {
                name,
                dir,
                dialect,
                front_matter: parent.front_matter || own_front_matter,
            },
        })
    }

    /// Knit a child document nested in the current run.
    ///
    /// The calling chunk's explicit options (minus `label`, `child` and
    /// `ref.label`) and `overrides` become the child's chunk defaults. The
    /// parent's defaults and chunk context are restored afterwards, on
    /// success and failure alike.
    #[instrument(skip_all, fields(depth = self.state.depth() + 1))]
    pub(crate) fn knit_child_document(
        &mut self,
        engine: &mut dyn Engine,
        source: ChildSource,
        overrides: OptionLayer,
    ) -> Result<String> {
        let child = self.load_child(source)?;
        info!(child = %child.frame.name, "knitting child document");
        let segments = child.frame.dialect.split(&child.text, engine.languages());

        let saved_defaults = self.state.defaults.clone();
        let saved_current = self.state.current.clone();

        if let Some(context) = &self.state.current {
            for (name, value) in &context.explicit {
                if !NOT_INHERITED.contains(&name.as_str()) {
                    self.state.defaults.insert(name.clone(), value.clone());
                }
            }
        }
        self.state.defaults.extend(canonical_layer(overrides));
        self.state.frames.push(child.frame);

        let result = self.run_document(engine, &segments, true);

        self.state.frames.pop();
        self.state.defaults = saved_defaults;
        self.state.current = saved_current;

        let out = result?;
        debug!(bytes = out.len(), "child document done");
        Ok(format!("\n{out}"))
    }
}

impl EvalHost for Knit<'_> {
    fn knit_child(
        &mut self,
        engine: &mut dyn Engine,
        source: ChildSource,
        overrides: OptionLayer,
    ) -> Result<String> {
        self.knit_child_document(engine, source, overrides)
    }

    fn exit(&mut self, closing: Option<String>) {
        debug!("termination requested");
        self.state.exit = Some(closing.unwrap_or_default());
    }

    fn push_metadata(&mut self, value: serde_json::Value) {
        self.state.metadata.push(value);
    }

    fn set_chunk_defaults(&mut self, layer: OptionLayer) {
        self.state.defaults.extend(canonical_layer(layer));
    }

    fn options(&self) -> Option<&ChunkOptions> {
        self.state.current.as_ref().map(|context| &context.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEngine, knit_path, knit_text};
    use pretty_assertions::assert_eq;

    #[test]
    fn child_option_splices_child_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part.md"), "Child prose.\n```{calc}\ninner\n```\n").unwrap();
        let main = dir.path().join("main.md");
        std::fs::write(&main, "Top.\n```{calc, child='part.md', echo=FALSE}\n```\nEnd.\n").unwrap();

        let mut engine = ScriptedEngine::new();
        let out = knit_path(&mut engine, &main).unwrap();
        assert_eq!(out.text, "Top.\n\nChild prose.\n```\n## <inner>\n```\nEnd.\n");
        assert_eq!(out.chunks, 2);
    }

    #[test]
    fn child_from_code_inherits_explicit_options_only() {
        let mut engine = ScriptedEngine::new();
        let doc = "```{calc parent, comment='#>'}\n@child ```{calc}\\nkid\\n```\\n\n```\n```{calc}\nafter\n```\n";
        let out = knit_text(&mut engine, doc).unwrap();

        assert!(out.text.contains("#> <kid>"));
        assert!(out.text.contains("## <after>"));
        assert!(engine.seen.contains(&"kid".to_string()));
    }

    #[test]
    fn exit_in_child_stops_every_level() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.md"), "```{calc}\n@exit\n```\nnot shown\n").unwrap();
        let main = dir.path().join("main.md");
        std::fs::write(&main, "```{calc, child='c.md'}\n```\nalso not shown\n").unwrap();

        let mut engine = ScriptedEngine::new();
        let out = knit_path(&mut engine, &main).unwrap();
        assert!(!out.text.contains("not shown"));
        assert!(out.text.ends_with("THE END\n"));
    }

    #[test]
    fn self_inclusion_hits_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("loop.md");
        std::fs::write(&main, "```{calc, child='loop.md'}\n```\n").unwrap();

        let mut engine = ScriptedEngine::new();
        let err = knit_path(&mut engine, &main).unwrap_err();
        assert!(matches!(err, KnitError::Config { .. }));
    }

    #[test]
    fn front_matter_stripped_when_parent_has_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("c.md"), "---\ntitle: child\n---\nchild body\n").unwrap();
        let main = dir.path().join("main.md");
        std::fs::write(&main, "---\ntitle: main\n---\n```{calc, child='c.md'}\n```\n").unwrap();

        let mut engine = ScriptedEngine::new();
        let out = knit_path(&mut engine, &main).unwrap();
        assert_eq!(out.text, "---\ntitle: main\n---\n\nchild body\n");
    }

    #[test]
    fn failing_child_restores_parent_context() {
        let mut engine = ScriptedEngine::new();
        engine.respond(
            "bad",
            vec![knitwork_shared::ResultItem::Error {
                call: None,
                message: "child failed".into(),
            }],
        );
        let mut harness = crate::testing::Harness::new();
        let mut knit = harness.session(&knitwork_dialects::MarkdownHooks);
        let before = knit.state.defaults.clone();

        let err = knit
            .knit_child_document(
                &mut engine,
                ChildSource::Text("```{calc}\nbad\n```\n".into()),
                [("echo".to_string(), knitwork_shared::OptionValue::Bool(false))]
                    .into_iter()
                    .collect(),
            )
            .unwrap_err();
        assert!(err.is_evaluation());
        assert_eq!(knit.state.defaults, before);
        assert_eq!(knit.state.depth(), 0);
    }
}
