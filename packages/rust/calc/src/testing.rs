//! A host that records what evaluated code asked of it.

use knitwork_core::{ChildSource, Engine, EvalHost, EvalRequest};
use knitwork_shared::{ChunkOptions, OptionLayer, Result, ResultItem};

use crate::CalcEngine;

#[derive(Default)]
pub(crate) struct RecordingHost {
    pub children: Vec<(ChildSource, OptionLayer)>,
    pub exits: Vec<Option<String>>,
    pub defaults: Vec<OptionLayer>,
    pub options: Option<ChunkOptions>,
}

impl EvalHost for RecordingHost {
    fn knit_child(
        &mut self,
        _engine: &mut dyn Engine,
        source: ChildSource,
        overrides: OptionLayer,
    ) -> Result<String> {
        self.children.push((source, overrides));
        Ok(format!("<child {}>", self.children.len()))
    }

    fn exit(&mut self, closing: Option<String>) {
        self.exits.push(closing);
    }

    fn push_metadata(&mut self, _value: serde_json::Value) {}

    fn set_chunk_defaults(&mut self, layer: OptionLayer) {
        self.defaults.push(layer);
    }

    fn options(&self) -> Option<&ChunkOptions> {
        self.options.as_ref()
    }
}

/// Evaluate one chunk on a fresh engine.
pub(crate) fn run(code: &str) -> (Vec<ResultItem>, RecordingHost) {
    let mut host = RecordingHost::default();
    let (items, _) = run_with(&mut host, code);
    (items, host)
}

pub(crate) fn run_with(host: &mut RecordingHost, code: &str) -> (Vec<ResultItem>, CalcEngine) {
    let mut engine = CalcEngine::new();
    let request = EvalRequest {
        code,
        engine: "calc",
        label: "test",
        inline: false,
    };
    let items = engine.evaluate(&request, host).unwrap();
    (items, engine)
}
