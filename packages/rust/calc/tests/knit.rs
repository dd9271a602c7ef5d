//! Documents knitted end to end with the calc engine.

use std::path::Path;

use knitwork_calc::CalcEngine;
use knitwork_core::{KnitOutput, KnitRequest, Knitter, LogKind, SilentProgress, SvgDevice};
use knitwork_dialects::Dialect;
use knitwork_shared::{KnitConfig, KnitError, Result};
use pretty_assertions::assert_eq;

fn knit(knitter: &mut Knitter, engine: &mut CalcEngine, request: &KnitRequest) -> Result<KnitOutput> {
    let figures = tempfile::tempdir().unwrap();
    let mut device = SvgDevice::new(figures.path());
    knitter.knit(engine, &mut device, request, &SilentProgress)
}

fn knit_text(doc: &str) -> Result<KnitOutput> {
    knit(
        &mut Knitter::new(KnitConfig::default()),
        &mut CalcEngine::new(),
        &KnitRequest::text(doc),
    )
}

fn knit_file(path: &Path) -> Result<KnitOutput> {
    let mut device = SvgDevice::new(path.parent().unwrap_or(Path::new(".")));
    Knitter::new(KnitConfig::default()).knit(
        &mut CalcEngine::new(),
        &mut device,
        &KnitRequest::path(path),
        &SilentProgress,
    )
}

#[test]
fn chunk_and_inline_share_one_context() {
    let doc = "Text.\n\n```{calc}\nx = 1+1\n```\n\nResult: `calc x`\n";
    let out = knit_text(doc).unwrap();
    assert_eq!(out.text, "Text.\n\n```calc\nx = 1+1\n```\n\nResult: 2\n");
}

#[test]
fn printed_values_follow_their_source() {
    let doc = "```{calc}\nx <- c(1, 2, 3)\nmean(x)\n```\n";
    let out = knit_text(doc).unwrap();
    assert_eq!(
        out.text,
        "```calc\nx <- c(1, 2, 3)\n```\n\n```calc\nmean(x)\n```\n\n```\n## [1] 2\n```\n"
    );
}

#[test]
fn failure_after_three_chunks_keeps_their_output() {
    let doc = "```{calc}\n1\n```\n```{calc}\n2\n```\n```{calc}\n3\n```\n```{calc}\nstop(\"boom\")\n```\n```{calc}\n5\n```\n";
    let err = knit_text(doc).unwrap_err();
    let KnitError::Evaluation {
        label,
        message,
        partial_output,
        ..
    } = err
    else {
        panic!("expected an evaluation error, got {err}");
    };
    assert_eq!(label, "unnamed-chunk-4");
    assert_eq!(message, "Error: boom");
    for n in 1..=3 {
        assert!(partial_output.contains(&format!("## [1] {n}")));
    }
    assert!(!partial_output.contains("[1] 5"));
}

#[test]
fn errors_allowed_by_chunk_option_continue() {
    let doc = "```{calc, error=TRUE}\nmissing\n1 + 1\n```\n";
    let out = knit_text(doc).unwrap();
    assert!(out.text.contains("## Error: object 'missing' not found"));
    assert!(out.text.contains("## [1] 2"));
}

#[test]
fn warnings_are_rendered_and_logged() {
    let out = knit_text("```{calc}\nsqrt(-4)\n```\n").unwrap();
    assert!(out.text.contains("## Warning in sqrt(-4): NaNs produced"));
    assert_eq!(out.log.count(LogKind::Warning), 1);
}

#[test]
fn child_documents_see_parent_variables() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("part.md"), "Inside: `calc n * 2`\n").unwrap();
    let main = dir.path().join("main.md");
    std::fs::write(
        &main,
        "```{calc}\nn = 21\n```\n```{calc, child='part.md'}\n```\n```{calc, results='asis', echo=FALSE}\nknit_child(text = \"Nested `calc n + 1`\")\n```\n",
    )
    .unwrap();

    let out = knit_file(&main).unwrap();
    assert!(out.text.contains("Inside: 42\n"));
    assert!(out.text.contains("Nested 22\n"));
}

#[test]
fn knit_exit_appends_closing_and_stops() {
    let doc = "Before\n```{calc}\nknit_exit(\"Bye.\\n\")\n```\nAfter\n```{calc}\nstop(\"unreachable\")\n```\n";
    let out = knit_text(doc).unwrap();
    assert!(out.text.starts_with("Before\n"));
    assert!(out.text.ends_with("Bye.\n"));
    assert!(!out.text.contains("After"));
}

#[test]
fn opts_chunk_changes_later_chunks_only_in_this_run() {
    let doc = "```{calc}\nopts_chunk(echo = FALSE)\n```\n```{calc}\n7\n```\n";
    let out = knit_text(doc).unwrap();
    assert!(out.text.contains("```calc\nopts_chunk(echo = FALSE)\n```"));
    assert!(!out.text.contains("```calc\n7\n```"));
    assert!(out.text.ends_with("```\n## [1] 7\n```\n"));

    let again = knit_text("```{calc}\n7\n```\n").unwrap();
    assert!(again.text.contains("```calc\n7\n```"));
}

#[test]
fn cached_chunk_restores_variables_without_evaluating() {
    let doc = "```{calc slow, cache=TRUE}\ny = 10\ny * 2\n```\n```{calc}\ny + 1\n```\n";
    let mut knitter = Knitter::new(KnitConfig::default());
    let request = KnitRequest::text(doc);

    let first = knit(&mut knitter, &mut CalcEngine::new(), &request).unwrap();
    let second = knit(&mut knitter, &mut CalcEngine::new(), &request).unwrap();
    assert_eq!(first.text, second.text);
    assert!(second.text.contains("## [1] 11"));
    assert_eq!(knitter.cache().hits(), 1);
}

#[test]
fn cache_hit_keeps_newer_values_from_earlier_chunks() {
    let v1 = "```{calc a}\nx = 3\n```\n```{calc b, cache=TRUE}\ny = 2\n```\n```{calc c}\nx + y\n```\n";
    let v2 = v1.replace("x = 3", "x = 5");
    let mut knitter = Knitter::new(KnitConfig::default());

    let first = knit(&mut knitter, &mut CalcEngine::new(), &KnitRequest::text(v1)).unwrap();
    assert!(first.text.ends_with("```\n## [1] 5\n```\n"));
    let second = knit(&mut knitter, &mut CalcEngine::new(), &KnitRequest::text(v2)).unwrap();
    assert_eq!(knitter.cache().hits(), 1);
    assert!(second.text.ends_with("```\n## [1] 7\n```\n"));
}

#[test]
fn persistent_cache_survives_the_knitter() {
    let dir = tempfile::tempdir().unwrap();
    let config = KnitConfig {
        cache_dir: Some(dir.path().to_path_buf()),
        ..KnitConfig::default()
    };
    let request = KnitRequest::text("```{calc total, cache=TRUE}\nsum(1:100)\n```\n");

    let first = knit(&mut Knitter::new(config.clone()), &mut CalcEngine::new(), &request).unwrap();
    let mut knitter = Knitter::new(config);
    let second = knit(&mut knitter, &mut CalcEngine::new(), &request).unwrap();
    assert_eq!(first.text, second.text);
    assert_eq!(knitter.cache().hits(), 1);
}

#[test]
fn volatile_results_refuse_the_cache() {
    let err = knit_text("```{calc clock, cache=TRUE}\nnow()\n```\n").unwrap_err();
    assert!(matches!(err, KnitError::NotCacheable { ref label } if label == "clock"));
}

#[test]
fn repeated_runs_are_byte_identical() {
    let doc = "# Report\n\n```{calc}\nv = seq(1, 9, by = 2)\nv\nsum(v)\n```\n\nTotal `calc sum(v)`.\n";
    assert_eq!(knit_text(doc).unwrap().text, knit_text(doc).unwrap().text);
}

#[test]
fn plots_are_written_next_to_the_document() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("report.md");
    std::fs::write(&input, "```{calc fig, echo=FALSE}\nplot(1:3, main = \"up\")\n```\n").unwrap();

    let out = knit_file(&input).unwrap();
    assert_eq!(out.figures, vec!["figure/fig-1.svg".to_string()]);
    assert_eq!(out.text, "![plot of chunk fig](figure/fig-1.svg)\n");
    let svg = std::fs::read_to_string(dir.path().join("figure/fig-1.svg")).unwrap();
    assert!(svg.contains("<title>up</title>"));
}

#[test]
fn noweb_document_gets_latex_markup() {
    let doc = "\\documentclass{article}\n\\begin{document}\n<<a>>=\nx = 3\nx\n@\nValue \\Sexpr{x * 2}.\n\\end{document}\n";
    let request = KnitRequest::text(doc).with_dialect(Dialect::Noweb);
    let out = knit(&mut Knitter::new(KnitConfig::default()), &mut CalcEngine::new(), &request).unwrap();

    assert!(out.text.contains("\\newenvironment{knitout}{}{}\n\\begin{document}"));
    assert!(out.text.contains("\\begin{verbatim}\n## [1] 3\n\\end{verbatim}"));
    assert!(out.text.contains("Value 6."));
}

#[test]
fn tangled_script_resplits_into_the_same_bodies() {
    let doc = "Intro.\n```{calc a}\nx = 1\ny = x + 1\n```\nMiddle `calc y`.\n```{calc b}\nprint(y)\n```\n```{calc c, eval=FALSE}\nstop(\"never\")\n```\n";
    let request = KnitRequest::text(doc).tangle(0);
    let mut engine = CalcEngine::new();
    let script = knit(&mut Knitter::new(KnitConfig::default()), &mut engine, &request)
        .unwrap()
        .text;
    assert!(engine.get("x").is_none());

    let bodies: Vec<String> = Dialect::Script
        .split(&script, &[])
        .iter()
        .filter_map(|segment| segment.as_code().map(|code| code.code.clone()))
        .collect();
    assert_eq!(bodies, vec!["x = 1\ny = x + 1", "print(y)", "stop(\"never\")"]);
}
