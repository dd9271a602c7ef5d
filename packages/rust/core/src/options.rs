//! Option Resolver: chunk header parsing, label registry, layered merging.
//!
//! Resolution order, lowest first: built-in defaults, active chunk defaults
//! (config `[chunk]` plus anything set from code), options inherited through
//! `ref.label`, then the chunk's own literals.

use std::collections::HashMap;

use tracing::debug;

use knitwork_shared::{
    ChunkOptions, CodeSegment, KnitConfig, KnitError, LineRange, OptionLayer, OptionValue, Result,
    canonical_name,
};

/// Options a child document never inherits from its calling chunk.
pub(crate) const NOT_INHERITED: &[&str] = &["label", "child", "ref.label"];

// ---------------------------------------------------------------------------
// Header parsing
// ---------------------------------------------------------------------------

/// Parse a raw chunk header (`label, echo=FALSE, fig.width=c(4, 6)`).
///
/// The first unnamed token is the label. Names are canonicalized.
pub fn parse_options(raw: &str) -> std::result::Result<OptionLayer, String> {
    let mut layer = OptionLayer::new();
    let mut saw_label = false;

    for (position, item) in split_top_level(raw, ',')?.into_iter().enumerate() {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (name, value) = match find_assignment(item) {
            Some(eq) => {
                let name = item[..eq].trim();
                if !is_option_name(name) {
                    return Err(format!("invalid option name '{name}'"));
                }
                (canonical_name(name), parse_value(&item[eq + 1..])?)
            }
            None if position == 0 && !saw_label => {
                saw_label = true;
                ("label".to_string(), parse_label(item)?)
            }
            None => return Err(format!("'{item}' is not a name = value assignment")),
        };
        if layer.insert(name.clone(), value).is_some() {
            return Err(format!("option '{name}' given more than once"));
        }
    }
    Ok(layer)
}

/// Parse one option literal.
pub fn parse_value(raw: &str) -> std::result::Result<OptionValue, String> {
    let s = raw.trim();
    match s {
        "" => return Err("missing value".into()),
        "TRUE" | "T" | "true" => return Ok(OptionValue::Bool(true)),
        "FALSE" | "F" | "false" => return Ok(OptionValue::Bool(false)),
        "NULL" => return Ok(OptionValue::Null),
        _ => {}
    }

    if s.starts_with('\'') || s.starts_with('"') {
        return parse_quoted(s).map(OptionValue::Str);
    }

    let list_body = s
        .strip_prefix("c(")
        .and_then(|rest| rest.strip_suffix(')'))
        .or_else(|| s.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')));
    if let Some(body) = list_body {
        let mut items = Vec::new();
        for item in split_top_level(body, ',')? {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match parse_value(item)? {
                OptionValue::List(inner) => items.extend(inner),
                scalar => items.push(scalar),
            }
        }
        return Ok(OptionValue::List(items));
    }

    if let Some((from, to)) = s.split_once(':') {
        return parse_range(from, to);
    }

    parse_number(s).map(OptionValue::Number)
}

fn parse_label(raw: &str) -> std::result::Result<OptionValue, String> {
    if raw.starts_with('\'') || raw.starts_with('"') {
        return parse_quoted(raw).map(OptionValue::Str);
    }
    if raw.chars().any(char::is_whitespace) {
        return Err(format!("label '{raw}' contains whitespace"));
    }
    Ok(OptionValue::Str(raw.to_string()))
}

fn parse_quoted(s: &str) -> std::result::Result<String, String> {
    let mut chars = s.chars();
    let Some(quote) = chars.next() else {
        return Err("missing value".into());
    };
    let mut out = String::new();
    let mut escaped = false;
    let mut closed = false;
    for c in chars.by_ref() {
        if escaped {
            out.push(match c {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            closed = true;
            break;
        } else {
            out.push(c);
        }
    }
    if !closed {
        return Err(format!("unterminated string {s}"));
    }
    if !chars.as_str().trim().is_empty() {
        return Err(format!("unexpected text after string {s}"));
    }
    Ok(out)
}

fn parse_number(s: &str) -> std::result::Result<f64, String> {
    let numeric = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    if !numeric {
        return Err(format!("cannot parse value '{s}'"));
    }
    s.parse::<f64>()
        .map_err(|_| format!("cannot parse value '{s}'"))
}

/// Longest `a:b` sequence accepted in a chunk header.
const MAX_RANGE_LEN: f64 = 100_000.0;

/// `a:b` integer sequence, ascending or descending.
fn parse_range(from: &str, to: &str) -> std::result::Result<OptionValue, String> {
    let from = parse_number(from.trim())?;
    let to = parse_number(to.trim())?;
    if from.fract() != 0.0 || to.fract() != 0.0 {
        return Err(format!("range bounds must be integers ({from}:{to})"));
    }
    if (to - from).abs() >= MAX_RANGE_LEN {
        return Err(format!("range {from}:{to} is longer than {MAX_RANGE_LEN} values"));
    }
    let (from, to) = (from as i64, to as i64);
    let values: Vec<OptionValue> = if from <= to {
        (from..=to).map(|n| OptionValue::Number(n as f64)).collect()
    } else {
        (to..=from).rev().map(|n| OptionValue::Number(n as f64)).collect()
    };
    Ok(OptionValue::List(values))
}

fn is_option_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Position of the first `=` outside quotes and brackets.
fn find_assignment(item: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut escaped = false;
    for (i, c) in item.char_indices() {
        match (quote, c) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, '=') if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

/// Split on `sep` outside quotes and brackets.
fn split_top_level(text: &str, sep: char) -> std::result::Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut depth = 0i32;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(_), _) if escaped => escaped = false,
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unbalanced '{c}'"));
                }
            }
            (None, c) if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated string".into());
    }
    if depth != 0 {
        return Err("unbalanced brackets".into());
    }
    parts.push(&text[start..]);
    Ok(parts)
}

// ---------------------------------------------------------------------------
// Label registry
// ---------------------------------------------------------------------------

/// A chunk whose header has been parsed and whose label is registered.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDecl {
    pub label: String,
    pub lines: LineRange,
    /// The chunk's literal options, label included.
    pub literal: OptionLayer,
    pub code: String,
}

/// A chunk with every option resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChunk {
    pub options: ChunkOptions,
    /// Body to evaluate; borrowed from `ref.label` chunks when blank.
    pub code: String,
}

/// Labels declared so far across the whole document tree.
#[derive(Debug, Default)]
pub struct LabelRegistry {
    chunks: HashMap<String, ChunkDecl>,
    unnamed: usize,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&ChunkDecl> {
        self.chunks.get(label)
    }

    /// Parse a chunk header and register its label.
    pub fn declare(&mut self, segment: &CodeSegment) -> Result<ChunkDecl> {
        let mut literal = parse_options(&segment.options).map_err(|msg| {
            KnitError::malformed(header_label(&segment.options), segment.lines, msg)
        })?;

        let label = match literal.get("label") {
            Some(OptionValue::Str(label)) if !label.is_empty() => label.clone(),
            Some(OptionValue::Str(_)) | None => self.next_unnamed(),
            Some(other) => {
                return Err(KnitError::malformed(
                    "<unnamed>",
                    segment.lines,
                    format!("label must be a string (got {other})"),
                ));
            }
        };

        if let Some(first) = self.chunks.get(&label) {
            return Err(KnitError::DuplicateLabel {
                label,
                first: first.lines,
                second: segment.lines,
            });
        }

        literal.insert("label".into(), OptionValue::Str(label.clone()));
        if let Some(engine) = &segment.engine {
            literal
                .entry("engine".into())
                .or_insert_with(|| OptionValue::Str(engine.clone()));
        }

        let decl = ChunkDecl {
            label: label.clone(),
            lines: segment.lines,
            literal,
            code: segment.code.clone(),
        };
        debug!(label = %label, lines = %segment.lines, "declared chunk");
        self.chunks.insert(label, decl.clone());
        Ok(decl)
    }

    fn next_unnamed(&mut self) -> String {
        loop {
            self.unnamed += 1;
            let candidate = format!("unnamed-chunk-{}", self.unnamed);
            if !self.chunks.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Merge defaults, `ref.label` inheritance and the chunk's literals.
    pub fn resolve(
        &self,
        decl: &ChunkDecl,
        defaults: &OptionLayer,
        config: &KnitConfig,
    ) -> Result<ResolvedChunk> {
        let malformed = |msg: String| KnitError::malformed(&decl.label, decl.lines, msg);
        let allow_unknown = config.allow_unknown_options;

        let mut options = base_options(defaults, config).map_err(&malformed)?;

        let references = match decl.literal.get("ref.label") {
            Some(value) => value
                .items()
                .into_iter()
                .map(|item| match item {
                    OptionValue::Str(s) => Ok(s.clone()),
                    other => Err(malformed(format!("ref.label must name chunks (got {other})"))),
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let mut borrowed_code = Vec::new();
        for reference in &references {
            let Some(target) = self.chunks.get(reference) else {
                return Err(malformed(format!("ref.label refers to unknown chunk '{reference}'")));
            };
            for (name, value) in &target.literal {
                if name == "label" || name == "ref.label" {
                    continue;
                }
                options.apply(name, value, allow_unknown).map_err(&malformed)?;
            }
            borrowed_code.push(target.code.as_str());
        }

        options
            .apply_layer(&decl.literal, allow_unknown)
            .map_err(&malformed)?;

        let code = if decl.code.trim().is_empty() && !borrowed_code.is_empty() {
            borrowed_code.join("\n")
        } else {
            decl.code.clone()
        };

        Ok(ResolvedChunk { options, code })
    }
}

/// Built-in defaults with the configured engine and the active defaults applied.
pub(crate) fn base_options(
    defaults: &OptionLayer,
    config: &KnitConfig,
) -> std::result::Result<ChunkOptions, String> {
    let mut options = ChunkOptions {
        engine: config.default_engine.clone(),
        ..ChunkOptions::default()
    };
    options.apply_layer(defaults, config.allow_unknown_options)?;
    Ok(options)
}

/// Canonicalize the names of a layer supplied from code or config.
pub(crate) fn canonical_layer(layer: OptionLayer) -> OptionLayer {
    layer
        .into_iter()
        .map(|(name, value)| (canonical_name(&name), value))
        .collect()
}

/// Best-effort label for error messages about unparseable headers.
fn header_label(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or_default().trim();
    if first.is_empty() || first.contains('=') {
        "<unnamed>".to_string()
    } else {
        first.trim_matches(['\'', '"']).to_string()
    }
}
