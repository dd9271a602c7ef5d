//! Chunk option values and the fully resolved option record.
//!
//! Raw option literals are kept as [`OptionValue`]s in [`OptionLayer`]s until
//! they are applied, in precedence order, onto [`ChunkOptions::default`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Every option name the resolver understands, in canonical dotted form.
pub const KNOWN_OPTIONS: &[&str] = &[
    "label",
    "engine",
    "eval",
    "echo",
    "results",
    "include",
    "cache",
    "cache.path",
    "collapse",
    "strip.white",
    "comment",
    "error",
    "warning",
    "message",
    "purl",
    "fig.path",
    "fig.width",
    "fig.height",
    "dev",
    "fig.ext",
    "dpi",
    "fig.show",
    "fig.cap",
    "child",
    "ref.label",
];

/// Canonical spelling of an option name (`fig_width` → `fig.width`).
///
/// Unknown names are returned unchanged.
pub fn canonical_name(name: &str) -> String {
    let dotted = name.replace('_', ".");
    if KNOWN_OPTIONS.contains(&dotted.as_str()) {
        dotted
    } else {
        name.to_string()
    }
}

// ---------------------------------------------------------------------------
// OptionValue
// ---------------------------------------------------------------------------

/// A literal option value as written in a chunk header or config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<OptionValue>),
    #[serde(skip)]
    Null,
}

impl OptionValue {
    /// View a scalar or list as a list.
    pub fn items(&self) -> Vec<&OptionValue> {
        match self {
            Self::List(items) => items.iter().collect(),
            Self::Null => Vec::new(),
            other => vec![other],
        }
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(true) => write!(f, "TRUE"),
            Self::Bool(false) => write!(f, "FALSE"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Self::List(items) => {
                write!(f, "c(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Null => write!(f, "NULL"),
        }
    }
}

/// Option name → literal, ordered by name for stable output.
pub type OptionLayer = BTreeMap<String, OptionValue>;

// ---------------------------------------------------------------------------
// Enumerated options
// ---------------------------------------------------------------------------

/// How printed output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultsMode {
    #[default]
    Markup,
    Hide,
    Asis,
    Hold,
}

impl std::str::FromStr for ResultsMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "markup" => Ok(Self::Markup),
            "hide" => Ok(Self::Hide),
            "asis" => Ok(Self::Asis),
            "hold" => Ok(Self::Hold),
            other => Err(format!(
                "results must be one of markup, hide, asis, hold (got '{other}')"
            )),
        }
    }
}

/// Where plots appear in a chunk's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FigShow {
    #[default]
    Asis,
    Hold,
    Hide,
}

impl std::str::FromStr for FigShow {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "asis" => Ok(Self::Asis),
            "hold" => Ok(Self::Hold),
            "hide" => Ok(Self::Hide),
            other => Err(format!(
                "fig.show must be one of asis, hold, hide (got '{other}')"
            )),
        }
    }
}

/// Which lines of a chunk are evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EvalSelection {
    #[default]
    All,
    Nothing,
    /// 1-based line numbers; negative numbers exclude lines instead.
    Lines(Vec<i64>),
}

impl EvalSelection {
    pub fn is_nothing(&self) -> bool {
        match self {
            Self::Nothing => true,
            Self::All => false,
            Self::Lines(lines) => lines.is_empty(),
        }
    }

    /// Whether 1-based `line` is evaluated.
    pub fn includes(&self, line: usize) -> bool {
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::Lines(lines) => {
                let line = line as i64;
                if lines.iter().all(|l| *l < 0) {
                    !lines.contains(&-line)
                } else {
                    lines.contains(&line)
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkOptions
// ---------------------------------------------------------------------------

/// Fully resolved options for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOptions {
    pub label: String,
    pub engine: String,
    pub eval: EvalSelection,
    pub echo: bool,
    pub results: ResultsMode,
    pub include: bool,
    pub cache: bool,
    pub cache_path: String,
    pub collapse: bool,
    pub strip_white: bool,
    /// Prefix for lines of printed output; empty disables prefixing.
    pub comment: String,
    /// Continue after evaluation errors instead of stopping.
    pub error: bool,
    pub warning: bool,
    pub message: bool,
    /// Include the chunk when tangling.
    pub purl: bool,
    pub fig_path: String,
    pub fig_width: Vec<f64>,
    pub fig_height: Vec<f64>,
    pub dev: Vec<String>,
    /// File extensions per device; empty entries fall back to the device name.
    pub fig_ext: Vec<String>,
    pub dpi: Vec<f64>,
    pub fig_show: FigShow,
    pub fig_cap: Option<String>,
    pub child: Vec<String>,
    pub ref_label: Vec<String>,
    /// Unrecognized options kept when unknown options are tolerated.
    pub extra: OptionLayer,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            label: String::new(),
            engine: "calc".into(),
            eval: EvalSelection::All,
            echo: true,
            results: ResultsMode::Markup,
            include: true,
            cache: false,
            cache_path: "cache/".into(),
            collapse: false,
            strip_white: true,
            comment: "##".into(),
            error: false,
            warning: true,
            message: true,
            purl: true,
            fig_path: "figure/".into(),
            fig_width: vec![7.0],
            fig_height: vec![7.0],
            dev: vec!["svg".into()],
            fig_ext: Vec::new(),
            dpi: vec![72.0],
            fig_show: FigShow::Asis,
            fig_cap: None,
            child: Vec::new(),
            ref_label: Vec::new(),
            extra: OptionLayer::new(),
        }
    }
}

impl ChunkOptions {
    /// Apply every entry of a layer, later layers overriding earlier ones.
    pub fn apply_layer(&mut self, layer: &OptionLayer, allow_unknown: bool) -> Result<(), String> {
        for (name, value) in layer {
            self.apply(name, value, allow_unknown)?;
        }
        Ok(())
    }

    /// Apply one option; the error message names the offending option.
    pub fn apply(
        &mut self,
        name: &str,
        value: &OptionValue,
        allow_unknown: bool,
    ) -> Result<(), String> {
        let name = canonical_name(name);
        match name.as_str() {
            "label" => self.label = string(&name, value)?,
            "engine" => self.engine = string(&name, value)?,
            "eval" => self.eval = eval_selection(value)?,
            "echo" => self.echo = boolean(&name, value)?,
            "results" => self.results = string(&name, value)?.parse()?,
            "include" => self.include = boolean(&name, value)?,
            "cache" => self.cache = boolean(&name, value)?,
            "cache.path" => self.cache_path = string(&name, value)?,
            "collapse" => self.collapse = boolean(&name, value)?,
            "strip.white" => self.strip_white = boolean(&name, value)?,
            "comment" => self.comment = optional_string(&name, value)?.unwrap_or_default(),
            "error" => self.error = boolean(&name, value)?,
            "warning" => self.warning = boolean(&name, value)?,
            "message" => self.message = boolean(&name, value)?,
            "purl" => self.purl = boolean(&name, value)?,
            "fig.path" => self.fig_path = string(&name, value)?,
            "fig.width" => self.fig_width = numbers(&name, value)?,
            "fig.height" => self.fig_height = numbers(&name, value)?,
            "dev" => self.dev = strings(&name, value)?,
            "fig.ext" => self.fig_ext = strings(&name, value)?,
            "dpi" => self.dpi = numbers(&name, value)?,
            "fig.show" => self.fig_show = string(&name, value)?.parse()?,
            "fig.cap" => self.fig_cap = optional_string(&name, value)?,
            "child" => self.child = strings(&name, value)?,
            "ref.label" => self.ref_label = strings(&name, value)?,
            _ if allow_unknown => {
                self.extra.insert(name, value.clone());
            }
            _ => return Err(format!("unknown option '{name}'")),
        }
        Ok(())
    }
}

fn boolean(name: &str, value: &OptionValue) -> Result<bool, String> {
    match value {
        OptionValue::Bool(b) => Ok(*b),
        other => Err(format!("{name} must be TRUE or FALSE (got {other})")),
    }
}

fn string(name: &str, value: &OptionValue) -> Result<String, String> {
    match value {
        OptionValue::Str(s) => Ok(s.clone()),
        other => Err(format!("{name} must be a string (got {other})")),
    }
}

fn optional_string(name: &str, value: &OptionValue) -> Result<Option<String>, String> {
    match value {
        OptionValue::Null => Ok(None),
        other => string(name, other).map(Some),
    }
}

fn numbers(name: &str, value: &OptionValue) -> Result<Vec<f64>, String> {
    let items = value.items();
    if items.is_empty() {
        return Err(format!("{name} must not be empty"));
    }
    items
        .into_iter()
        .map(|item| match item {
            OptionValue::Number(n) if *n > 0.0 => Ok(*n),
            other => Err(format!("{name} must be positive numbers (got {other})")),
        })
        .collect()
}

fn strings(name: &str, value: &OptionValue) -> Result<Vec<String>, String> {
    value
        .items()
        .into_iter()
        .map(|item| string(name, item))
        .collect()
}

fn eval_selection(value: &OptionValue) -> Result<EvalSelection, String> {
    match value {
        OptionValue::Bool(true) => Ok(EvalSelection::All),
        OptionValue::Bool(false) | OptionValue::Null => Ok(EvalSelection::Nothing),
        OptionValue::Number(_) | OptionValue::List(_) => {
            let lines = value
                .items()
                .into_iter()
                .map(|item| match item {
                    OptionValue::Number(n) if n.fract() == 0.0 && *n != 0.0 => Ok(*n as i64),
                    other => Err(format!("eval line numbers must be non-zero integers (got {other})")),
                })
                .collect::<Result<Vec<_>, _>>()?;
            let (neg, pos): (Vec<i64>, Vec<i64>) = lines.iter().partition(|l| **l < 0);
            if !neg.is_empty() && !pos.is_empty() {
                return Err("eval cannot mix included and excluded lines".into());
            }
            Ok(EvalSelection::Lines(lines))
        }
        other => Err(format!("eval must be TRUE, FALSE or line numbers (got {other})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(entries: &[(&str, OptionValue)]) -> OptionLayer {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn defaults_are_concrete() {
        let opts = ChunkOptions::default();
        assert!(opts.echo);
        assert_eq!(opts.results, ResultsMode::Markup);
        assert_eq!(opts.comment, "##");
        assert!(!opts.error);
        assert_eq!(opts.dev, vec!["svg".to_string()]);
    }

    #[test]
    fn apply_typed_values() {
        let mut opts = ChunkOptions::default();
        opts.apply_layer(
            &layer(&[
                ("echo", OptionValue::Bool(false)),
                ("results", OptionValue::Str("hold".into())),
                ("fig_width", OptionValue::List(vec![
                    OptionValue::Number(4.0),
                    OptionValue::Number(6.0),
                ])),
                ("fig.cap", OptionValue::Str("A plot".into())),
            ]),
            false,
        )
        .expect("apply");

        assert!(!opts.echo);
        assert_eq!(opts.results, ResultsMode::Hold);
        assert_eq!(opts.fig_width, vec![4.0, 6.0]);
        assert_eq!(opts.fig_cap.as_deref(), Some("A plot"));
    }

    #[test]
    fn apply_rejects_wrong_types_and_unknown_names() {
        let mut opts = ChunkOptions::default();
        let err = opts
            .apply("echo", &OptionValue::Str("yes".into()), false)
            .unwrap_err();
        assert!(err.contains("echo must be TRUE or FALSE"));

        let err = opts
            .apply("colour", &OptionValue::Bool(true), false)
            .unwrap_err();
        assert!(err.contains("unknown option 'colour'"));

        opts.apply("colour", &OptionValue::Bool(true), true)
            .expect("tolerated");
        assert_eq!(opts.extra.get("colour"), Some(&OptionValue::Bool(true)));
    }

    #[test]
    fn eval_line_selection() {
        let mut opts = ChunkOptions::default();
        opts.apply(
            "eval",
            &OptionValue::List(vec![OptionValue::Number(1.0), OptionValue::Number(3.0)]),
            false,
        )
        .expect("apply");
        assert!(opts.eval.includes(1));
        assert!(!opts.eval.includes(2));
        assert!(opts.eval.includes(3));

        opts.apply("eval", &OptionValue::Number(-2.0), false).expect("apply");
        assert!(opts.eval.includes(1));
        assert!(!opts.eval.includes(2));

        opts.apply("eval", &OptionValue::Bool(false), false).expect("apply");
        assert!(opts.eval.is_nothing());
    }

    #[test]
    fn option_value_literal_display() {
        let value = OptionValue::List(vec![
            OptionValue::Str("svg".into()),
            OptionValue::Number(2.5),
            OptionValue::Bool(true),
        ]);
        assert_eq!(value.to_string(), "c('svg', 2.5, TRUE)");
    }

    #[test]
    fn option_layer_from_toml() {
        let parsed: OptionLayer = toml::from_str(
            r##"
echo = false
"fig.width" = 6
dev = ["svg", "svg"]
comment = "#>"
"##,
        )
        .expect("parse");
        assert_eq!(parsed.get("echo"), Some(&OptionValue::Bool(false)));
        assert_eq!(parsed.get("fig.width"), Some(&OptionValue::Number(6.0)));
        assert_eq!(parsed.get("comment"), Some(&OptionValue::Str("#>".into())));
    }
}
