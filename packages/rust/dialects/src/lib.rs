//! Document dialects: how chunks are delimited, and how output is marked up.

mod builder;
pub mod hooks;
pub mod markdown;
pub mod noweb;
pub mod script;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use knitwork_shared::{KnitError, Result, Segment};

pub use hooks::{Hooks, PlotInfo, ensure_newline};
pub use markdown::MarkdownHooks;
pub use noweb::LatexHooks;

/// A source document syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Markdown,
    Noweb,
    Script,
}

static MARKDOWN_HOOKS: MarkdownHooks = MarkdownHooks;
static LATEX_HOOKS: LatexHooks = LatexHooks;

impl Dialect {
    pub fn name(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Noweb => "noweb",
            Self::Script => "script",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "md" | "markdown" | "rmd" | "kmd" => Some(Self::Markdown),
            "rnw" | "snw" | "knw" => Some(Self::Noweb),
            "calc" | "r" => Some(Self::Script),
            _ => None,
        }
    }

    /// Guess the dialect from the first recognizable chunk marker.
    pub fn sniff(text: &str) -> Option<Self> {
        use std::sync::LazyLock;

        use regex::Regex;

        static MARKERS: LazyLock<[(Dialect, Regex); 3]> = LazyLock::new(|| {
            [
                (
                    Dialect::Markdown,
                    Regex::new(r"(?m)^[\t >]*`{3,}\s*\{[A-Za-z0-9_]+.*\}\s*$").expect("valid regex"),
                ),
                (
                    Dialect::Noweb,
                    Regex::new(r"(?m)^\s*<<.*>>=").expect("valid regex"),
                ),
                (
                    Dialect::Script,
                    Regex::new(r"(?m)^(?:##|////|%%)\s*-{4,}").expect("valid regex"),
                ),
            ]
        });

        MARKERS
            .iter()
            .filter_map(|(dialect, re)| re.find(text).map(|m| (m.start(), *dialect)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, dialect)| dialect)
    }

    /// Detect from the file extension, falling back to content sniffing.
    ///
    /// Literal text without chunk markers is Markdown. A file without
    /// markers and without a known extension cannot be resolved.
    pub fn detect(path: Option<&Path>, text: &str) -> Result<Self> {
        let by_ext = path
            .and_then(|p| p.extension())
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension);
        if let Some(dialect) = by_ext {
            debug!(dialect = dialect.name(), "dialect from extension");
            return Ok(dialect);
        }
        if let Some(dialect) = Self::sniff(text) {
            debug!(dialect = dialect.name(), "dialect from content");
            return Ok(dialect);
        }
        match path {
            Some(path) if !text.trim().is_empty() => Err(KnitError::UnresolvedPattern {
                input: path.display().to_string(),
            }),
            _ => Ok(Self::Markdown),
        }
    }

    /// Split a document into ordered prose and code segments.
    pub fn split(self, text: &str, inline_engines: &[&str]) -> Vec<Segment> {
        match self {
            Self::Markdown => markdown::split(text, inline_engines),
            Self::Noweb => noweb::split(text),
            Self::Script => script::split(text),
        }
    }

    pub fn hooks(self) -> &'static dyn Hooks {
        match self {
            Self::Markdown | Self::Script => &MARKDOWN_HOOKS,
            Self::Noweb => &LATEX_HOOKS,
        }
    }

    /// Extension of woven output.
    pub fn output_extension(self) -> &'static str {
        match self {
            Self::Markdown | Self::Script => "md",
            Self::Noweb => "tex",
        }
    }

    /// Remove a leading front-matter block, if the dialect has one.
    pub fn strip_front_matter(self, text: &str) -> &str {
        match self {
            Self::Markdown => markdown::split_front_matter(text).map_or(text, |(_, rest)| rest),
            Self::Noweb | Self::Script => text,
        }
    }

    pub fn has_front_matter(self, text: &str) -> bool {
        self == Self::Markdown && markdown::split_front_matter(text).is_some()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = KnitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Self::Markdown),
            "noweb" | "rnw" | "latex" => Ok(Self::Noweb),
            "script" => Ok(Self::Script),
            other => Err(KnitError::config(format!("unknown dialect '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_by_extension_first() {
        let text = "<<a>>=\n1\n@\n";
        assert_eq!(
            Dialect::detect(Some(Path::new("doc.md")), text).unwrap(),
            Dialect::Markdown
        );
        assert_eq!(
            Dialect::detect(Some(Path::new("doc.Rnw")), "").unwrap(),
            Dialect::Noweb
        );
    }

    #[test]
    fn sniff_picks_earliest_marker() {
        let text = "intro\n<<a>>=\n1\n@\n```{calc}\n2\n```\n";
        assert_eq!(Dialect::sniff(text), Some(Dialect::Noweb));
        assert_eq!(Dialect::sniff("## ----\nx = 1\n"), Some(Dialect::Script));
        assert_eq!(Dialect::sniff("plain text\n"), None);
    }

    #[test]
    fn unresolved_pattern_for_unknown_text() {
        let err = Dialect::detect(Some(Path::new("notes.txt")), "just words\n").unwrap_err();
        assert!(matches!(err, KnitError::UnresolvedPattern { .. }));
    }

    #[test]
    fn literal_text_without_markers_is_markdown() {
        assert_eq!(Dialect::detect(None, "just words\n").unwrap(), Dialect::Markdown);
        assert_eq!(
            Dialect::detect(Some(Path::new("notes.txt")), "").unwrap(),
            Dialect::Markdown
        );
    }

    #[test]
    fn front_matter_only_for_markdown() {
        let doc = "---\ntitle: x\n---\nBody\n";
        assert!(Dialect::Markdown.has_front_matter(doc));
        assert_eq!(Dialect::Markdown.strip_front_matter(doc), "Body\n");
        assert_eq!(Dialect::Noweb.strip_front_matter(doc), doc);
    }

    #[test]
    fn parse_dialect_names() {
        assert_eq!("Noweb".parse::<Dialect>().unwrap(), Dialect::Noweb);
        assert!("html".parse::<Dialect>().is_err());
    }
}
