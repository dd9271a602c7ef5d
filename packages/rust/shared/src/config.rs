//! Application configuration for Knitwork.
//!
//! User config lives at `~/.knitwork/knitwork.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunk::OptionLayer;
use crate::error::{KnitError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "knitwork.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".knitwork";

// ---------------------------------------------------------------------------
// Config structs (matching knitwork.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Knitting behaviour.
    #[serde(default)]
    pub knit: KnitSection,

    /// Tangle output.
    #[serde(default)]
    pub tangle: TangleSection,

    /// Global chunk option defaults (option name → literal).
    #[serde(default)]
    pub chunk: OptionLayer,
}

/// `[knit]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnitSection {
    /// Engine for chunks whose header names none.
    #[serde(default = "default_engine")]
    pub default_engine: String,

    /// Keep unrecognized chunk options instead of failing.
    #[serde(default)]
    pub allow_unknown_options: bool,

    /// Switch into the input document's directory while knitting.
    #[serde(default)]
    pub change_dir: bool,

    /// Write a line concordance next to the output.
    #[serde(default)]
    pub concordance: bool,

    /// Root directory for on-disk chunk caches, relative to the output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

impl Default for KnitSection {
    fn default() -> Self {
        Self {
            default_engine: default_engine(),
            allow_unknown_options: false,
            change_dir: false,
            concordance: false,
            cache_dir: None,
        }
    }
}

fn default_engine() -> String {
    "calc".into()
}

/// `[tangle]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TangleSection {
    /// 0 = code only, 1 = chunk headers, 2 = headers and prose.
    #[serde(default = "default_documentation")]
    pub documentation: u8,
}

impl Default for TangleSection {
    fn default() -> Self {
        Self {
            documentation: default_documentation(),
        }
    }
}

fn default_documentation() -> u8 {
    1
}

// ---------------------------------------------------------------------------
// Knit config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime knit configuration, merged from the config file and CLI flags.
#[derive(Debug, Clone)]
pub struct KnitConfig {
    /// Engine for chunks whose header names none.
    pub default_engine: String,
    /// Keep unrecognized chunk options instead of failing.
    pub allow_unknown_options: bool,
    /// Switch into the input document's directory while knitting.
    pub change_dir: bool,
    /// Record and write a line concordance.
    pub concordance: bool,
    /// On-disk cache root; `None` keeps the cache in memory only.
    pub cache_dir: Option<PathBuf>,
    /// Tangle documentation level.
    pub documentation: u8,
    /// Global chunk option defaults.
    pub chunk_defaults: OptionLayer,
}

impl Default for KnitConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for KnitConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_engine: config.knit.default_engine.clone(),
            allow_unknown_options: config.knit.allow_unknown_options,
            change_dir: config.knit.change_dir,
            concordance: config.knit.concordance,
            cache_dir: config.knit.cache_dir.as_ref().map(PathBuf::from),
            documentation: config.tangle.documentation,
            chunk_defaults: config.chunk.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.knitwork/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| KnitError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.knitwork/knitwork.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KnitError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| KnitError::config(format!("failed to parse {}: {e}", path.display())))?;

    validate(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KnitError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KnitError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KnitError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject values the pipeline cannot honour.
pub fn validate(config: &AppConfig) -> Result<()> {
    if config.tangle.documentation > 2 {
        return Err(KnitError::config(format!(
            "tangle.documentation must be 0, 1 or 2 (got {})",
            config.tangle.documentation
        )));
    }
    if config.knit.default_engine.trim().is_empty() {
        return Err(KnitError::config("knit.default_engine must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::OptionValue;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("default_engine"));
        assert!(toml_str.contains("documentation"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.tangle.documentation, 1);
        assert_eq!(parsed.knit.default_engine, "calc");
    }

    #[test]
    fn config_with_chunk_defaults() {
        let toml_str = r#"
[knit]
concordance = true
cache_dir = ".knitwork-cache"

[chunk]
echo = false
"fig.width" = 5
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert!(config.knit.concordance);
        assert_eq!(config.chunk.get("echo"), Some(&OptionValue::Bool(false)));

        let knit = KnitConfig::from(&config);
        assert_eq!(knit.cache_dir, Some(PathBuf::from(".knitwork-cache")));
        assert_eq!(knit.chunk_defaults.len(), 2);
    }

    #[test]
    fn invalid_documentation_level() {
        let mut config = AppConfig::default();
        config.tangle.documentation = 3;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("tangle.documentation"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("knitwork.toml");
        std::fs::write(&path, "[tangle]\ndocumentation = 2\n").expect("write");

        let config = load_config_from(&path).expect("load");
        assert_eq!(config.tangle.documentation, 2);

        let missing = load_config_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, KnitError::Io { .. }));
    }
}
