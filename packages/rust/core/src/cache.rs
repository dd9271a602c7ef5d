//! Chunk result cache keyed by label and fingerprint.
//!
//! Entries live in memory for the lifetime of the [`crate::Knitter`] and,
//! when a cache directory is configured, are also written as JSON files so
//! later processes can reuse them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use knitwork_shared::{ChunkOptions, KnitError, Result, ResultItem};

/// Cached results of one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub label: String,
    pub fingerprint: String,
    pub items: Vec<ResultItem>,
    /// Engine context entries the chunk added or changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Fingerprint of everything that invalidates a cached chunk.
///
/// Covers the engine name, the code text, and the options `eval`,
/// `fig.width`, `fig.height`, `dev`, `fig.ext`, `dpi`, `fig.path`, `error`.
pub fn fingerprint(engine: &str, code: &str, options: &ChunkOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(engine.as_bytes());
    hasher.update([0u8]);
    hasher.update(code.as_bytes());
    hasher.update([0u8]);
    let relevant = format!(
        "eval={:?};fig.width={:?};fig.height={:?};dev={:?};fig.ext={:?};dpi={:?};fig.path={:?};error={}",
        options.eval,
        options.fig_width,
        options.fig_height,
        options.dev,
        options.fig_ext,
        options.dpi,
        options.fig_path,
        options.error,
    );
    hasher.update(relevant.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Entries of `after` that differ from `before`.
///
/// Only object-shaped states can be diffed; anything else is kept whole.
pub fn state_delta(before: Option<&serde_json::Value>, after: serde_json::Value) -> serde_json::Value {
    match (before, after) {
        (Some(serde_json::Value::Object(before)), serde_json::Value::Object(after)) => {
            serde_json::Value::Object(
                after
                    .into_iter()
                    .filter(|(key, value)| before.get(key) != Some(value))
                    .collect(),
            )
        }
        (_, after) => after,
    }
}

#[derive(Debug, Default)]
pub struct ChunkCache {
    entries: HashMap<String, CacheEntry>,
    dir: Option<PathBuf>,
    hits: usize,
    misses: usize,
}

impl ChunkCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache that also persists entries below `dir`.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find an entry for `label` whose fingerprint matches.
    pub fn lookup(
        &mut self,
        label: &str,
        fingerprint: &str,
        cache_path: &str,
    ) -> Result<Option<CacheEntry>> {
        if let Some(entry) = self.entries.get(label) {
            if entry.fingerprint == fingerprint {
                self.hits += 1;
                return Ok(Some(entry.clone()));
            }
        }

        if let Some(path) = self.entry_path(label, fingerprint, cache_path) {
            if path.is_file() {
                let entry = read_entry(&path)?;
                if entry.fingerprint == fingerprint {
                    debug!(label, path = %path.display(), "loaded cache entry from disk");
                    self.hits += 1;
                    self.entries.insert(label.to_string(), entry.clone());
                    return Ok(Some(entry));
                }
            }
        }

        self.misses += 1;
        Ok(None)
    }

    /// Store an entry, replacing any older one for the same label.
    pub fn store(&mut self, entry: CacheEntry, cache_path: &str) -> Result<()> {
        if let Some(old) = self.entries.get(&entry.label) {
            if old.fingerprint != entry.fingerprint {
                if let Some(stale) = self.entry_path(&old.label, &old.fingerprint, cache_path) {
                    if let Err(e) = std::fs::remove_file(&stale) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %stale.display(), error = %e, "could not remove stale cache entry");
                        }
                    }
                }
            }
        }

        if let Some(path) = self.entry_path(&entry.label, &entry.fingerprint, cache_path) {
            write_entry(&path, &entry)?;
        }
        self.entries.insert(entry.label.clone(), entry);
        Ok(())
    }

    fn entry_path(&self, label: &str, fingerprint: &str, cache_path: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let prefix = &fingerprint[..fingerprint.len().min(16)];
        Some(
            dir.join(cache_path)
                .join(format!("{}_{prefix}.json", sanitize(label))),
        )
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn read_entry(path: &Path) -> Result<CacheEntry> {
    let content = std::fs::read_to_string(path).map_err(|e| KnitError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| KnitError::Cache(format!("invalid entry {}: {e}", path.display())))
}

fn write_entry(path: &Path, entry: &CacheEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| KnitError::io(parent, e))?;
    }
    let json = serde_json::to_string_pretty(entry)
        .map_err(|e| KnitError::Cache(format!("cannot serialize entry '{}': {e}", entry.label)))?;
    std::fs::write(path, json).map_err(|e| KnitError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use knitwork_shared::EvalSelection;

    #[test]
    fn delta_keeps_only_changed_entries() {
        let before = serde_json::json!({ "x": 3, "y": 1 });
        let after = serde_json::json!({ "x": 3, "y": 2, "z": true });
        assert_eq!(
            state_delta(Some(&before), after),
            serde_json::json!({ "y": 2, "z": true })
        );
        assert_eq!(
            state_delta(None, serde_json::json!([1, 2])),
            serde_json::json!([1, 2])
        );
    }

    fn entry(label: &str, fingerprint: &str) -> CacheEntry {
        CacheEntry {
            label: label.into(),
            fingerprint: fingerprint.into(),
            items: vec![ResultItem::source("x = 1"), ResultItem::text("1")],
            state: Some(serde_json::json!({ "x": 1 })),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fingerprint_tracks_relevant_options() {
        let base = ChunkOptions::default();
        let fp = fingerprint("calc", "x = 1", &base);
        assert_eq!(fp.len(), 64);
        assert_eq!(fp, fingerprint("calc", "x = 1", &base));

        let echo_off = ChunkOptions {
            echo: false,
            ..ChunkOptions::default()
        };
        assert_eq!(fp, fingerprint("calc", "x = 1", &echo_off));

        let partial = ChunkOptions {
            eval: EvalSelection::Lines(vec![1]),
            ..ChunkOptions::default()
        };
        assert_ne!(fp, fingerprint("calc", "x = 1", &partial));
        assert_ne!(fp, fingerprint("calc", "x = 2", &base));
        assert_ne!(fp, fingerprint("other", "x = 1", &base));
    }

    #[test]
    fn in_memory_hits_and_misses() {
        let mut cache = ChunkCache::in_memory();
        assert!(cache.lookup("a", "f1", "cache/").unwrap().is_none());
        cache.store(entry("a", "f1"), "cache/").unwrap();

        let hit = cache.lookup("a", "f1", "cache/").unwrap().unwrap();
        assert_eq!(hit.items.len(), 2);
        assert!(cache.lookup("a", "f2", "cache/").unwrap().is_none());
        assert_eq!((cache.hits(), cache.misses()), (1, 2));
    }

    #[test]
    fn persistent_entries_survive_a_new_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fp = "0123456789abcdef0123";
        {
            let mut cache = ChunkCache::persistent(dir.path());
            cache.store(entry("fit model", fp), "cache/").unwrap();
        }
        let file = dir.path().join("cache").join("fit_model_0123456789abcdef.json");
        assert!(file.is_file());

        let mut fresh = ChunkCache::persistent(dir.path());
        let hit = fresh.lookup("fit model", fp, "cache/").unwrap().unwrap();
        assert_eq!(hit.state, Some(serde_json::json!({ "x": 1 })));
        assert_eq!(fresh.hits(), 1);
    }

    #[test]
    fn replacing_an_entry_removes_the_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ChunkCache::persistent(dir.path());
        cache.store(entry("a", "aaaaaaaaaaaaaaaa1"), "c").unwrap();
        cache.store(entry("a", "bbbbbbbbbbbbbbbb2"), "c").unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path().join("c")).unwrap().collect();
        assert_eq!(files.len(), 1);
    }
}
