//! Persisted analysis results
//!
//! A JSON map from track path to [`AnalysisResult`] in
//! `$AUTOMIX_HOME/cache/analysis.json`. Failed results are stored too, so a
//! track that cannot be analyzed is not retried on every run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use automix_core::analysis::AnalysisResult;

pub struct AnalysisCache {
    path: PathBuf,
    entries: BTreeMap<PathBuf, AnalysisResult>,
}

impl AnalysisCache {
    /// Cache file location under the automix home
    pub fn default_path(home: &Path) -> PathBuf {
        home.join("cache").join("analysis.json")
    }

    /// Load the cache at `path`
    ///
    /// A missing file gives an empty cache. An unreadable one is logged and
    /// replaced on the next save.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("AnalysisCache::load: discarding invalid cache {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!("AnalysisCache::load: cannot read {:?}: {}", path, e);
                BTreeMap::new()
            }
        };
        log::info!("AnalysisCache::load: {} entries from {:?}", entries.len(), path);
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, track: &Path) -> Option<&AnalysisResult> {
        self.entries.get(track)
    }

    pub fn insert(&mut self, track: PathBuf, result: AnalysisResult) {
        self.entries.insert(track, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize analysis cache")?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write analysis cache: {:?}", self.path))?;
        log::info!("AnalysisCache::save: {} entries to {:?}", self.entries.len(), self.path);
        Ok(())
    }
}
