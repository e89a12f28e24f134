//! Content cache
//!
//! A flat `artist::song` index over the catalog. It is an accelerator only:
//! manifests are authoritative, a missing or corrupt cache file reads as
//! empty, and [`ContentCache::rebuild`] regenerates it from the manifests.

use crate::atomic::write_json_atomic;
use crate::error::Result;
use crate::manifest::ManifestStore;
use crate::types::{Manifest, PipelineStage, SongKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cache file name inside the catalog directory
pub const CACHE_FILE: &str = ".catalog_cache.json";

/// Attempts made by [`ContentCache::update_entry`] before giving up
const UPDATE_ATTEMPTS: usize = 3;

/// Compact analysis summary kept in the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub bpm: f64,
    /// Display key, e.g. `A minor`
    pub key: String,
    pub energy: f64,
    pub mood: String,
}

/// One cached song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// SHA-256 of the source audio
    #[serde(default)]
    pub source_hash: Option<String>,
    /// Source audio path as recorded in the manifest
    pub source_path: PathBuf,
    pub pipeline_stage: PipelineStage,
    #[serde(default)]
    pub analysis: Option<AnalysisSummary>,
    #[serde(default)]
    pub render_signature: Option<String>,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Summarize a manifest
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let analysis = match (manifest.analysis(), manifest.mood()) {
            (Some(a), Some(m)) => Some(AnalysisSummary {
                bpm: a.bpm,
                key: a.key_full.clone(),
                energy: a.energy,
                mood: m.name.clone(),
            }),
            _ => None,
        };

        Self {
            source_hash: manifest.source_hash.clone(),
            source_path: manifest.source_audio.clone(),
            pipeline_stage: manifest.stage(),
            analysis,
            render_signature: manifest.render_signature().map(str::to_string),
            cached_at: Utc::now(),
        }
    }

    /// Whether the cached hash no longer matches the current source hash
    pub fn is_stale(&self, current_hash: &str) -> bool {
        self.source_hash.as_deref() != Some(current_hash)
    }

    /// Equal ignoring `cached_at`
    fn same_content(&self, other: &CacheEntry) -> bool {
        self.source_hash == other.source_hash
            && self.source_path == other.source_path
            && self.pipeline_stage == other.pipeline_stage
            && self.analysis == other.analysis
            && self.render_signature == other.render_signature
    }
}

/// In-memory view of the cache file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl ContentCache {
    /// Cache file path for a catalog directory
    pub fn path_in(catalog_dir: &Path) -> PathBuf {
        catalog_dir.join(CACHE_FILE)
    }

    /// Load the cache; missing or unreadable files yield an empty cache
    pub fn load(path: &Path) -> Self {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache at {}, starting empty", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Cannot read cache {}: {}; starting empty", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(cache) => cache,
            Err(e) => {
                warn!("Corrupt cache {}: {}; starting empty", path.display(), e);
                Self::default()
            }
        }
    }

    /// Atomically write the cache
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, key: &SongKey) -> Option<&CacheEntry> {
        self.entries.get(&key.cache_key())
    }

    pub fn insert(&mut self, key: &SongKey, entry: CacheEntry) {
        self.entries.insert(key.cache_key(), entry);
    }

    pub fn remove(&mut self, key: &SongKey) -> Option<CacheEntry> {
        self.entries.remove(&key.cache_key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CacheEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Find the song whose cached source hash matches
    pub fn find_by_hash(&self, hash: &str) -> Option<SongKey> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.source_hash.as_deref() == Some(hash))
            .and_then(|(key, _)| SongKey::from_cache_key(key))
    }

    /// Read-modify-write of a single entry
    ///
    /// The file is re-read after writing; if another writer replaced the
    /// entry in between, the update is retried. After the last attempt the
    /// conflict is logged and the call still succeeds, since the cache is
    /// rebuildable.
    pub fn update_entry(path: &Path, key: &SongKey, entry: CacheEntry) -> Result<()> {
        for attempt in 1..=UPDATE_ATTEMPTS {
            let mut cache = Self::load(path);
            cache.insert(key, entry.clone());
            cache.save(path)?;

            let reread = Self::load(path);
            if reread.get(key).map(|e| e.same_content(&entry)).unwrap_or(false) {
                debug!("Cache entry {} updated (attempt {})", key.cache_key(), attempt);
                return Ok(());
            }
            warn!(
                "Cache entry {} was overwritten concurrently (attempt {}/{})",
                key.cache_key(),
                attempt,
                UPDATE_ATTEMPTS
            );
        }
        warn!("Giving up on cache entry {}; run `cache rebuild`", key.cache_key());
        Ok(())
    }

    /// Regenerate the whole cache from the manifests on disk
    pub fn rebuild(store: &ManifestStore) -> Result<Self> {
        let mut cache = Self::default();
        for key in store.list()? {
            match store.load(&key) {
                Ok(Some(manifest)) => cache.insert(&key, CacheEntry::from_manifest(&manifest)),
                Ok(None) => {}
                Err(e) => warn!("Skipping {} during cache rebuild: {}", key, e),
            }
        }
        info!("Rebuilt cache with {} entries", cache.len());
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &str, stage: PipelineStage) -> CacheEntry {
        CacheEntry {
            source_hash: Some(hash.to_string()),
            source_path: PathBuf::from("song.wav"),
            pipeline_stage: stage,
            analysis: None,
            render_signature: None,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_and_corrupt_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE);
        assert!(ContentCache::load(&path).is_empty());

        fs::write(&path, b"[1, 2,").unwrap();
        assert!(ContentCache::load(&path).is_empty());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE);
        let key = SongKey::new("artist", "song");

        let mut cache = ContentCache::default();
        cache.insert(&key, entry("abc", PipelineStage::Analyzed));
        cache.save(&path).unwrap();

        let loaded = ContentCache::load(&path);
        assert_eq!(loaded, cache);
        let raw: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("artist::song").is_some());
    }

    #[test]
    fn test_update_entry_preserves_others() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CACHE_FILE);
        let a = SongKey::new("a", "one");
        let b = SongKey::new("b", "two");

        ContentCache::update_entry(&path, &a, entry("h1", PipelineStage::Analyzed)).unwrap();
        ContentCache::update_entry(&path, &b, entry("h2", PipelineStage::Rendered)).unwrap();

        let cache = ContentCache::load(&path);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.find_by_hash("h2"), Some(b));
        assert!(cache.get(&a).unwrap().is_stale("other"));
        assert!(!cache.get(&a).unwrap().is_stale("h1"));
    }

    #[test]
    fn test_rebuild_from_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let key = SongKey::new("artist", "song");
        let mut manifest = Manifest::new(&key, "Song", "pop", "song.wav");
        manifest.source_hash = Some("feed".into());
        store.save(&manifest).unwrap();

        let cache = ContentCache::rebuild(&store).unwrap();
        let cached = cache.get(&key).unwrap();
        assert_eq!(cached.pipeline_stage, PipelineStage::Ingested);
        assert_eq!(cached.source_hash.as_deref(), Some("feed"));
        assert!(cached.analysis.is_none());
    }
}
