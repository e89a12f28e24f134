//! Manifest store and stage transitions
//!
//! The store is the only component that writes manifest files. Every other
//! stage works on a loaded copy and hands it back for an atomic save.

use crate::atomic::write_json_atomic;
use crate::error::{Error, Result};
use crate::types::{
    AnalysisBlock, CharacterAssignment, Manifest, MoodBlock, OutputRecord, PipelineStage, SongKey,
};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File name of the per-song manifest
pub const MANIFEST_FILE: &str = "manifest.json";

impl Manifest {
    fn transition(&mut self, target: PipelineStage) -> Result<()> {
        if !self.pipeline_stage.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.pipeline_stage.to_string(),
                to: target.to_string(),
            });
        }
        debug!("{}: {} -> {}", self.key(), self.pipeline_stage, target);
        self.pipeline_stage = target;
        Ok(())
    }

    /// Record a completed analysis run
    ///
    /// A rendered manifest stays rendered when `fresh_signature` equals the
    /// stored render signature; otherwise it is demoted to `analyzed`.
    pub fn apply_analysis(
        &mut self,
        analysis: AnalysisBlock,
        mood: MoodBlock,
        characters: CharacterAssignment,
        fresh_signature: &str,
    ) -> Result<()> {
        let unchanged = self.pipeline_stage == PipelineStage::Rendered
            && self.render_signature.as_deref() == Some(fresh_signature);
        let target = if unchanged {
            PipelineStage::Rendered
        } else {
            PipelineStage::Analyzed
        };
        self.transition(target)?;

        if !unchanged && !self.outputs.is_empty() {
            info!(
                "{}: render inputs changed, existing outputs are stale",
                self.key()
            );
        }

        self.analysis = Some(analysis);
        self.mood = Some(mood);
        self.characters = Some(characters);
        self.missing_assets.clear();
        self.analyzed_at = Some(Utc::now());
        Ok(())
    }

    /// Record a preflight failure
    pub fn abort_preflight(&mut self, missing: Vec<PathBuf>) -> Result<()> {
        self.transition(PipelineStage::AbortedPreflight)?;
        self.missing_assets = missing;
        Ok(())
    }

    /// Return an aborted manifest to `analyzed` once its assets exist again
    pub fn recover_from_preflight(&mut self) -> Result<()> {
        if self.pipeline_stage != PipelineStage::AbortedPreflight {
            return Ok(());
        }
        self.transition(PipelineStage::Analyzed)?;
        self.missing_assets.clear();
        Ok(())
    }

    /// Record a successful render
    pub fn mark_rendered(
        &mut self,
        signature: &str,
        output_name: &str,
        output: OutputRecord,
    ) -> Result<()> {
        self.transition(PipelineStage::Rendered)?;
        self.outputs.insert(output_name.to_string(), output);
        self.render_signature = Some(signature.to_string());
        self.rendered_at = Some(Utc::now());
        Ok(())
    }
}

/// Reads and writes `catalog/<artist>/<song>/manifest.json`
#[derive(Debug, Clone)]
pub struct ManifestStore {
    catalog_dir: PathBuf,
}

impl ManifestStore {
    /// Create a store rooted at the catalog directory
    pub fn new(catalog_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog_dir: catalog_dir.into(),
        }
    }

    pub fn catalog_dir(&self) -> &Path {
        &self.catalog_dir
    }

    /// Directory holding a song's manifest, audio and outputs
    pub fn song_dir(&self, key: &SongKey) -> PathBuf {
        self.catalog_dir.join(&key.artist).join(&key.song_id)
    }

    pub fn manifest_path(&self, key: &SongKey) -> PathBuf {
        self.song_dir(key).join(MANIFEST_FILE)
    }

    /// Load a manifest; `Ok(None)` means the song was never ingested
    pub fn load(&self, key: &SongKey) -> Result<Option<Manifest>> {
        let path = self.manifest_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest =
            serde_json::from_slice(&bytes).map_err(|e| Error::ManifestParse {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if manifest.key() != *key {
            warn!(
                "Manifest at {} names {} instead of {}",
                path.display(),
                manifest.key(),
                key
            );
        }
        Ok(Some(manifest))
    }

    /// Load a manifest that must exist
    pub fn load_required(&self, key: &SongKey) -> Result<Manifest> {
        self.load(key)?.ok_or_else(|| Error::ManifestNotFound {
            song: key.to_string(),
            path: self.manifest_path(key),
        })
    }

    /// Atomically persist a manifest under its own key
    pub fn save(&self, manifest: &Manifest) -> Result<PathBuf> {
        let path = self.manifest_path(&manifest.key());
        write_json_atomic(&path, manifest)?;
        debug!("Saved manifest {} ({})", path.display(), manifest.stage());
        Ok(path)
    }

    /// Every song with a manifest on disk, sorted by artist then song
    pub fn list(&self) -> Result<Vec<SongKey>> {
        let mut keys = Vec::new();
        if !self.catalog_dir.is_dir() {
            return Ok(keys);
        }

        for artist in fs::read_dir(&self.catalog_dir)? {
            let artist = artist?;
            if !artist.file_type()?.is_dir() {
                continue;
            }
            for song in fs::read_dir(artist.path())? {
                let song = song?;
                if song.path().join(MANIFEST_FILE).is_file() {
                    keys.push(SongKey::new(
                        artist.file_name().to_string_lossy(),
                        song.file_name().to_string_lossy(),
                    ));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssignmentSource, KeyMode};
    use std::collections::BTreeMap;

    fn sample_analysis() -> AnalysisBlock {
        AnalysisBlock {
            bpm: 120.0,
            beat_count: 4,
            beat_times: vec![0.5, 1.0, 1.5, 2.0],
            beats_per_second: 2.0,
            key: "C".into(),
            mode: KeyMode::Major,
            key_full: "C major".into(),
            key_confidence: 0.4,
            mode_confidence: 0.3,
            energy: 0.5,
            rms_mean: 0.075,
            rms_max: 0.2,
            spectral_centroid_mean: 1800.0,
            energy_curve: vec![0.1, 0.2, 0.3],
            duration_seconds: 2.0,
            segments: vec![],
            analyzer_version: "test".into(),
        }
    }

    fn sample_mood() -> MoodBlock {
        MoodBlock {
            name: "chill".into(),
            rule: None,
            fallback_used: true,
            safety_valve_triggered: false,
            safety_valve_reason: None,
        }
    }

    fn sample_characters() -> CharacterAssignment {
        CharacterAssignment {
            source: AssignmentSource::MoodMap,
            mood_used: "chill".into(),
            poses: BTreeMap::new(),
        }
    }

    fn sample_output() -> OutputRecord {
        OutputRecord {
            path: "catalog/a/s/master.mp4".into(),
            format: "mp4".into(),
            resolution: "1920x1080".into(),
            size_bytes: 10,
            render_time_seconds: 1.0,
            render_version: "rv1-000000000000".into(),
        }
    }

    fn analyzed() -> Manifest {
        let mut m = Manifest::new(&SongKey::new("a", "s"), "S", "pop", "s.wav");
        m.apply_analysis(sample_analysis(), sample_mood(), sample_characters(), "rv1-aaaaaaaaaaaa")
            .unwrap();
        m
    }

    #[test]
    fn test_analysis_advances_stage() {
        let m = analyzed();
        assert_eq!(m.stage(), PipelineStage::Analyzed);
        assert!(m.analysis().is_some());
        assert!(m.analyzed_at().is_some());
    }

    #[test]
    fn test_reanalysis_same_signature_keeps_rendered() {
        let mut m = analyzed();
        m.mark_rendered("rv1-aaaaaaaaaaaa", "master", sample_output()).unwrap();
        m.apply_analysis(sample_analysis(), sample_mood(), sample_characters(), "rv1-aaaaaaaaaaaa")
            .unwrap();
        assert_eq!(m.stage(), PipelineStage::Rendered);
    }

    #[test]
    fn test_reanalysis_new_signature_demotes() {
        let mut m = analyzed();
        m.mark_rendered("rv1-aaaaaaaaaaaa", "master", sample_output()).unwrap();
        m.apply_analysis(sample_analysis(), sample_mood(), sample_characters(), "rv1-bbbbbbbbbbbb")
            .unwrap();
        assert_eq!(m.stage(), PipelineStage::Analyzed);
    }

    #[test]
    fn test_ingested_cannot_render() {
        let mut m = Manifest::new(&SongKey::new("a", "s"), "S", "pop", "s.wav");
        let err = m.mark_rendered("rv1-aaaaaaaaaaaa", "master", sample_output()).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        assert_eq!(m.stage(), PipelineStage::Ingested);
        assert!(m.outputs().is_empty());
    }

    #[test]
    fn test_preflight_abort_and_recover() {
        let mut m = analyzed();
        m.abort_preflight(vec!["assets/x.png".into()]).unwrap();
        assert_eq!(m.stage(), PipelineStage::AbortedPreflight);
        assert_eq!(m.missing_assets().len(), 1);
        assert!(m.mark_rendered("rv1-aaaaaaaaaaaa", "master", sample_output()).is_err());

        m.recover_from_preflight().unwrap();
        assert_eq!(m.stage(), PipelineStage::Analyzed);
        assert!(m.missing_assets().is_empty());
    }

    #[test]
    fn test_store_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path().join("catalog"));
        let key = SongKey::new("a", "s");

        assert!(store.load(&key).unwrap().is_none());
        assert!(matches!(
            store.load_required(&key),
            Err(Error::ManifestNotFound { .. })
        ));

        let m = analyzed();
        store.save(&m).unwrap();
        let loaded = store.load(&key).unwrap().unwrap();
        assert_eq!(loaded, m);
        assert_eq!(store.list().unwrap(), vec![key]);
    }

    #[test]
    fn test_store_rejects_corrupt_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let key = SongKey::new("a", "s");
        fs::create_dir_all(store.song_dir(&key)).unwrap();
        fs::write(store.manifest_path(&key), b"{ not json").unwrap();
        assert!(matches!(store.load(&key), Err(Error::ManifestParse { .. })));
    }
}
