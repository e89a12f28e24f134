//! Shared pipeline types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Identifies one song in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SongKey {
    /// Artist directory name
    pub artist: String,
    /// Song directory name
    pub song_id: String,
}

impl SongKey {
    /// Create a new song key
    pub fn new(artist: impl Into<String>, song_id: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            song_id: song_id.into(),
        }
    }

    /// Key used by the content cache
    pub fn cache_key(&self) -> String {
        format!("{}::{}", self.artist, self.song_id)
    }

    /// Parse a cache key back into a song key
    pub fn from_cache_key(key: &str) -> Option<Self> {
        let (artist, song_id) = key.split_once("::")?;
        if artist.is_empty() || song_id.is_empty() {
            return None;
        }
        Some(Self::new(artist, song_id))
    }
}

impl std::fmt::Display for SongKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.artist, self.song_id)
    }
}

/// Pipeline stage recorded in each manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Audio imported, nothing analyzed yet
    #[serde(rename = "ingested")]
    Ingested,
    /// Analysis, mood and characters populated
    #[serde(rename = "analyzed")]
    Analyzed,
    /// Master video rendered for the stored signature
    #[serde(rename = "rendered")]
    Rendered,
    /// Render refused because referenced assets are missing
    #[serde(rename = "ABORTED_PREFLIGHT")]
    AbortedPreflight,
}

impl PipelineStage {
    /// Check if transition to target stage is valid
    pub fn can_transition_to(&self, target: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, target),
            // From Ingested
            (Ingested, Analyzed) |
            // From Analyzed
            (Analyzed, Analyzed) | (Analyzed, Rendered) | (Analyzed, AbortedPreflight) |
            // From Rendered
            (Rendered, Analyzed) | (Rendered, Rendered) | (Rendered, AbortedPreflight) |
            // From AbortedPreflight
            (AbortedPreflight, Analyzed) | (AbortedPreflight, AbortedPreflight)
        )
    }

    /// Whether a manifest in this stage carries enough data to render
    pub fn is_renderable(&self) -> bool {
        !matches!(self, PipelineStage::Ingested)
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Ingested => write!(f, "ingested"),
            PipelineStage::Analyzed => write!(f, "analyzed"),
            PipelineStage::Rendered => write!(f, "rendered"),
            PipelineStage::AbortedPreflight => write!(f, "ABORTED_PREFLIGHT"),
        }
    }
}

/// Musical mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    Major,
    Minor,
}

impl std::fmt::Display for KeyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyMode::Major => write!(f, "major"),
            KeyMode::Minor => write!(f, "minor"),
        }
    }
}

/// A labelled structural section of a song
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Section label (`intro`, `section_1`, ...)
    pub label: String,
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds
    pub end: f64,
}

/// Acoustic analysis stored in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisBlock {
    /// Estimated tempo, one decimal
    pub bpm: f64,
    /// Number of detected beats
    pub beat_count: usize,
    /// Beat timestamps in seconds, strictly increasing
    pub beat_times: Vec<f64>,
    /// Beats per second over the whole track
    pub beats_per_second: f64,
    /// Tonic pitch class name (`C`, `C#`, ...)
    pub key: String,
    /// Major or minor
    pub mode: KeyMode,
    /// Display form, e.g. `A minor`
    pub key_full: String,
    /// Margin of the best key over the mean correlation, 0..=1
    pub key_confidence: f64,
    /// Margin between best major and best minor correlation, 0..=1
    pub mode_confidence: f64,
    /// Normalized loudness, 0..=1
    pub energy: f64,
    /// Mean frame RMS
    pub rms_mean: f64,
    /// Peak frame RMS
    pub rms_max: f64,
    /// Mean spectral centroid in Hz
    pub spectral_centroid_mean: f64,
    /// Downsampled RMS envelope (at most 100 points)
    pub energy_curve: Vec<f64>,
    /// Track duration in seconds
    pub duration_seconds: f64,
    /// Best-effort structural segments
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// Version of the analyzer that produced this block
    pub analyzer_version: String,
}

/// Mood inference result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodBlock {
    /// Resolved mood name
    pub name: String,
    /// Description of the rule that matched, if any
    pub rule: Option<String>,
    /// No rule matched and the configured fallback was used
    pub fallback_used: bool,
    /// Low analysis confidence forced the genre default
    pub safety_valve_triggered: bool,
    /// Which confidence failed and against which threshold
    pub safety_valve_reason: Option<String>,
}

/// Where a character assignment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    MoodMap,
    GenreDefaults,
}

/// Pose chosen for one character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterPose {
    /// Pose image path relative to `assets/characters/`
    pub pose: PathBuf,
    /// Animation tag
    pub animation: String,
    /// Scale factor
    pub scale: f64,
}

/// Per-character pose assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterAssignment {
    pub source: AssignmentSource,
    /// Mood the assignment was derived from
    pub mood_used: String,
    /// Character name -> pose
    pub poses: BTreeMap<String, CharacterPose>,
}

/// A rendered output recorded in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Output file path relative to the project root
    pub path: PathBuf,
    /// Container format
    pub format: String,
    /// `WIDTHxHEIGHT`
    pub resolution: String,
    /// File size in bytes
    pub size_bytes: u64,
    /// Wall-clock render time
    pub render_time_seconds: f64,
    /// Render signature the output was produced for
    pub render_version: String,
}

/// Durable per-song record
///
/// Stage-coupled fields are only mutated through the transition methods in
/// [`crate::manifest`], so a loaded manifest can never hold a stage that
/// disagrees with its analysis or outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub artist: String,
    pub song_id: String,
    pub title: String,
    pub genre: String,
    /// Source audio, relative to the song directory unless absolute
    pub source_audio: PathBuf,
    /// SHA-256 of the source audio at ingestion
    #[serde(default)]
    pub source_hash: Option<String>,
    pub(crate) pipeline_stage: PipelineStage,
    #[serde(default)]
    pub(crate) analysis: Option<AnalysisBlock>,
    #[serde(default)]
    pub(crate) mood: Option<MoodBlock>,
    #[serde(default)]
    pub(crate) characters: Option<CharacterAssignment>,
    #[serde(default)]
    pub(crate) outputs: BTreeMap<String, OutputRecord>,
    #[serde(default)]
    pub(crate) render_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) missing_assets: Vec<PathBuf>,
    /// Background image relative to the project root
    #[serde(default)]
    pub background_image: Option<PathBuf>,
    /// Free-form notes; never affects rendering
    #[serde(default)]
    pub notes: Option<String>,
    pub ingested_at: DateTime<Utc>,
    #[serde(default)]
    pub(crate) analyzed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub(crate) rendered_at: Option<DateTime<Utc>>,
}

impl Manifest {
    /// Create a freshly ingested manifest
    pub fn new(
        key: &SongKey,
        title: impl Into<String>,
        genre: impl Into<String>,
        source_audio: impl Into<PathBuf>,
    ) -> Self {
        Self {
            artist: key.artist.clone(),
            song_id: key.song_id.clone(),
            title: title.into(),
            genre: genre.into(),
            source_audio: source_audio.into(),
            source_hash: None,
            pipeline_stage: PipelineStage::Ingested,
            analysis: None,
            mood: None,
            characters: None,
            outputs: BTreeMap::new(),
            render_signature: None,
            missing_assets: Vec::new(),
            background_image: None,
            notes: None,
            ingested_at: Utc::now(),
            analyzed_at: None,
            rendered_at: None,
        }
    }

    /// Catalog key of this manifest
    pub fn key(&self) -> SongKey {
        SongKey::new(&self.artist, &self.song_id)
    }

    pub fn stage(&self) -> PipelineStage {
        self.pipeline_stage
    }

    pub fn analysis(&self) -> Option<&AnalysisBlock> {
        self.analysis.as_ref()
    }

    pub fn mood(&self) -> Option<&MoodBlock> {
        self.mood.as_ref()
    }

    pub fn characters(&self) -> Option<&CharacterAssignment> {
        self.characters.as_ref()
    }

    pub fn outputs(&self) -> &BTreeMap<String, OutputRecord> {
        &self.outputs
    }

    pub fn render_signature(&self) -> Option<&str> {
        self.render_signature.as_deref()
    }

    /// Assets reported missing by the last failed preflight
    pub fn missing_assets(&self) -> &[PathBuf] {
        &self.missing_assets
    }

    pub fn analyzed_at(&self) -> Option<DateTime<Utc>> {
        self.analyzed_at
    }

    pub fn rendered_at(&self) -> Option<DateTime<Utc>> {
        self.rendered_at
    }

    /// Absolute path of the source audio given the song directory
    pub fn resolve_audio(&self, song_dir: &Path) -> PathBuf {
        song_dir.join(&self.source_audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        use PipelineStage::*;
        assert!(Ingested.can_transition_to(Analyzed));
        assert!(Analyzed.can_transition_to(Rendered));
        assert!(Rendered.can_transition_to(Analyzed));
        assert!(AbortedPreflight.can_transition_to(Analyzed));

        assert!(!Ingested.can_transition_to(Rendered));
        assert!(!Ingested.can_transition_to(AbortedPreflight));
        assert!(!AbortedPreflight.can_transition_to(Rendered));
        assert!(!Rendered.can_transition_to(Ingested));
        assert!(!Analyzed.can_transition_to(Ingested));
    }

    #[test]
    fn test_stage_serialization() {
        let json = serde_json::to_string(&PipelineStage::AbortedPreflight).unwrap();
        assert_eq!(json, "\"ABORTED_PREFLIGHT\"");
        let stage: PipelineStage = serde_json::from_str("\"analyzed\"").unwrap();
        assert_eq!(stage, PipelineStage::Analyzed);
        assert_eq!(PipelineStage::Rendered.to_string(), "rendered");
    }

    #[test]
    fn test_cache_key_round_trip() {
        let key = SongKey::new("mc_fluff", "bubble_song");
        assert_eq!(key.cache_key(), "mc_fluff::bubble_song");
        assert_eq!(SongKey::from_cache_key("mc_fluff::bubble_song"), Some(key));
        assert_eq!(SongKey::from_cache_key("no-separator"), None);
        assert_eq!(SongKey::from_cache_key("::song"), None);
    }

    #[test]
    fn test_new_manifest_is_ingested() {
        let key = SongKey::new("artist", "song");
        let manifest = Manifest::new(&key, "Song", "reggae", "song.wav");
        assert_eq!(manifest.stage(), PipelineStage::Ingested);
        assert!(manifest.analysis().is_none());
        assert!(manifest.outputs().is_empty());
        assert_eq!(manifest.key(), key);
        assert_eq!(
            manifest.resolve_audio(Path::new("/catalog/artist/song")),
            PathBuf::from("/catalog/artist/song/song.wav")
        );
    }
}
