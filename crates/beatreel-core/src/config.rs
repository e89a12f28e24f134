//! Configuration files under `data/`
//!
//! Every file is optional. A missing, malformed or invalid file is logged
//! and replaced by the built-in defaults so a catalog can always be
//! processed.

use crate::condition::ConditionSpec;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Mood rules file
pub const MOOD_MAP_FILE: &str = "mood_map.json";
/// Genre defaults file
pub const GENRE_DEFAULTS_FILE: &str = "genre_defaults.json";
/// Render recipe file
pub const RECIPE_FILE: &str = "baseline_recipe.json";
/// Pipeline settings file
pub const PIPELINE_FILE: &str = "pipeline.json";

/// Implemented by every config document
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Load a JSON config file, degrading to `T::default()`
pub fn load_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default + Validate,
{
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            return T::default();
        }
        Err(e) => {
            warn!("Cannot read {}: {}; using defaults", path.display(), e);
            return T::default();
        }
    };

    let parsed: T = match serde_json::from_slice(&bytes) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Malformed {}: {}; using defaults", path.display(), e);
            return T::default();
        }
    };

    match parsed.validate() {
        Ok(()) => parsed,
        Err(e) => {
            warn!("{} rejected: {}; using defaults", path.display(), e);
            T::default()
        }
    }
}

fn check_unit(name: &str, v: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&v) {
        return Err(Error::InvalidConfig(format!("{} must be within 0..=1, got {}", name, v)));
    }
    Ok(())
}

fn check_positive(name: &str, v: f64) -> Result<()> {
    if !(v.is_finite() && v > 0.0) {
        return Err(Error::InvalidConfig(format!("{} must be positive, got {}", name, v)));
    }
    Ok(())
}

// ============================================================================
// Mood map
// ============================================================================

/// One mood rule as written in `mood_map.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodRuleConfig {
    pub mood: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: ConditionSpec,
}

/// Confidence thresholds for the safety valve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyValveConfig {
    pub key_confidence_threshold: f64,
    pub mode_confidence_threshold: f64,
}

impl Default for SafetyValveConfig {
    fn default() -> Self {
        Self {
            key_confidence_threshold: 0.15,
            mode_confidence_threshold: 0.10,
        }
    }
}

/// Cut points for the energy level category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyLevels {
    pub high: f64,
    pub medium: f64,
}

impl Default for EnergyLevels {
    fn default() -> Self {
        Self { high: 0.8, medium: 0.5 }
    }
}

/// Per-character dynamics for one mood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterDynamics {
    #[serde(default = "default_pose_folder")]
    pub pose_folder: String,
    #[serde(default = "default_animation")]
    pub animation: String,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_pose_folder() -> String {
    "neutral".to_string()
}

fn default_animation() -> String {
    "gentle_breathe".to_string()
}

fn default_scale() -> f64 {
    1.0
}

impl CharacterDynamics {
    pub fn new(pose_folder: &str, animation: &str, scale: f64) -> Self {
        Self {
            pose_folder: pose_folder.to_string(),
            animation: animation.to_string(),
            scale,
        }
    }
}

impl Default for CharacterDynamics {
    fn default() -> Self {
        Self::new("neutral", "gentle_breathe", 1.0)
    }
}

/// Fallback mood when no rule matches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodFallback {
    pub mood: String,
}

impl Default for MoodFallback {
    fn default() -> Self {
        Self { mood: "chill".to_string() }
    }
}

/// Contents of `mood_map.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MoodConfig {
    pub priority_order: Vec<String>,
    pub rules: Vec<MoodRuleConfig>,
    pub fallback: MoodFallback,
    pub safety_valve: SafetyValveConfig,
    pub energy_levels: EnergyLevels,
    /// mood -> character -> dynamics
    pub character_dynamics: BTreeMap<String, BTreeMap<String, CharacterDynamics>>,
}

impl Default for MoodConfig {
    fn default() -> Self {
        use crate::condition::Bounds;
        use crate::types::KeyMode;

        let rule = |mood: &str, description: &str, bounds: Bounds| MoodRuleConfig {
            mood: mood.to_string(),
            description: description.to_string(),
            conditions: ConditionSpec::Bounds(bounds),
        };
        let rules = vec![
            rule(
                "hype",
                "Fast and loud",
                Bounds { bpm_min: Some(128.0), energy_min: Some(0.7), ..Default::default() },
            ),
            rule(
                "happy",
                "Upbeat major key",
                Bounds {
                    bpm_min: Some(100.0),
                    energy_min: Some(0.4),
                    key_mode: Some(KeyMode::Major),
                    ..Default::default()
                },
            ),
            rule(
                "sad",
                "Slow minor key",
                Bounds {
                    bpm_max: Some(95.0),
                    energy_max: Some(0.5),
                    key_mode: Some(KeyMode::Minor),
                    ..Default::default()
                },
            ),
            rule(
                "cool",
                "Mid-tempo groove",
                Bounds { bpm_min: Some(85.0), bpm_max: Some(115.0), ..Default::default() },
            ),
        ];

        let dynamics = |weeter: &str, blubby: &str, together: &str, animation: &str| {
            BTreeMap::from([
                ("weeter".to_string(), CharacterDynamics::new(weeter, animation, 1.0)),
                ("blubby".to_string(), CharacterDynamics::new(blubby, animation, 1.0)),
                ("together".to_string(), CharacterDynamics::new(together, animation, 0.95)),
            ])
        };
        let character_dynamics = BTreeMap::from([
            ("hype".to_string(), dynamics("hype", "hype", "hype", "bounce_hard")),
            ("happy".to_string(), dynamics("happy", "happy", "happy", "bounce")),
            ("sad".to_string(), dynamics("sad", "sad", "chill", "sway_slow")),
            ("cool".to_string(), dynamics("cool", "cool", "chill", "sway")),
            ("chill".to_string(), dynamics("neutral", "neutral", "chill", "gentle_breathe")),
        ]);

        Self {
            priority_order: rules.iter().map(|r| r.mood.clone()).collect(),
            rules,
            fallback: MoodFallback::default(),
            safety_valve: SafetyValveConfig::default(),
            energy_levels: EnergyLevels::default(),
            character_dynamics,
        }
    }
}

impl Validate for MoodConfig {
    fn validate(&self) -> Result<()> {
        check_unit("key_confidence_threshold", self.safety_valve.key_confidence_threshold)?;
        check_unit("mode_confidence_threshold", self.safety_valve.mode_confidence_threshold)?;
        check_unit("energy_levels.high", self.energy_levels.high)?;
        check_unit("energy_levels.medium", self.energy_levels.medium)?;
        if self.energy_levels.medium > self.energy_levels.high {
            return Err(Error::InvalidConfig(
                "energy_levels.medium exceeds energy_levels.high".to_string(),
            ));
        }
        if self.fallback.mood.trim().is_empty() {
            return Err(Error::InvalidConfig("fallback mood is empty".to_string()));
        }
        Ok(())
    }
}

impl MoodConfig {
    /// Rules in evaluation order
    ///
    /// Rules named in `priority_order` come first, in that order; remaining
    /// rules follow in file order.
    pub fn ordered_rules(&self) -> Vec<&MoodRuleConfig> {
        let mut ordered: Vec<&MoodRuleConfig> = self
            .priority_order
            .iter()
            .filter_map(|name| self.rules.iter().find(|r| &r.mood == name))
            .collect();
        for rule in &self.rules {
            if !self.priority_order.contains(&rule.mood) {
                ordered.push(rule);
            }
        }
        ordered
    }
}

// ============================================================================
// Genre defaults
// ============================================================================

/// One genre's defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenreEntry {
    #[serde(default = "default_genre_mood")]
    pub default_mood: String,
    /// `<character>_pose` keys holding paths relative to the character dir
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_genre_mood() -> String {
    "chill".to_string()
}

impl GenreEntry {
    /// Configured pose path for a character, relative to its directory
    pub fn pose_for(&self, character: &str) -> Option<&str> {
        self.extra
            .get(&format!("{}_pose", character))
            .and_then(|v| v.as_str())
    }
}

impl Default for GenreEntry {
    fn default() -> Self {
        Self {
            default_mood: default_genre_mood(),
            extra: BTreeMap::new(),
        }
    }
}

/// Contents of `genre_defaults.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenreDefaults {
    pub genres: BTreeMap<String, GenreEntry>,
    pub fallback: GenreEntry,
}

impl Default for GenreDefaults {
    fn default() -> Self {
        let entry = |mood: &str| GenreEntry {
            default_mood: mood.to_string(),
            extra: BTreeMap::new(),
        };
        Self {
            genres: BTreeMap::from([
                ("reggae".to_string(), entry("chill")),
                ("hip-hop".to_string(), entry("cool")),
                ("edm".to_string(), entry("hype")),
                ("pop".to_string(), entry("happy")),
                ("lofi".to_string(), entry("chill")),
            ]),
            fallback: entry("chill"),
        }
    }
}

impl Validate for GenreDefaults {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl GenreDefaults {
    /// Entry for a genre (case-insensitive), else the fallback entry
    pub fn entry(&self, genre: &str) -> &GenreEntry {
        let wanted = genre.to_lowercase();
        self.genres
            .iter()
            .find(|(name, _)| name.to_lowercase() == wanted)
            .map(|(_, entry)| entry)
            .unwrap_or(&self.fallback)
    }
}

// ============================================================================
// Render recipe
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: String,
    pub crf: u32,
    pub preset: String,
    pub pixel_format: String,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            codec: "libx264".to_string(),
            crf: 18,
            preset: "medium".to_string(),
            pixel_format: "yuv420p".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub codec: String,
    pub bitrate: String,
    pub sample_rate: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: "320k".to_string(),
            sample_rate: 48000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub intro_duration_seconds: f64,
    pub endcard_duration_seconds: f64,
    pub fade_in_seconds: f64,
    pub fade_out_seconds: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            intro_duration_seconds: 2.0,
            endcard_duration_seconds: 4.0,
            fade_in_seconds: 1.0,
            fade_out_seconds: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KenBurnsSettings {
    /// `[min, max]` zoom factors
    pub zoom_range: [f64; 2],
    pub cycle_seconds: f64,
}

impl Default for KenBurnsSettings {
    fn default() -> Self {
        Self {
            zoom_range: [1.0, 1.08],
            cycle_seconds: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionSettings {
    pub character_max_height_pct: f64,
    pub character_bottom_margin_pct: f64,
    pub title_font_size: u32,
    pub subtitle_font_size: u32,
    /// Characters overlaid on the video, left to right
    pub overlay_characters: Vec<String>,
    /// Horizontal centre of each overlay as a fraction of the width
    pub overlay_x_pct: Vec<f64>,
    pub font_file: Option<PathBuf>,
    /// Solid background when the manifest names no image
    pub background_color: String,
}

impl Default for CompositionSettings {
    fn default() -> Self {
        Self {
            character_max_height_pct: 0.45,
            character_bottom_margin_pct: 0.05,
            title_font_size: 72,
            subtitle_font_size: 44,
            overlay_characters: vec!["weeter".to_string(), "blubby".to_string()],
            overlay_x_pct: vec![0.3, 0.7],
            font_file: None,
            background_color: "0x1a1a2e".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSettings {
    pub bloom_strength: f64,
    pub bloom_decay_frames: f64,
    pub bounce_min_px: f64,
    pub bounce_max_px: f64,
    pub zoom_energy_boost: f64,
    /// Hard upper bound on the zoom factor
    pub zoom_ceiling: f64,
    pub max_energy_segments: usize,
    pub max_bloom_beats: usize,
}

impl Default for EffectSettings {
    fn default() -> Self {
        Self {
            bloom_strength: 0.12,
            bloom_decay_frames: 6.0,
            bounce_min_px: 3.0,
            bounce_max_px: 18.0,
            zoom_energy_boost: 0.05,
            zoom_ceiling: 1.2,
            max_energy_segments: 40,
            max_bloom_beats: 50,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndcardSettings {
    /// Template image relative to the project root
    pub template: Option<PathBuf>,
}

/// Contents of `baseline_recipe.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderRecipe {
    pub video: VideoSettings,
    pub audio: AudioSettings,
    pub timing: TimingSettings,
    pub ken_burns: KenBurnsSettings,
    pub composition: CompositionSettings,
    pub effects: EffectSettings,
    pub endcard: EndcardSettings,
}

impl Validate for RenderRecipe {
    fn validate(&self) -> Result<()> {
        if self.video.width == 0 || self.video.height == 0 || self.video.fps == 0 {
            return Err(Error::InvalidConfig("video dimensions and fps must be non-zero".into()));
        }
        check_positive("ken_burns.cycle_seconds", self.ken_burns.cycle_seconds)?;
        check_positive("effects.bloom_decay_frames", self.effects.bloom_decay_frames)?;
        if self.effects.max_energy_segments == 0 || self.effects.max_bloom_beats == 0 {
            return Err(Error::InvalidConfig("expression budgets must be non-zero".into()));
        }
        if self.composition.overlay_x_pct.len() < self.composition.overlay_characters.len() {
            return Err(Error::InvalidConfig(
                "overlay_x_pct needs one entry per overlay character".into(),
            ));
        }
        let [lo, hi] = self.ken_burns.zoom_range;
        if lo > hi || hi > self.effects.zoom_ceiling {
            return Err(Error::InvalidConfig(format!(
                "zoom_range [{}, {}] must be ordered and below the ceiling {}",
                lo, hi, self.effects.zoom_ceiling
            )));
        }
        Ok(())
    }
}

impl RenderRecipe {
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.video.width, self.video.height)
    }

    /// Total output length for a track
    pub fn total_duration(&self, track_seconds: f64) -> f64 {
        self.timing.intro_duration_seconds + track_seconds + self.timing.endcard_duration_seconds
    }
}

// ============================================================================
// Pipeline settings
// ============================================================================

/// Acoustic analyzer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub chroma_fft_size: usize,
    /// RMS value mapped to an energy of 1.0
    pub energy_reference_rms: f64,
    pub curve_points: usize,
    pub max_segments: usize,
    /// Target section length used to pick the segment count
    pub segment_seconds: f64,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            frame_size: 2048,
            hop_size: 512,
            chroma_fft_size: 4096,
            energy_reference_rms: 0.15,
            curve_points: 100,
            max_segments: 8,
            segment_seconds: 15.0,
        }
    }
}

/// Stage time limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub analysis_seconds: u64,
    pub render_seconds: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            analysis_seconds: 600,
            render_seconds: 3600,
        }
    }
}

/// External render engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub program: String,
    pub stderr_tail_lines: usize,
    pub stderr_tail_chars: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            stderr_tail_lines: 20,
            stderr_tail_chars: 4000,
        }
    }
}

/// Contents of `pipeline.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub analyzer: AnalyzerSettings,
    pub timeouts: TimeoutSettings,
    pub engine: EngineSettings,
    /// Characters assigned a pose for every song
    pub characters: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerSettings::default(),
            timeouts: TimeoutSettings::default(),
            engine: EngineSettings::default(),
            characters: vec!["weeter".to_string(), "blubby".to_string(), "together".to_string()],
        }
    }
}

impl Validate for PipelineSettings {
    fn validate(&self) -> Result<()> {
        let a = &self.analyzer;
        if a.sample_rate < 8000 {
            return Err(Error::InvalidConfig(format!("sample_rate {} too low", a.sample_rate)));
        }
        if a.frame_size < 256 || a.hop_size == 0 || a.hop_size > a.frame_size {
            return Err(Error::InvalidConfig("frame_size/hop_size out of range".into()));
        }
        if a.chroma_fft_size < 1024 {
            return Err(Error::InvalidConfig("chroma_fft_size below 1024".into()));
        }
        check_positive("energy_reference_rms", a.energy_reference_rms)?;
        check_positive("segment_seconds", a.segment_seconds)?;
        if a.curve_points == 0 || a.max_segments < 2 {
            return Err(Error::InvalidConfig("curve_points/max_segments out of range".into()));
        }
        if self.engine.program.trim().is_empty() {
            return Err(Error::InvalidConfig("engine.program is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defaults_validate() {
        MoodConfig::default().validate().unwrap();
        GenreDefaults::default().validate().unwrap();
        RenderRecipe::default().validate().unwrap();
        PipelineSettings::default().validate().unwrap();
    }

    #[test]
    fn test_missing_and_malformed_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let missing: MoodConfig = load_or_default(&dir.path().join(MOOD_MAP_FILE));
        assert_eq!(missing, MoodConfig::default());

        let path = dir.path().join(RECIPE_FILE);
        fs::write(&path, b"{ \"video\": ").unwrap();
        let recipe: RenderRecipe = load_or_default(&path);
        assert_eq!(recipe, RenderRecipe::default());
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PIPELINE_FILE);
        fs::write(&path, br#"{"analyzer": {"energy_reference_rms": -1.0}}"#).unwrap();
        let settings: PipelineSettings = load_or_default(&path);
        assert_eq!(settings.analyzer.energy_reference_rms, 0.15);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PIPELINE_FILE);
        fs::write(&path, br#"{"analyzer": {"energy_reference_rms": 0.2}}"#).unwrap();
        let settings: PipelineSettings = load_or_default(&path);
        assert_eq!(settings.analyzer.energy_reference_rms, 0.2);
        assert_eq!(settings.analyzer.sample_rate, 22050);
        assert_eq!(settings.engine.program, "ffmpeg");
    }

    #[test]
    fn test_mood_map_mixed_condition_forms() {
        let json = r#"{
            "priority_order": ["dark", "energetic"],
            "rules": [
                {"mood": "energetic", "description": "fast", "conditions": {"bpm_min": 120}},
                {"mood": "dark", "conditions": "minor_key AND bpm < 90"},
                {"mood": "odd", "conditions": {"type": "all", "conditions": []}}
            ],
            "safety_valve": {"key_confidence_threshold": 0.2}
        }"#;
        let config: MoodConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        let order: Vec<&str> = config.ordered_rules().iter().map(|r| r.mood.as_str()).collect();
        assert_eq!(order, vec!["dark", "energetic", "odd"]);
        assert_eq!(config.safety_valve.key_confidence_threshold, 0.2);
        assert_eq!(config.safety_valve.mode_confidence_threshold, 0.10);
        assert_eq!(config.fallback.mood, "chill");
    }

    #[test]
    fn test_genre_lookup() {
        let json = r#"{
            "genres": {"Reggae": {"default_mood": "chill", "weeter_pose": "neutral/weeter_0.png"}},
            "fallback": {"default_mood": "happy"}
        }"#;
        let defaults: GenreDefaults = serde_json::from_str(json).unwrap();
        let reggae = defaults.entry("reggae");
        assert_eq!(reggae.default_mood, "chill");
        assert_eq!(reggae.pose_for("weeter"), Some("neutral/weeter_0.png"));
        assert_eq!(reggae.pose_for("blubby"), None);
        assert_eq!(defaults.entry("polka").default_mood, "happy");
    }

    #[test]
    fn test_recipe_zoom_range_must_respect_ceiling() {
        let mut recipe = RenderRecipe::default();
        recipe.ken_burns.zoom_range = [1.0, 1.5];
        assert!(matches!(recipe.validate(), Err(Error::InvalidConfig(_))));
    }
}
