//! Mood resolution
//!
//! Rules are evaluated in priority order and the first full match wins. The
//! safety valve then overrides the result with the genre default whenever
//! the key estimate is too uncertain to trust.

use crate::condition::{Condition, EnergyLevel, Features};
use crate::config::{GenreDefaults, MoodConfig};
use crate::types::{AnalysisBlock, MoodBlock};
use tracing::{debug, info, warn};

/// A rule whose condition compiled successfully
#[derive(Debug, Clone)]
pub struct MoodRule {
    pub mood: String,
    pub description: String,
    pub condition: Condition,
}

/// Resolves a mood from analysis features
#[derive(Debug, Clone)]
pub struct MoodResolver<'a> {
    config: &'a MoodConfig,
    genres: &'a GenreDefaults,
    rules: Vec<MoodRule>,
}

impl<'a> MoodResolver<'a> {
    /// Compile the configured rules; rules that fail to compile are skipped
    pub fn new(config: &'a MoodConfig, genres: &'a GenreDefaults) -> Self {
        let rules = config
            .ordered_rules()
            .into_iter()
            .filter_map(|rule| match rule.conditions.compile() {
                Ok(condition) => Some(MoodRule {
                    mood: rule.mood.clone(),
                    description: rule.description.clone(),
                    condition,
                }),
                Err(e) => {
                    warn!("Skipping mood rule '{}': {}", rule.mood, e);
                    None
                }
            })
            .collect();

        Self { config, genres, rules }
    }

    /// Compiled rules in evaluation order
    pub fn rules(&self) -> &[MoodRule] {
        &self.rules
    }

    fn features<'g>(&self, analysis: &AnalysisBlock, genre: &'g str) -> Features<'g> {
        let levels = &self.config.energy_levels;
        Features {
            bpm: analysis.bpm,
            energy: analysis.energy,
            mode: analysis.mode,
            energy_level: EnergyLevel::classify(analysis.energy, levels.high, levels.medium),
            genre,
        }
    }

    /// First rule matching the analysis, if any
    pub fn match_rule(&self, analysis: &AnalysisBlock, genre: &str) -> Option<&MoodRule> {
        let features = self.features(analysis, genre);
        self.rules.iter().find(|rule| rule.condition.matches(&features))
    }

    /// Reason string when key or mode confidence is below its threshold
    pub fn safety_valve(&self, analysis: &AnalysisBlock) -> Option<String> {
        let valve = &self.config.safety_valve;
        if analysis.key_confidence < valve.key_confidence_threshold {
            return Some(format!(
                "key_confidence ({:.4}) < threshold ({})",
                analysis.key_confidence, valve.key_confidence_threshold
            ));
        }
        if analysis.mode_confidence < valve.mode_confidence_threshold {
            return Some(format!(
                "mode_confidence ({:.4}) < threshold ({})",
                analysis.mode_confidence, valve.mode_confidence_threshold
            ));
        }
        None
    }

    /// Resolve the mood block for a song
    pub fn resolve(&self, analysis: &AnalysisBlock, genre: &str) -> MoodBlock {
        if let Some(reason) = self.safety_valve(analysis) {
            let mood = self.genres.entry(genre).default_mood.clone();
            info!("Safety valve: {}; using genre default '{}' for {}", reason, mood, genre);
            return MoodBlock {
                name: mood,
                rule: None,
                fallback_used: false,
                safety_valve_triggered: true,
                safety_valve_reason: Some(reason),
            };
        }

        match self.match_rule(analysis, genre) {
            Some(rule) => {
                debug!("Mood matched: {} ({})", rule.mood, rule.description);
                MoodBlock {
                    name: rule.mood.clone(),
                    rule: Some(rule.description.clone()),
                    fallback_used: false,
                    safety_valve_triggered: false,
                    safety_valve_reason: None,
                }
            }
            None => {
                debug!("No mood rule matched, using fallback '{}'", self.config.fallback.mood);
                MoodBlock {
                    name: self.config.fallback.mood.clone(),
                    rule: None,
                    fallback_used: true,
                    safety_valve_triggered: false,
                    safety_valve_reason: None,
                }
            }
        }
    }
}
