//! Core types for acoustic analysis.

use serde::Serialize;

/// Decoded mono audio.
#[derive(Debug, Clone)]
pub struct AudioData {
    /// PCM samples normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count of the source before mixdown
    pub source_channels: u32,
    /// Duration in seconds
    pub duration_secs: f64,
}

impl AudioData {
    /// Create new audio data from mono samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let duration_secs = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f64 / sample_rate as f64
        };
        Self {
            samples,
            sample_rate,
            source_channels: 1,
            duration_secs,
        }
    }

    /// Get number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if audio data is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Tempo and beat positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TempoEstimate {
    /// Beats per minute, one decimal; 0 when no pulse was found
    pub bpm: f64,
    /// Beat timestamps in seconds, three decimals, strictly increasing
    pub beat_times: Vec<f64>,
}

/// Tonic, mode, and how sure we are about them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyEstimate {
    /// Pitch class index, C = 0
    pub tonic: usize,
    /// True for major
    pub major: bool,
    pub key_confidence: f64,
    pub mode_confidence: f64,
}

/// Loudness summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnergyProfile {
    /// Mean RMS relative to the reference level, clamped to [0, 1]
    pub energy: f64,
    pub rms_mean: f64,
    pub rms_max: f64,
    /// RMS samples picked uniformly across the track
    pub curve: Vec<f64>,
}

/// Round to a fixed number of decimals.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_duration() {
        let audio = AudioData::new(vec![0.0; 22050], 22050);
        assert!((audio.duration_secs - 1.0).abs() < 1e-9);
        assert_eq!(audio.len(), 22050);
        assert!(AudioData::new(Vec::new(), 0).is_empty());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(120.04, 1), 120.0);
        assert_eq!(round_to(0.123456, 4), 0.1235);
    }
}
