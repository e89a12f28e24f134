//! Beatreel Analysis - acoustic feature extraction
//!
//! This crate turns a song's source audio into the analysis block stored in
//! its manifest:
//! - **Tempo & beats**: spectral-flux onsets, autocorrelation tempo with a
//!   120 BPM prior, dynamic-programming beat tracking
//! - **Key & mode**: chroma correlated against Krumhansl-Kessler profiles,
//!   with confidences that feed the mood safety valve
//! - **Energy**: RMS level, a downsampled loudness envelope, and spectral
//!   centroid
//! - **Segments**: best-effort contiguous sections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │  Source Audio   │───▶│  Decode + Mono   │───▶│   STFT 2048     │
//! └─────────────────┘    │  + Resample      │    └────────┬────────┘
//!                        └────────┬─────────┘             │
//!                                 │          ┌────────────┼────────────┐
//!                                 ▼          ▼            ▼            ▼
//!                        ┌──────────────┐ ┌────────┐ ┌─────────┐ ┌──────────┐
//!                        │ Chroma 4096  │ │ Onsets │ │ Centroid│ │ Segments │
//!                        └──────┬───────┘ └───┬────┘ └─────────┘ └──────────┘
//!                               ▼             ▼
//!                        ┌──────────────┐ ┌────────────┐
//!                        │  Key / Mode  │ │Tempo/Beats │
//!                        └──────────────┘ └────────────┘
//! ```
//!
//! The [`stage`] module wires the analyzer into the pipeline: it runs the
//! CPU-bound work on the blocking pool under a timeout, resolves mood and
//! character poses, and persists the manifest and cache.

pub mod decode;
pub mod energy;
pub mod fft;
pub mod key;
pub mod segments;
pub mod stage;
pub mod tempo;
pub mod types;

use anyhow::{bail, Result};
use beatreel_core::config::AnalyzerSettings;
use beatreel_core::{AnalysisBlock, KeyMode};
use std::path::Path;
use tracing::{debug, info, warn};

pub use fft::Stft;
pub use stage::{analyze_song, analyze_song_with_timeout, AnalysisReport};
pub use types::*;

/// Version string recorded in every analysis block
pub const ANALYZER_VERSION: &str = concat!("beatreel-analysis/", env!("CARGO_PKG_VERSION"));

/// Runs every feature extractor over one track.
#[derive(Debug, Clone)]
pub struct AcousticAnalyzer {
    settings: AnalyzerSettings,
}

impl Default for AcousticAnalyzer {
    fn default() -> Self {
        Self::new(AnalyzerSettings::default())
    }
}

impl AcousticAnalyzer {
    pub fn new(settings: AnalyzerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AnalyzerSettings {
        &self.settings
    }

    /// Decode and analyze a file.
    pub fn analyze_file(&self, path: impl AsRef<Path>) -> Result<AnalysisBlock> {
        let audio = decode::load_audio(path, self.settings.sample_rate)?;
        self.analyze(&audio)
    }

    /// Analyze decoded mono audio.
    pub fn analyze(&self, audio: &AudioData) -> Result<AnalysisBlock> {
        if audio.is_empty() || audio.sample_rate == 0 {
            bail!("audio contains no samples");
        }
        let s = &self.settings;
        let rate = audio.sample_rate;
        let duration = audio.duration_secs;

        let stft = Stft::new(s.frame_size, s.hop_size);
        let spectrogram = stft.magnitudes(&audio.samples);
        let frame_rate = f64::from(rate) / s.hop_size as f64;

        let onsets = tempo::onset_envelope(&spectrogram);
        let tempo = tempo::estimate(&onsets, frame_rate);
        debug!("Tempo {} BPM, {} beats", tempo.bpm, tempo.beat_times.len());

        let key = key::estimate_key(&audio.samples, rate, s.chroma_fft_size);
        let energy = energy::profile(
            &audio.samples,
            s.frame_size,
            s.hop_size,
            s.energy_reference_rms,
            s.curve_points,
        );
        let centroid = energy::spectral_centroid_mean(&spectrogram, &stft, rate);

        let sections = segments::section_count(duration, s.segment_seconds, s.max_segments);
        let segments = match segments::segment(&spectrogram, &stft, rate, duration, sections) {
            Ok(segments) => segments,
            Err(e) => {
                warn!("Segmentation failed: {:#}", e);
                Vec::new()
            }
        };

        let tonic = key::PITCH_CLASSES[key.tonic];
        let mode = if key.major { KeyMode::Major } else { KeyMode::Minor };
        let beat_count = tempo.beat_times.len();
        let beats_per_second = if duration > 0.0 {
            round_to(beat_count as f64 / duration, 4)
        } else {
            0.0
        };

        info!(
            bpm = tempo.bpm,
            key = %format!("{} {}", tonic, mode),
            key_confidence = key.key_confidence,
            energy = energy.energy,
            duration = round_to(duration, 2),
            "Analysis complete"
        );

        Ok(AnalysisBlock {
            bpm: tempo.bpm,
            beat_count,
            beat_times: tempo.beat_times,
            beats_per_second,
            key: tonic.to_string(),
            mode,
            key_full: format!("{} {}", tonic, mode),
            key_confidence: key.key_confidence,
            mode_confidence: key.mode_confidence,
            energy: energy.energy,
            rms_mean: energy.rms_mean,
            rms_max: energy.rms_max,
            spectral_centroid_mean: centroid,
            energy_curve: energy.curve,
            duration_seconds: round_to(duration, 3),
            segments,
            analyzer_version: ANALYZER_VERSION.to_string(),
        })
    }
}
