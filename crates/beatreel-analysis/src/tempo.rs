//! Tempo estimation and beat tracking.
//!
//! The onset envelope is log-compressed spectral flux. Tempo comes from its
//! autocorrelation weighted by a log-normal prior centred on 120 BPM; beats
//! are placed by dynamic programming against that tempo.

use crate::types::{round_to, TempoEstimate};
use tracing::debug;

pub const MIN_BPM: f64 = 30.0;
pub const MAX_BPM: f64 = 300.0;

/// Centre of the tempo prior
const PRIOR_BPM: f64 = 120.0;
/// Prior width in octaves
const PRIOR_OCTAVES: f64 = 1.0;
/// Penalty for beat intervals that deviate from the period
const TIGHTNESS: f64 = 100.0;

/// Log-compressed spectral flux, one value per STFT frame.
pub fn onset_envelope(spectrogram: &[Vec<f32>]) -> Vec<f64> {
    let mut env = Vec::with_capacity(spectrogram.len());
    let mut prev: Option<Vec<f64>> = None;

    for frame in spectrogram {
        let logged: Vec<f64> = frame.iter().map(|&m| (1.0 + m as f64).ln()).collect();
        let flux = match &prev {
            Some(p) => logged
                .iter()
                .zip(p)
                .map(|(cur, old)| (cur - old).max(0.0))
                .sum(),
            None => 0.0,
        };
        env.push(flux);
        prev = Some(logged);
    }
    env
}

fn is_flat(env: &[f64]) -> bool {
    let max = env.iter().cloned().fold(f64::MIN, f64::max);
    let min = env.iter().cloned().fold(f64::MAX, f64::min);
    env.is_empty() || max - min < 1e-6
}

fn tempo_prior(bpm: f64) -> f64 {
    let octaves = (bpm / PRIOR_BPM).log2() / PRIOR_OCTAVES;
    (-0.5 * octaves * octaves).exp()
}

/// Tempo in BPM from an onset envelope sampled at `frame_rate` frames/s.
///
/// Returns `None` when the envelope is flat or too short to hold two beats
/// at the slowest tempo considered.
pub fn estimate_bpm(env: &[f64], frame_rate: f64) -> Option<f64> {
    if is_flat(env) || frame_rate <= 0.0 {
        return None;
    }

    let mean = env.iter().sum::<f64>() / env.len() as f64;
    let centered: Vec<f64> = env.iter().map(|v| v - mean).collect();
    let energy: f64 = centered.iter().map(|v| v * v).sum();
    if energy <= 0.0 {
        return None;
    }

    let min_lag = ((60.0 * frame_rate / MAX_BPM).floor() as usize).max(1);
    let max_lag = ((60.0 * frame_rate / MIN_BPM).ceil() as usize).min(env.len().saturating_sub(2));
    if max_lag < min_lag + 2 {
        debug!("Onset envelope too short for tempo estimation ({} frames)", env.len());
        return None;
    }

    // Weighted autocorrelation, padded by one lag on each side for refinement
    let lo = min_lag - 1;
    let hi = max_lag + 1;
    let scores: Vec<f64> = (lo..=hi)
        .map(|lag| {
            if lag == 0 || lag >= centered.len() {
                return 0.0;
            }
            let ac: f64 = centered
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum::<f64>()
                / energy;
            ac * tempo_prior(60.0 * frame_rate / lag as f64)
        })
        .collect();

    let (best_idx, best) = scores
        .iter()
        .enumerate()
        .skip(1)
        .take(scores.len() - 2)
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if *best <= 0.0 {
        return None;
    }

    // Parabolic refinement around the peak
    let (left, right) = (scores[best_idx - 1], scores[best_idx + 1]);
    let denom = left - 2.0 * best + right;
    let offset = if denom.abs() > 1e-12 {
        (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    let lag = (lo + best_idx) as f64 + offset;

    Some((60.0 * frame_rate / lag).clamp(MIN_BPM, MAX_BPM))
}

/// Dynamic-programming beat tracker; returns beat frame indices.
pub fn track_beats(env: &[f64], frame_rate: f64, bpm: f64) -> Vec<usize> {
    if env.is_empty() || bpm <= 0.0 {
        return Vec::new();
    }
    let period = 60.0 * frame_rate / bpm;

    let mean = env.iter().sum::<f64>() / env.len() as f64;
    let std = (env.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / env.len() as f64).sqrt();
    let local: Vec<f64> = if std > 0.0 {
        env.iter().map(|v| v / std).collect()
    } else {
        env.to_vec()
    };

    let window_lo = (2.0 * period).round() as usize;
    let window_hi = ((period / 2.0).round() as usize).max(1);

    let mut cumulative = vec![0.0f64; env.len()];
    let mut backlink: Vec<Option<usize>> = vec![None; env.len()];

    for i in 0..env.len() {
        let mut best: Option<(usize, f64)> = None;
        if i >= window_hi {
            let start = i.saturating_sub(window_lo);
            for prev in start..=(i - window_hi) {
                let interval = (i - prev) as f64 / period;
                let score = cumulative[prev] - TIGHTNESS * interval.ln().powi(2);
                if best.map(|(_, s)| score > s).unwrap_or(true) {
                    best = Some((prev, score));
                }
            }
        }
        match best {
            Some((prev, score)) => {
                cumulative[i] = local[i] + score;
                backlink[i] = Some(prev);
            }
            None => cumulative[i] = local[i],
        }
    }

    // Last beat: the final local maximum of the cumulative score that is
    // not much weaker than the typical one
    let maxima: Vec<usize> = (0..cumulative.len())
        .filter(|&i| {
            let left = i == 0 || cumulative[i] > cumulative[i - 1];
            let right = i + 1 == cumulative.len() || cumulative[i] >= cumulative[i + 1];
            left && right
        })
        .collect();
    if maxima.is_empty() {
        return Vec::new();
    }
    let mut values: Vec<f64> = maxima.iter().map(|&i| cumulative[i]).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let median = values[values.len() / 2];
    let Some(&last) = maxima.iter().rev().find(|&&i| cumulative[i] >= 0.5 * median) else {
        return Vec::new();
    };

    let mut beats = vec![last];
    let mut cursor = last;
    while let Some(prev) = backlink[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();

    trim_weak_edges(&beats, env)
}

/// Drop leading and trailing beats that land on weak onsets.
fn trim_weak_edges(beats: &[usize], env: &[f64]) -> Vec<usize> {
    let rms = (env.iter().map(|v| v * v).sum::<f64>() / env.len() as f64).sqrt();
    let threshold = 0.5 * rms;
    let strong = |b: usize| env[b] >= threshold;

    let Some(first) = beats.iter().position(|&b| strong(b)) else {
        return Vec::new();
    };
    let last = beats.iter().rposition(|&b| strong(b)).unwrap_or(first);
    beats[first..=last].to_vec()
}

/// Tempo and beat times for an onset envelope.
pub fn estimate(env: &[f64], frame_rate: f64) -> TempoEstimate {
    let Some(bpm) = estimate_bpm(env, frame_rate) else {
        return TempoEstimate::default();
    };

    let mut beat_times: Vec<f64> = Vec::new();
    for frame in track_beats(env, frame_rate, bpm) {
        let t = round_to(frame as f64 / frame_rate, 3);
        if beat_times.last().map(|&last| t > last).unwrap_or(true) {
            beat_times.push(t);
        }
    }

    TempoEstimate {
        bpm: round_to(bpm, 1),
        beat_times,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Envelope with an impulse every `period` frames
    fn pulse_train(len: usize, period: f64, offset: usize) -> Vec<f64> {
        let mut env = vec![0.0; len];
        let mut t = offset as f64;
        while (t as usize) < len {
            let i = t.round() as usize;
            if i < len {
                env[i] = 1.0;
                if i + 1 < len {
                    env[i + 1] = 0.5;
                }
            }
            t += period;
        }
        env
    }

    #[test]
    fn test_flat_envelope_has_no_tempo() {
        assert_eq!(estimate(&vec![0.0; 500], 43.0), TempoEstimate::default());
        assert_eq!(estimate(&[], 43.0), TempoEstimate::default());
        assert!(estimate_bpm(&[0.0, 1.0, 0.0], 43.0).is_none());
    }

    #[test]
    fn test_pulse_train_tempo() {
        let frame_rate = 22050.0 / 512.0;
        // 120 BPM is one pulse every 21.53 frames
        let env = pulse_train(1000, 60.0 * frame_rate / 120.0, 5);
        let bpm = estimate_bpm(&env, frame_rate).unwrap();
        assert!((bpm - 120.0).abs() < 5.0, "bpm {}", bpm);
    }

    #[test]
    fn test_beats_follow_pulses() {
        let frame_rate = 22050.0 / 512.0;
        let period = 60.0 * frame_rate / 100.0;
        let env = pulse_train(1500, period, 10);
        let estimate = estimate(&env, frame_rate);
        assert!((estimate.bpm - 100.0).abs() < 5.0, "bpm {}", estimate.bpm);
        assert!(estimate.beat_times.len() > 20);
        assert!(estimate.beat_times.windows(2).all(|w| w[1] > w[0]));

        let gaps: Vec<f64> = estimate.beat_times.windows(2).map(|w| w[1] - w[0]).collect();
        let mean_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
        assert!((mean_gap - 0.6).abs() < 0.05, "mean gap {}", mean_gap);
    }

    #[test]
    fn test_prior_prefers_120() {
        assert_eq!(tempo_prior(120.0), 1.0);
        assert!(tempo_prior(60.0) < tempo_prior(100.0));
        assert!((tempo_prior(60.0) - tempo_prior(240.0)).abs() < 1e-12);
    }
}
