//! Key and mode estimation with Krumhansl-Kessler profiles.

use crate::fft::Stft;
use crate::types::{round_to, KeyEstimate};

pub const PITCH_CLASSES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

const MAJOR_PROFILE: [f64; 12] = [6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88];
const MINOR_PROFILE: [f64; 12] = [6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17];

const CHROMA_MIN_HZ: f64 = 55.0;
const CHROMA_MAX_HZ: f64 = 5000.0;

/// Below this chroma norm the signal carries no usable pitch content
const SILENT_NORM: f64 = 1e-8;

/// Pitch class of a frequency, C = 0.
pub fn pitch_class(hz: f64) -> usize {
    // MIDI 69 is A4 = 440 Hz
    let midi = 69.0 + 12.0 * (hz / 440.0).log2();
    (midi.round() as i64).rem_euclid(12) as usize
}

/// Time-averaged chroma, each frame normalized to its maximum bin.
pub fn chroma(samples: &[f32], sample_rate: u32, fft_size: usize) -> [f64; 12] {
    let stft = Stft::new(fft_size, fft_size / 2);
    let bin_classes: Vec<Option<usize>> = (0..stft.bins())
        .map(|bin| {
            let hz = stft.bin_hz(bin, sample_rate);
            (CHROMA_MIN_HZ..=CHROMA_MAX_HZ)
                .contains(&hz)
                .then(|| pitch_class(hz))
        })
        .collect();

    let mut total = [0.0f64; 12];
    let mut frames = 0usize;
    stft.for_each_frame(samples, |_, mags| {
        let mut frame = [0.0f64; 12];
        for (m, class) in mags.iter().zip(&bin_classes) {
            if let Some(c) = class {
                frame[*c] += f64::from(*m).powi(2);
            }
        }
        let peak = frame.iter().cloned().fold(0.0, f64::max);
        if peak > 0.0 {
            for (t, v) in total.iter_mut().zip(frame) {
                *t += v / peak;
            }
        }
        frames += 1;
    });

    if frames > 0 {
        for t in total.iter_mut() {
            *t /= frames as f64;
        }
    }
    total
}

fn pearson(a: &[f64; 12], b: &[f64; 12]) -> f64 {
    let mean_a = a.iter().sum::<f64>() / 12.0;
    let mean_b = b.iter().sum::<f64>() / 12.0;
    let (mut num, mut da, mut db) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        num += (x - mean_a) * (y - mean_b);
        da += (x - mean_a).powi(2);
        db += (y - mean_b).powi(2);
    }
    if da <= 0.0 || db <= 0.0 {
        0.0
    } else {
        num / (da.sqrt() * db.sqrt())
    }
}

/// Profile with its tonic moved to pitch class `tonic`.
fn rotate(profile: &[f64; 12], tonic: usize) -> [f64; 12] {
    let mut out = [0.0; 12];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = profile[(i + 12 - tonic) % 12];
    }
    out
}

/// Estimate key and mode from an averaged chroma vector.
pub fn estimate_from_chroma(chroma: &[f64; 12]) -> KeyEstimate {
    let mean = chroma.iter().sum::<f64>() / 12.0;
    let centered: [f64; 12] = std::array::from_fn(|i| chroma[i] - mean);
    let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm < SILENT_NORM {
        return KeyEstimate {
            tonic: 0,
            major: true,
            key_confidence: 0.0,
            mode_confidence: 0.0,
        };
    }

    let major: Vec<f64> = (0..12).map(|k| pearson(&centered, &rotate(&MAJOR_PROFILE, k))).collect();
    let minor: Vec<f64> = (0..12).map(|k| pearson(&centered, &rotate(&MINOR_PROFILE, k))).collect();

    let argmax = |scores: &[f64]| {
        scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, v)| (i, *v))
            .unwrap_or((0, 0.0))
    };
    let (major_tonic, best_major) = argmax(&major);
    let (minor_tonic, best_minor) = argmax(&minor);

    let all_mean = (major.iter().sum::<f64>() + minor.iter().sum::<f64>()) / 24.0;
    let best = best_major.max(best_minor);
    let is_major = best_major >= best_minor;

    KeyEstimate {
        tonic: if is_major { major_tonic } else { minor_tonic },
        major: is_major,
        key_confidence: round_to((best - all_mean).clamp(0.0, 1.0), 4),
        mode_confidence: round_to((best_major - best_minor).abs().clamp(0.0, 1.0), 4),
    }
}

/// Estimate key and mode from mono samples.
pub fn estimate_key(samples: &[f32], sample_rate: u32, fft_size: usize) -> KeyEstimate {
    estimate_from_chroma(&chroma(samples, sample_rate, fft_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tones(freqs: &[f32], rate: u32, seconds: f32) -> Vec<f32> {
        let n = (rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / rate as f32;
                freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum::<f32>() / freqs.len() as f32
            })
            .collect()
    }

    #[test]
    fn test_pitch_class() {
        assert_eq!(pitch_class(440.0), 9);
        assert_eq!(pitch_class(261.63), 0);
        assert_eq!(pitch_class(55.0), 9);
        assert_eq!(pitch_class(392.0), 7);
    }

    #[test]
    fn test_c_major_chord() {
        // Root doubled an octave up, as voiced on a keyboard
        let samples = tones(&[261.63, 329.63, 392.0, 523.25], 22050, 4.0);
        let estimate = estimate_key(&samples, 22050, 4096);
        assert_eq!(PITCH_CLASSES[estimate.tonic], "C");
        assert!(estimate.major);
        assert!(estimate.key_confidence > 0.0);
    }

    #[test]
    fn test_a_minor_chord() {
        let samples = tones(&[220.0, 261.63, 329.63, 440.0], 22050, 4.0);
        let estimate = estimate_key(&samples, 22050, 4096);
        assert_eq!(PITCH_CLASSES[estimate.tonic], "A");
        assert!(!estimate.major);
    }

    #[test]
    fn test_silence_defaults_to_c_major() {
        let estimate = estimate_key(&vec![0.0; 22050], 22050, 4096);
        assert_eq!(
            estimate,
            KeyEstimate {
                tonic: 0,
                major: true,
                key_confidence: 0.0,
                mode_confidence: 0.0
            }
        );
    }

    #[test]
    fn test_confidences_are_bounded() {
        let flat = [1.0; 12];
        assert_eq!(estimate_from_chroma(&flat).key_confidence, 0.0);

        let mut spiky = [0.0; 12];
        spiky[7] = 1.0;
        let estimate = estimate_from_chroma(&spiky);
        assert!((0.0..=1.0).contains(&estimate.key_confidence));
        assert!((0.0..=1.0).contains(&estimate.mode_confidence));
    }
}
