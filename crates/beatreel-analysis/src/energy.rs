//! Loudness envelope and spectral brightness.

use crate::fft::Stft;
use crate::types::{round_to, EnergyProfile};

/// Frame RMS over centered, zero-padded frames.
pub fn frame_rms(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f64> {
    let stft = Stft::new(frame_size, hop_size);
    let mut frame = vec![0.0f32; frame_size];
    (0..stft.frame_count(samples.len()))
        .map(|i| {
            stft.frame_into(samples, i, &mut frame);
            let sum: f64 = frame.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
            (sum / frame_size as f64).sqrt()
        })
        .collect()
}

/// Up to `points` values picked at evenly spaced indices, ends included.
pub fn linspace_sample(values: &[f64], points: usize) -> Vec<f64> {
    if values.len() <= points {
        return values.to_vec();
    }
    if points == 1 {
        return vec![values[0]];
    }
    let last = (values.len() - 1) as f64;
    (0..points)
        .map(|i| {
            let idx = (i as f64 * last / (points - 1) as f64).floor() as usize;
            values[idx.min(values.len() - 1)]
        })
        .collect()
}

/// Energy scalar, RMS statistics and the downsampled envelope.
pub fn profile(
    samples: &[f32],
    frame_size: usize,
    hop_size: usize,
    reference_rms: f64,
    curve_points: usize,
) -> EnergyProfile {
    let rms = frame_rms(samples, frame_size, hop_size);
    if rms.is_empty() {
        return EnergyProfile::default();
    }

    let rms_mean = rms.iter().sum::<f64>() / rms.len() as f64;
    let rms_max = rms.iter().cloned().fold(0.0, f64::max);
    let energy = if reference_rms > 0.0 {
        (rms_mean / reference_rms).clamp(0.0, 1.0)
    } else {
        0.0
    };

    EnergyProfile {
        energy: round_to(energy, 4),
        rms_mean: round_to(rms_mean, 6),
        rms_max: round_to(rms_max, 6),
        curve: linspace_sample(&rms, curve_points)
            .into_iter()
            .map(|v| round_to(v, 4))
            .collect(),
    }
}

/// Mean spectral centroid in Hz over frames that carry any energy.
pub fn spectral_centroid_mean(spectrogram: &[Vec<f32>], stft: &Stft, sample_rate: u32) -> f64 {
    let mut total = 0.0;
    let mut counted = 0usize;
    for frame in spectrogram {
        let (mut weighted, mut mass) = (0.0f64, 0.0f64);
        for (bin, &m) in frame.iter().enumerate() {
            weighted += stft.bin_hz(bin, sample_rate) * f64::from(m);
            mass += f64::from(m);
        }
        if mass > 1e-9 {
            total += weighted / mass;
            counted += 1;
        }
    }
    if counted == 0 {
        0.0
    } else {
        round_to(total / counted as f64, 1)
    }
}
