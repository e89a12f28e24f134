//! Best-effort structural segmentation.
//!
//! Half-second windows are described by log band energies and merged,
//! adjacent pairs only, until the requested number of sections remains.

use crate::fft::Stft;
use crate::types::round_to;
use anyhow::{bail, Result};
use beatreel_core::Segment;

const BANDS: usize = 13;
const WINDOW_SECONDS: f64 = 0.5;
const BAND_MIN_HZ: f64 = 55.0;

/// Number of sections for a track length.
pub fn section_count(duration_secs: f64, segment_seconds: f64, max_segments: usize) -> usize {
    let by_length = (duration_secs / segment_seconds).floor() as usize;
    max_segments.min(by_length.max(2))
}

/// Band index for every STFT bin, `None` outside the banded range.
fn band_map(stft: &Stft, sample_rate: u32) -> Vec<Option<usize>> {
    let top = f64::from(sample_rate) / 2.0;
    let ratio = (top / BAND_MIN_HZ).ln();
    (0..stft.bins())
        .map(|bin| {
            let hz = stft.bin_hz(bin, sample_rate);
            if hz < BAND_MIN_HZ || hz > top {
                return None;
            }
            let pos = (hz / BAND_MIN_HZ).ln() / ratio;
            Some(((pos * BANDS as f64) as usize).min(BANDS - 1))
        })
        .collect()
}

/// One feature vector per analysis window.
fn window_features(
    spectrogram: &[Vec<f32>],
    stft: &Stft,
    sample_rate: u32,
) -> Vec<[f64; BANDS]> {
    let frame_rate = f64::from(sample_rate) / stft.hop_size() as f64;
    let per_window = ((WINDOW_SECONDS * frame_rate).round() as usize).max(1);
    let bands = band_map(stft, sample_rate);

    spectrogram
        .chunks(per_window)
        .map(|frames| {
            let mut feature = [0.0f64; BANDS];
            for frame in frames {
                for (m, band) in frame.iter().zip(&bands) {
                    if let Some(b) = band {
                        feature[*b] += f64::from(*m);
                    }
                }
            }
            for v in feature.iter_mut() {
                *v = (1.0 + *v / frames.len() as f64).ln();
            }
            feature
        })
        .collect()
}

struct Cluster {
    first: usize,
    last: usize,
    sum: [f64; BANDS],
    count: usize,
}

impl Cluster {
    fn mean(&self) -> [f64; BANDS] {
        std::array::from_fn(|i| self.sum[i] / self.count as f64)
    }

    /// Ward merge cost with another cluster
    fn cost(&self, other: &Cluster) -> f64 {
        let (a, b) = (self.mean(), other.mean());
        let dist: f64 = a.iter().zip(&b).map(|(x, y)| (x - y).powi(2)).sum();
        let (n1, n2) = (self.count as f64, other.count as f64);
        dist * n1 * n2 / (n1 + n2)
    }

    fn absorb(&mut self, other: Cluster) {
        self.last = other.last;
        for (s, o) in self.sum.iter_mut().zip(other.sum) {
            *s += o;
        }
        self.count += other.count;
    }
}

/// Split a track into at most `sections` contiguous labelled segments.
pub fn segment(
    spectrogram: &[Vec<f32>],
    stft: &Stft,
    sample_rate: u32,
    duration_secs: f64,
    sections: usize,
) -> Result<Vec<Segment>> {
    if duration_secs <= 0.0 || sections == 0 {
        bail!("nothing to segment");
    }
    let features = window_features(spectrogram, stft, sample_rate);
    if features.len() < 2 {
        bail!("track too short to segment ({} windows)", features.len());
    }

    let mut clusters: Vec<Cluster> = features
        .iter()
        .enumerate()
        .map(|(i, f)| Cluster {
            first: i,
            last: i,
            sum: *f,
            count: 1,
        })
        .collect();

    let target = sections.min(clusters.len());
    while clusters.len() > target {
        let Some(i) = (0..clusters.len() - 1)
            .min_by(|&a, &b| {
                clusters[a]
                    .cost(&clusters[a + 1])
                    .total_cmp(&clusters[b].cost(&clusters[b + 1]))
            })
        else {
            break;
        };
        let next = clusters.remove(i + 1);
        clusters[i].absorb(next);
    }

    let window_secs = duration_secs / features.len() as f64;
    let last_index = clusters.len() - 1;
    Ok(clusters
        .iter()
        .enumerate()
        .map(|(i, c)| Segment {
            label: if i == 0 {
                "intro".to_string()
            } else {
                format!("section_{}", i)
            },
            start: round_to(c.first as f64 * window_secs, 2),
            end: if i == last_index {
                round_to(duration_secs, 2)
            } else {
                round_to((c.last + 1) as f64 * window_secs, 2)
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_section_count() {
        assert_eq!(section_count(10.0, 15.0, 8), 2);
        assert_eq!(section_count(60.0, 15.0, 8), 4);
        assert_eq!(section_count(600.0, 15.0, 8), 8);
    }

    #[test]
    fn test_segments_split_at_timbre_change() {
        let rate = 22050;
        let mut samples: Vec<f32> = (0..rate * 10)
            .map(|i| 0.5 * (2.0 * PI * 220.0 * i as f32 / rate as f32).sin())
            .collect();
        samples.extend((0..rate * 10).map(|i| 0.5 * (2.0 * PI * 3520.0 * i as f32 / rate as f32).sin()));

        let stft = Stft::new(2048, 512);
        let spec = stft.magnitudes(&samples);
        let segments = segment(&spec, &stft, rate as u32, 20.0, 2).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].label, "intro");
        assert_eq!(segments[1].label, "section_1");
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments[1].end, 20.0);
        assert!((segments[1].start - 10.0).abs() < 1.0, "split at {}", segments[1].start);
        assert_eq!(segments[0].end, segments[1].start);
    }

    #[test]
    fn test_too_short_is_an_error() {
        let stft = Stft::new(2048, 512);
        let spec = stft.magnitudes(&[0.0; 1000]);
        assert!(segment(&spec, &stft, 22050, 0.05, 2).is_err());
        assert!(segment(&spec, &stft, 22050, 0.0, 2).is_err());
    }
}
