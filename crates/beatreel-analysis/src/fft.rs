//! Short-time Fourier transform.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Periodic Hann window.
pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / size as f32).cos())
        .collect()
}

/// Centered STFT: frame `i` is centered on sample `i * hop`, with zero
/// padding past both ends of the signal.
pub struct Stft {
    frame_size: usize,
    hop_size: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        Self {
            frame_size,
            hop_size: hop_size.max(1),
            window: hann_window(frame_size),
            fft: planner.plan_fft_forward(frame_size),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    /// Number of magnitude bins per frame.
    pub fn bins(&self) -> usize {
        self.frame_size / 2 + 1
    }

    /// Number of frames for a signal of `len` samples.
    pub fn frame_count(&self, len: usize) -> usize {
        1 + len / self.hop_size
    }

    /// Center frequency of a bin.
    pub fn bin_hz(&self, bin: usize, sample_rate: u32) -> f64 {
        bin as f64 * sample_rate as f64 / self.frame_size as f64
    }

    /// Copy frame `index` into `out`, zero padded.
    pub fn frame_into(&self, samples: &[f32], index: usize, out: &mut [f32]) {
        let half = (self.frame_size / 2) as isize;
        let start = (index * self.hop_size) as isize - half;
        for (i, slot) in out.iter_mut().enumerate().take(self.frame_size) {
            let pos = start + i as isize;
            *slot = if pos >= 0 && (pos as usize) < samples.len() {
                samples[pos as usize]
            } else {
                0.0
            };
        }
    }

    /// Visit the magnitude spectrum of every frame in order.
    pub fn for_each_frame(&self, samples: &[f32], mut visit: impl FnMut(usize, &[f32])) {
        let mut frame = vec![0.0f32; self.frame_size];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.frame_size];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];
        let mut mags = vec![0.0f32; self.bins()];

        for index in 0..self.frame_count(samples.len()) {
            self.frame_into(samples, index, &mut frame);
            for ((slot, s), w) in buffer.iter_mut().zip(&frame).zip(&self.window) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process_with_scratch(&mut buffer, &mut scratch);
            for (m, c) in mags.iter_mut().zip(&buffer) {
                *m = c.norm();
            }
            visit(index, &mags);
        }
    }

    /// Magnitude spectrogram, frames by bins.
    pub fn magnitudes(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut out = Vec::with_capacity(self.frame_count(samples.len()));
        self.for_each_frame(samples, |_, mags| out.push(mags.to_vec()));
        out
    }
}
