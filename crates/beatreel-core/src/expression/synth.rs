//! Time series to expression synthesis
//!
//! The render engine evaluates these expressions once per frame, so their
//! size is budgeted: the energy envelope is downsampled to at most
//! `max_energy_segments` piecewise segments and the beat timeline is thinned
//! to at most `max_bloom_beats` pulses, whatever the input length.

use super::ast::{Expr, Var};
use tracing::debug;

/// Size limits for synthesized expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionBudget {
    pub max_energy_segments: usize,
    pub max_bloom_beats: usize,
}

impl Default for ExpressionBudget {
    fn default() -> Self {
        Self {
            max_energy_segments: 40,
            max_bloom_beats: 50,
        }
    }
}

/// Which clock an expression is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeline {
    /// Seconds, via `t`
    Seconds,
    /// Frame numbers, via `n` or `on`
    Frames(Var),
}

impl Timeline {
    fn var(&self) -> Var {
        match self {
            Timeline::Seconds => Var::Time,
            Timeline::Frames(v) => *v,
        }
    }
}

/// Ken Burns zoom parameters, all in output frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomParams {
    pub mid: f64,
    pub amplitude: f64,
    pub period_frames: f64,
    pub energy_boost: f64,
    pub ceiling: f64,
}

/// Value returned for an empty or degenerate envelope
const NEUTRAL_ENERGY: f64 = 0.5;

/// Tempo assumed when the analysis has none
const DEFAULT_BPM: f64 = 100.0;

/// Normalize to the peak, then apply a 3-point moving average
///
/// Edge samples average over the neighbours that exist. Non-finite samples
/// count as zero.
pub fn smooth_and_normalize(curve: &[f64]) -> Vec<f64> {
    let clean: Vec<f64> = curve
        .iter()
        .map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 })
        .collect();
    let peak = clean.iter().cloned().fold(0.0, f64::max);
    if peak <= 0.0 {
        return vec![0.0; clean.len()];
    }

    let normalized: Vec<f64> = clean.iter().map(|v| v / peak).collect();
    (0..normalized.len())
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(normalized.len() - 1);
            let window = &normalized[lo..=hi];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Converts analysis time series into render expressions
#[derive(Debug, Clone)]
pub struct ExpressionSynthesizer {
    fps: f64,
    budget: ExpressionBudget,
}

impl ExpressionSynthesizer {
    pub fn new(fps: u32) -> Self {
        Self::with_budget(fps, ExpressionBudget::default())
    }

    pub fn with_budget(fps: u32, budget: ExpressionBudget) -> Self {
        Self {
            fps: f64::from(fps.max(1)),
            budget: ExpressionBudget {
                max_energy_segments: budget.max_energy_segments.max(1),
                max_bloom_beats: budget.max_bloom_beats.max(1),
            },
        }
    }

    pub fn budget(&self) -> ExpressionBudget {
        self.budget
    }

    /// Bucket width in whole seconds and one sampled value per bucket
    pub fn envelope_buckets(&self, curve: &[f64], duration: f64) -> Option<(usize, Vec<f64>)> {
        if curve.is_empty() || !duration.is_finite() || duration <= 0.0 {
            return None;
        }
        let smoothed = smooth_and_normalize(curve);

        let total_seconds = (duration.ceil() as usize).max(1);
        let step = total_seconds.div_ceil(self.budget.max_energy_segments).max(1);
        let n_steps = total_seconds.div_ceil(step);

        let last = smoothed.len() - 1;
        let values = (0..n_steps)
            .map(|i| {
                let mid = (i * step) as f64 + step as f64 / 2.0;
                let frac = (mid / duration).min(1.0);
                let idx = ((frac * last as f64) as usize).min(last);
                round3(smoothed[idx])
            })
            .collect();
        Some((step, values))
    }

    /// Piecewise-linear energy envelope in `[0, 1]`
    ///
    /// `offset` shifts the envelope by the video intro, in seconds.
    pub fn energy_envelope(
        &self,
        curve: &[f64],
        duration: f64,
        offset: f64,
        timeline: Timeline,
    ) -> Expr {
        let Some((step, values)) = self.envelope_buckets(curve, duration) else {
            return Expr::num(NEUTRAL_ENERGY);
        };

        let var = timeline.var();
        let (origin, unit) = match timeline {
            Timeline::Seconds => (offset.max(0.0), 1.0),
            Timeline::Frames(_) => ((offset.max(0.0) * self.fps).floor(), self.fps),
        };
        let span = step as f64 * unit;
        let total_seconds = (duration.ceil() as usize).max(1);
        let last = values.len() - 1;

        let mut expr = Expr::num(values[last]);
        for i in (0..values.len()).rev() {
            let start = origin + i as f64 * span;
            // the final bucket stops at the end of the track
            let end = origin + ((i + 1) * step).min(total_seconds) as f64 * unit;
            let value = values[i];
            let next = values.get(i + 1).copied().unwrap_or(value);

            let body = if i == last || value == next {
                Expr::num(value)
            } else {
                Expr::num(value).add(
                    Expr::num(round3(next - value))
                        .mul(Expr::var(var).sub(Expr::num(start)))
                        .div(Expr::num(span)),
                )
            };
            expr = Expr::if_between(var, start, end, body, expr);
        }

        debug!(
            "Energy envelope: {} samples -> {} segments of {}s",
            curve.len(),
            values.len(),
            step
        );
        expr
    }

    /// Brightness pulse that decays over `decay_frames` after each beat
    pub fn beat_bloom(
        &self,
        beats: &[f64],
        offset: f64,
        strength: f64,
        decay_frames: f64,
        var: Var,
    ) -> Expr {
        let valid: Vec<f64> = beats
            .iter()
            .copied()
            .filter(|b| b.is_finite() && *b >= 0.0)
            .collect();
        if valid.is_empty() || strength <= 0.0 || !strength.is_finite() {
            return Expr::num(0.0);
        }

        let every = valid.len().div_ceil(self.budget.max_bloom_beats).max(1);
        let decay = if decay_frames.is_finite() && decay_frames > 0.0 { decay_frames } else { 1.0 };

        let terms = valid.iter().step_by(every).map(|beat| {
            let frame = ((beat + offset.max(0.0)) * self.fps).floor();
            let fade = Expr::num(0.0).max(
                Expr::num(1.0).sub(Expr::var(var).sub(Expr::num(frame)).div(Expr::num(decay))),
            );
            Expr::num(strength)
                .mul(fade)
                .mul(Expr::var(var).gte(Expr::num(frame)))
        });

        debug!("Beat bloom: {} beats, keeping every {}", valid.len(), every);
        Expr::num(strength).min(Expr::sum(terms))
    }

    /// Frames per beat, never below one
    pub fn beat_period_frames(&self, bpm: f64) -> f64 {
        let bpm = if bpm.is_finite() && bpm > 0.0 { bpm } else { DEFAULT_BPM };
        (self.fps * 60.0 / bpm).floor().max(1.0)
    }

    /// Vertical bounce in pixels, one hop per beat, scaled by energy
    pub fn bounce(
        &self,
        energy: &Expr,
        bpm: f64,
        min_px: f64,
        max_px: f64,
        phase: f64,
        var: Var,
    ) -> Expr {
        let amplitude = Expr::num(min_px).add(Expr::num(max_px - min_px).mul(energy.clone()));
        let mut angle = Expr::num(2.0)
            .mul(Expr::Pi)
            .mul(Expr::var(var))
            .div(Expr::num(self.beat_period_frames(bpm)));
        if phase != 0.0 && phase.is_finite() {
            angle = angle.add(Expr::num(phase));
        }
        amplitude.mul(angle.sin().abs())
    }

    /// Ken Burns zoom factor with an energy boost, clamped to the ceiling
    pub fn zoom(&self, energy: &Expr, params: ZoomParams) -> Expr {
        let period = if params.period_frames.is_finite() && params.period_frames >= 1.0 {
            params.period_frames.floor()
        } else {
            1.0
        };
        let drift = Expr::num(params.amplitude).mul(
            Expr::num(2.0)
                .mul(Expr::Pi)
                .mul(Expr::var(Var::OutputFrame))
                .div(Expr::num(period))
                .sin(),
        );
        Expr::num(params.mid)
            .add(drift)
            .add(Expr::num(params.energy_boost).mul(energy.clone()))
            .min(Expr::num(params.ceiling))
    }
}
