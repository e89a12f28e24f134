//! Audio decoding to mono at the analyzer rate.
//!
//! WAV files are read with `hound`; everything else goes through
//! `symphonia`'s probe. Channels are averaged and the result is linearly
//! resampled to the requested rate.

use crate::types::AudioData;
use anyhow::{anyhow, bail, Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Decode an audio file to mono samples at `target_rate`.
pub fn load_audio(path: impl AsRef<Path>, target_rate: u32) -> Result<AudioData> {
    let path = path.as_ref();
    if !path.is_file() {
        bail!("audio file not found: {}", path.display());
    }

    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
        .unwrap_or(false);

    let (mono, rate, channels) = if is_wav {
        match read_wav(path) {
            Ok(decoded) => decoded,
            Err(e) => {
                // Extensible or odd WAV variants hound rejects
                debug!("hound could not read {}: {:#}; trying symphonia", path.display(), e);
                read_with_symphonia(path)?
            }
        }
    } else {
        read_with_symphonia(path)?
    };

    if mono.is_empty() || rate == 0 {
        bail!("no audio samples decoded from {}", path.display());
    }

    let samples = resample_linear(&mono, rate, target_rate);
    debug!(
        "Decoded {}: {} Hz x{} -> {} samples at {} Hz",
        path.display(),
        rate,
        channels,
        samples.len(),
        target_rate
    );

    let mut audio = AudioData::new(samples, target_rate);
    audio.source_channels = channels;
    Ok(audio)
}

fn read_wav(path: &Path) -> Result<(Vec<f32>, u32, u32)> {
    let reader = hound::WavReader::open(path).context("Failed to open WAV file")?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .context("Corrupt WAV sample data")?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .context("Corrupt WAV sample data")?
        }
    };

    Ok((mixdown(&interleaved, channels), spec.sample_rate, channels as u32))
}

fn read_with_symphonia(path: &Path) -> Result<(Vec<f32>, u32, u32)> {
    let src = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Unrecognized audio container")?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow!("no supported audio tracks"))?;
    let track_id = track.id;
    let mut rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut samples: Vec<f32> = Vec::new();
    let mut skipped = 0usize;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(anyhow!(err).context("Failed to read audio packet")),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                rate = spec.rate;
                channels = spec.channels.count();
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend(mixdown(buf.samples(), channels));
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::DecodeError(_)) => skipped += 1,
            Err(err) => return Err(anyhow!(err).context("Audio decode failed")),
        }
    }

    if skipped > 0 {
        warn!("Skipped {} undecodable packets in {}", skipped, path.display());
    }
    Ok((samples, rate, channels.max(1) as u32))
}

/// Average interleaved channels to mono.
pub fn mixdown(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Linear-interpolation resampler.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            if idx >= last {
                return samples[last];
            }
            let frac = (pos - idx as f64) as f32;
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        })
        .collect()
}
