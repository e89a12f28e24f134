//! Render signatures
//!
//! A signature fingerprints everything that changes the rendered pixels or
//! audio: the source audio bytes plus the render-relevant subset of the
//! analysis. Two manifests with equal signatures render identically, which
//! is what lets the orchestrator skip redundant renders.

use crate::error::Result;
use crate::types::{AnalysisBlock, KeyMode, Manifest};
use ring::digest::{Context, SHA256};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Signature scheme prefix
pub const SIGNATURE_PREFIX: &str = "rv1-";

/// Hex characters kept from the digest
const SIGNATURE_HEX_LEN: usize = 12;

/// Read block size for file hashing
const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// Lowercase hex encoding of a digest
fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 of a byte slice as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut context = Context::new(&SHA256);
    context.update(bytes);
    to_hex(context.finish().as_ref())
}

/// SHA-256 of a file, streamed in 64 KiB blocks
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut context = Context::new(&SHA256);
    let mut buf = vec![0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.update(&buf[..n]);
    }
    Ok(to_hex(context.finish().as_ref()))
}

/// Render-affecting subset of a manifest
///
/// Fields are declared in lexicographic order so the serialized form is
/// canonical.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderInputs {
    pub beat_count: usize,
    pub bpm: f64,
    pub duration_seconds: f64,
    pub energy: f64,
    pub key: String,
    pub key_confidence: f64,
    pub mode: KeyMode,
    pub mode_confidence: f64,
    pub mood: String,
}

impl RenderInputs {
    /// Build from an analysis block and a resolved mood name
    pub fn new(analysis: &AnalysisBlock, mood: &str) -> Self {
        Self {
            beat_count: analysis.beat_count,
            bpm: analysis.bpm,
            duration_seconds: analysis.duration_seconds,
            energy: analysis.energy,
            key: analysis.key.clone(),
            key_confidence: analysis.key_confidence,
            mode: analysis.mode,
            mode_confidence: analysis.mode_confidence,
            mood: mood.to_string(),
        }
    }

    /// Extract from a manifest; `None` until the manifest has been analyzed
    pub fn from_manifest(manifest: &Manifest) -> Option<Self> {
        let analysis = manifest.analysis()?;
        let mood = manifest.mood()?;
        Some(Self::new(analysis, &mood.name))
    }

    fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Compute the render signature for audio bytes and render inputs
pub fn compute_signature(audio_bytes: &[u8], inputs: &RenderInputs) -> Result<String> {
    let audio_hash = sha256_hex(audio_bytes);
    let manifest_json = inputs.canonical_json()?;

    let mut context = Context::new(&SHA256);
    context.update(format!("audio:{}", audio_hash).as_bytes());
    context.update(format!("manifest:{}", manifest_json).as_bytes());
    let digest = to_hex(context.finish().as_ref());

    Ok(format!("{}{}", SIGNATURE_PREFIX, &digest[..SIGNATURE_HEX_LEN]))
}

/// Whether a string is a well-formed signature
pub fn is_valid_signature(s: &str) -> bool {
    s.strip_prefix(SIGNATURE_PREFIX)
        .map(|hex| hex.len() == SIGNATURE_HEX_LEN && hex.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}
