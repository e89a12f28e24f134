//! Analysis pipeline stage.
//!
//! Takes a song from `ingested` (or any later stage) to `analyzed`: decode
//! and analyze the source audio off the async runtime, resolve mood and
//! poses, fingerprint the render inputs, then persist the manifest and the
//! cache entry.

use crate::{decode, AcousticAnalyzer};
use beatreel_core::cache::{CacheEntry, ContentCache};
use beatreel_core::signature::sha256_hex;
use beatreel_core::{
    compute_signature, CharacterAssigner, Error, Manifest, MoodResolver, PipelineContext,
    PipelineStage, RenderInputs, Result, SongKey,
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What an analysis run produced
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    /// Manifest as saved
    pub manifest: Manifest,
    /// Signature of the fresh render inputs
    pub signature: String,
    /// Stage before the run
    pub previous_stage: PipelineStage,
    pub elapsed: Duration,
}

impl AnalysisReport {
    /// Whether the stored render is still valid for the new analysis
    pub fn render_current(&self) -> bool {
        self.manifest.stage() == PipelineStage::Rendered
    }
}

/// Analyze a song with the configured stage timeout
pub async fn analyze_song(ctx: &PipelineContext, key: &SongKey) -> Result<AnalysisReport> {
    let timeout = Duration::from_secs(ctx.settings.timeouts.analysis_seconds);
    analyze_song_with_timeout(ctx, key, timeout).await
}

/// Analyze a song, failing with `StageTimeout` if the analyzer runs longer
/// than `timeout`
pub async fn analyze_song_with_timeout(
    ctx: &PipelineContext,
    key: &SongKey,
    timeout: Duration,
) -> Result<AnalysisReport> {
    let started = Instant::now();
    let store = ctx.store();
    let mut manifest = store.load_required(key)?;
    let previous_stage = manifest.stage();

    let audio_path = manifest.resolve_audio(&store.song_dir(key));
    let audio_bytes = match tokio::fs::read(&audio_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::AudioMissing { path: audio_path });
        }
        Err(e) => return Err(e.into()),
    };
    info!(song = %key, path = %audio_path.display(), bytes = audio_bytes.len(), "Analyzing");

    let analyzer = AcousticAnalyzer::new(ctx.settings.analyzer.clone());
    let path = audio_path.clone();
    let task = tokio::task::spawn_blocking(move || {
        let audio = decode::load_audio(&path, analyzer.settings().sample_rate).map_err(|e| {
            Error::AudioDecode {
                path: path.clone(),
                reason: format!("{:#}", e),
            }
        })?;
        analyzer
            .analyze(&audio)
            .map_err(|e| Error::analysis(format!("{:#}", e)))
    });

    let analysis = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_error)) => {
            return Err(Error::analysis(format!("analyzer task failed: {}", join_error)));
        }
        Err(_) => {
            warn!(song = %key, seconds = timeout.as_secs(), "Analysis timed out");
            return Err(Error::StageTimeout {
                stage: "analysis",
                seconds: timeout.as_secs(),
            });
        }
    };

    let mood = MoodResolver::new(&ctx.moods, &ctx.genres).resolve(&analysis, &manifest.genre);
    let characters = CharacterAssigner::new(
        ctx.characters_dir(),
        &ctx.settings.characters,
        &ctx.moods,
        &ctx.genres,
    )
    .assign(&mood, &manifest.genre);

    let signature = compute_signature(&audio_bytes, &RenderInputs::new(&analysis, &mood.name))?;
    manifest.source_hash = Some(sha256_hex(&audio_bytes));
    manifest.apply_analysis(analysis, mood, characters, &signature)?;
    store.save(&manifest)?;
    ContentCache::update_entry(&ctx.cache_path(), key, CacheEntry::from_manifest(&manifest))?;

    let elapsed = started.elapsed();
    info!(
        song = %key,
        stage = %manifest.stage(),
        mood = manifest.mood().map(|m| m.name.as_str()).unwrap_or(""),
        signature = %signature,
        elapsed_ms = elapsed.as_millis() as u64,
        "Analysis stored"
    );

    Ok(AnalysisReport {
        manifest,
        signature,
        previous_stage,
        elapsed,
    })
}
