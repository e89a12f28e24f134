//! CLI command implementations

use crate::output::{format_bytes, print_json, spinner, OutputFormat};
use anyhow::Context;
use beatreel_analysis::analyze_song;
use beatreel_core::preflight::check as check_assets;
use beatreel_core::{
    compute_signature, file_sha256, ContentCache, Error, FfmpegEngine, Manifest,
    PipelineContext, RenderEngine, RenderInputs, RenderOrchestrator, RenderOutcome, SongKey,
};
use console::style;
use std::path::Path;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Analyze a song's source audio
pub async fn analyze(
    root: &Path,
    artist: &str,
    song_id: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let ctx = PipelineContext::load(root);
    let key = SongKey::new(artist, song_id);

    let bar = spinner(format!("Analyzing {}", key), format);
    let result = analyze_song(&ctx, &key).await;
    bar.finish_and_clear();
    let report = result?;

    let manifest = &report.manifest;
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "status": "analyzed",
            "song": key.to_string(),
            "previous_stage": report.previous_stage,
            "stage": manifest.stage(),
            "render_signature": report.signature,
            "analysis": manifest.analysis(),
            "mood": manifest.mood(),
            "characters": manifest.characters(),
            "elapsed_ms": report.elapsed.as_millis() as u64,
        }));
    }

    println!("{} {}", style("Analyzed").green().bold(), key);
    if let Some(a) = manifest.analysis() {
        println!("\nAnalysis:");
        println!("  Tempo:    {:.1} BPM ({} beats)", a.bpm, a.beat_count);
        println!(
            "  Key:      {} (key {:.2}, mode {:.2})",
            a.key_full, a.key_confidence, a.mode_confidence
        );
        println!("  Energy:   {:.3}", a.energy);
        println!("  Duration: {:.2}s", a.duration_seconds);
        println!("  Segments: {}", a.segments.len());
    }
    if let Some(mood) = manifest.mood() {
        println!("\nMood: {}", style(&mood.name).cyan());
        if let Some(reason) = &mood.safety_valve_reason {
            println!("  Safety valve: {}", reason);
        } else if let Some(rule) = &mood.rule {
            println!("  Rule: {}", rule);
        } else if mood.fallback_used {
            println!("  No rule matched, fallback mood");
        }
    }
    if let Some(characters) = manifest.characters() {
        println!("\nPoses:");
        for (name, pose) in &characters.poses {
            println!("  {:<10} {} ({})", name, pose.pose.display(), pose.animation);
        }
    }
    println!("\nStage: {} -> {}", report.previous_stage, manifest.stage());
    println!("Signature: {}", report.signature);
    if report.render_current() {
        println!("Existing render is still current");
    }

    Ok(())
}

/// Render the master video
pub async fn render(
    root: &Path,
    artist: &str,
    song_id: &str,
    force: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let ctx = PipelineContext::load(root);
    let key = SongKey::new(artist, song_id);
    let engine = FfmpegEngine::from_context(&ctx);
    tracing::debug!("Render engine: {}", engine.name());

    let orchestrator = RenderOrchestrator::new(&ctx, engine);
    let bar = spinner(format!("Rendering {}", key), format);
    let result = orchestrator.render(&key, force).await;
    bar.finish_and_clear();

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(Error::PreflightFailed { missing }) => {
            if format == OutputFormat::Text {
                eprintln!("{} for {}:", style("Preflight failed").yellow().bold(), key);
                for path in &missing {
                    eprintln!("  missing {}", path.display());
                }
            }
            return Err(Error::PreflightFailed { missing }.into());
        }
        Err(e) => return Err(e.into()),
    };

    match (&outcome, format) {
        (RenderOutcome::Skipped { signature, reason }, OutputFormat::Json) => {
            print_json(&serde_json::json!({
                "status": "skipped",
                "song": key.to_string(),
                "render_signature": signature,
                "reason": reason,
            }))?;
        }
        (RenderOutcome::Skipped { signature, reason }, OutputFormat::Text) => {
            println!("{} {} ({})", style("Skipped").dim(), key, reason);
            println!("Signature: {}", signature);
        }
        (
            RenderOutcome::Rendered { signature, output, size_bytes, elapsed },
            OutputFormat::Json,
        ) => {
            print_json(&serde_json::json!({
                "status": "rendered",
                "song": key.to_string(),
                "render_signature": signature,
                "output": output,
                "size_bytes": size_bytes,
                "elapsed_ms": elapsed.as_millis() as u64,
            }))?;
        }
        (
            RenderOutcome::Rendered { signature, output, size_bytes, elapsed },
            OutputFormat::Text,
        ) => {
            println!("{} {}", style("Rendered").green().bold(), key);
            println!("  Output:    {}", output.display());
            println!("  Size:      {}", format_bytes(*size_bytes));
            println!("  Elapsed:   {:.1}s", elapsed.as_secs_f64());
            println!("  Signature: {}", signature);
        }
    }

    Ok(())
}

#[derive(Tabled)]
struct AssetRow {
    #[tabled(rename = "Asset")]
    kind: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Status")]
    status: String,
}

/// Report asset presence without touching the manifest
pub fn preflight(
    root: &Path,
    artist: &str,
    song_id: &str,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let ctx = PipelineContext::load(root);
    let key = SongKey::new(artist, song_id);
    let manifest = ctx.store().load_required(&key)?;
    let report = check_assets(&manifest, &ctx);

    if format == OutputFormat::Json {
        print_json(&serde_json::json!({
            "song": key.to_string(),
            "passed": report.passed(),
            "items": report.items,
        }))?;
    } else {
        let rows: Vec<AssetRow> = report
            .items
            .iter()
            .map(|item| AssetRow {
                kind: item.kind.to_string(),
                path: item.path.display().to_string(),
                status: if item.present { "ok" } else { "MISSING" }.to_string(),
            })
            .collect();
        println!("Preflight for {}:\n", key);
        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    if report.passed() {
        if format == OutputFormat::Text {
            println!("\n{}", style("All assets present").green());
        }
        Ok(())
    } else {
        Err(Error::PreflightFailed { missing: report.missing() }.into())
    }
}

/// Source hash and, given a manifest, the render signature for an audio file
pub fn signature(
    audio: &Path,
    manifest_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(audio)
        .with_context(|| format!("Failed to read audio {}", audio.display()))?;
    let source_hash = file_sha256(audio)?;

    let mut signature = None;
    let mut stored = None;
    if let Some(path) = manifest_path {
        let text = std::fs::read(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_slice(&text).map_err(|e| {
            Error::ManifestParse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        let key = manifest.key();
        let inputs = RenderInputs::from_manifest(&manifest)
            .ok_or(Error::MissingAnalysis { song: key.to_string() })?;
        signature = Some(compute_signature(&bytes, &inputs)?);
        stored = manifest.render_signature().map(str::to_string);
    }

    let current = match (&signature, &stored) {
        (Some(fresh), Some(old)) => Some(fresh == old),
        _ => None,
    };

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "audio": audio,
            "source_hash": source_hash,
            "render_signature": signature,
            "stored_signature": stored,
            "current": current,
        }));
    }

    println!("Source hash: {}", source_hash);
    if let Some(sig) = &signature {
        println!("Signature:   {}", sig);
    }
    match (current, &stored) {
        (Some(true), _) => println!("{}", style("Stored signature is current").green()),
        (Some(false), Some(old)) => {
            println!("{} (stored {})", style("Stored signature is stale").yellow(), old)
        }
        _ => {}
    }
    Ok(())
}

#[derive(Tabled)]
struct CacheRow {
    #[tabled(rename = "Song")]
    song: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "BPM")]
    bpm: String,
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Mood")]
    mood: String,
    #[tabled(rename = "Signature")]
    signature: String,
}

/// Show the cache file contents
pub fn cache_show(root: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let ctx = PipelineContext::load(root);
    let cache = ContentCache::load(&ctx.cache_path());

    if format == OutputFormat::Json {
        return print_json(&cache);
    }
    if cache.is_empty() {
        println!("Cache is empty ({})", ctx.cache_path().display());
        return Ok(());
    }

    let rows: Vec<CacheRow> = cache
        .iter()
        .map(|(song, entry)| {
            let summary = entry.analysis.as_ref();
            CacheRow {
                song: song.to_string(),
                stage: entry.pipeline_stage.to_string(),
                bpm: summary.map(|a| format!("{:.1}", a.bpm)).unwrap_or_default(),
                key: summary.map(|a| a.key.clone()).unwrap_or_default(),
                mood: summary.map(|a| a.mood.clone()).unwrap_or_default(),
                signature: entry.render_signature.clone().unwrap_or_default(),
            }
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    println!("{} entries", cache.len());
    Ok(())
}

/// Regenerate the cache from every manifest
pub fn cache_rebuild(root: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let ctx = PipelineContext::load(root);
    let cache = ContentCache::rebuild(&ctx.store())?;
    cache.save(&ctx.cache_path())?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "status": "rebuilt",
            "entries": cache.len(),
            "path": ctx.cache_path(),
        }));
    }
    println!(
        "{} cache with {} entries at {}",
        style("Rebuilt").green().bold(),
        cache.len(),
        ctx.cache_path().display()
    );
    Ok(())
}

#[derive(Tabled)]
struct SongRow {
    #[tabled(rename = "Artist")]
    artist: String,
    #[tabled(rename = "Song")]
    song: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Genre")]
    genre: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Mood")]
    mood: String,
}

/// List the catalog from manifests
pub fn list(root: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let ctx = PipelineContext::load(root);
    let store = ctx.store();

    let mut manifests = Vec::new();
    for key in store.list()? {
        match store.load(&key) {
            Ok(Some(manifest)) => manifests.push(manifest),
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping {}: {}", key, e),
        }
    }

    if format == OutputFormat::Json {
        return print_json(&manifests);
    }
    if manifests.is_empty() {
        println!("No songs under {}", store.catalog_dir().display());
        return Ok(());
    }

    let rows: Vec<SongRow> = manifests
        .iter()
        .map(|m| SongRow {
            artist: m.artist.clone(),
            song: m.song_id.clone(),
            title: m.title.clone(),
            genre: m.genre.clone(),
            stage: m.stage().to_string(),
            mood: m.mood().map(|mood| mood.name.clone()).unwrap_or_default(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
    Ok(())
}
