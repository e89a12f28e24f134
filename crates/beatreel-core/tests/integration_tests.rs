//! Integration tests for Beatreel Core

use async_trait::async_trait;
use beatreel_core::{
    compute_signature, AnalysisBlock, CharacterAssigner, ContentCache, Error, KeyMode, Manifest,
    MoodResolver, PipelineContext, PipelineStage, RenderEngine, RenderInputs, RenderJob,
    RenderOrchestrator, RenderOutcome, Result, SongKey,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    Succeed,
    Fail,
    WriteNothing,
}

#[derive(Clone)]
struct FakeEngine {
    runs: Arc<AtomicUsize>,
    behavior: Behavior,
}

impl FakeEngine {
    fn new(behavior: Behavior) -> Self {
        Self {
            runs: Arc::new(AtomicUsize::new(0)),
            behavior,
        }
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderEngine for FakeEngine {
    async fn run(&self, job: &RenderJob) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        assert!(job.args.iter().any(|a| a == "-filter_complex"));
        match self.behavior {
            Behavior::Succeed => {
                tokio::fs::write(&job.output, b"not really an mp4").await?;
                Ok(())
            }
            Behavior::Fail => {
                tokio::fs::write(&job.output, b"half").await?;
                Err(Error::RenderFailed {
                    exit_code: Some(1),
                    diagnostic: "Invalid argument".to_string(),
                })
            }
            Behavior::WriteNothing => Ok(()),
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

fn analysis(bpm: f64) -> AnalysisBlock {
    AnalysisBlock {
        bpm,
        beat_count: 4,
        beat_times: vec![0.5, 1.0, 1.5, 2.0],
        beats_per_second: 2.0,
        key: "G".into(),
        mode: KeyMode::Major,
        key_full: "G major".into(),
        key_confidence: 0.4,
        mode_confidence: 0.3,
        energy: 0.6,
        rms_mean: 0.09,
        rms_max: 0.3,
        spectral_centroid_mean: 1800.0,
        energy_curve: vec![0.2, 0.4, 0.8, 0.6],
        duration_seconds: 12.0,
        segments: vec![],
        analyzer_version: "test".into(),
    }
}

/// Project with one analyzed song; returns the context and the song key
fn analyzed_project(root: &Path, create_poses: bool) -> (PipelineContext, SongKey) {
    let ctx = PipelineContext::load(root);
    let key = SongKey::new("mc_fluff", "bubble");
    let song_dir = ctx.store().song_dir(&key);
    fs::create_dir_all(&song_dir).unwrap();
    fs::write(song_dir.join("bubble.wav"), b"RIFF fake audio").unwrap();

    let mut manifest = Manifest::new(&key, "Bubble Song", "pop", "bubble.wav");
    let block = analysis(120.0);
    let mood = MoodResolver::new(&ctx.moods, &ctx.genres).resolve(&block, "pop");
    let characters = CharacterAssigner::new(
        ctx.characters_dir(),
        &ctx.settings.characters,
        &ctx.moods,
        &ctx.genres,
    )
    .assign(&mood, "pop");

    if create_poses {
        for pose in characters.poses.values() {
            touch(&ctx.characters_dir().join(&pose.pose));
        }
    }

    let signature = compute_signature(b"RIFF fake audio", &RenderInputs::new(&block, &mood.name)).unwrap();
    manifest
        .apply_analysis(block, mood, characters, &signature)
        .unwrap();
    ctx.store().save(&manifest).unwrap();
    (ctx, key)
}

fn touch(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"png").unwrap();
}

fn partial_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.to_string_lossy().ends_with(".partial"))
        .collect()
}

// =============================================================================
// Idempotency Tests
// =============================================================================

#[tokio::test]
async fn test_second_render_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let engine = FakeEngine::new(Behavior::Succeed);
    let orchestrator = RenderOrchestrator::new(&ctx, engine.clone());

    let first = orchestrator.render(&key, false).await.unwrap();
    assert!(matches!(first, RenderOutcome::Rendered { .. }));
    let second = orchestrator.render(&key, false).await.unwrap();
    assert!(second.is_skipped());
    assert_eq!(first.signature(), second.signature());
    assert_eq!(engine.runs(), 1);

    let manifest = ctx.store().load_required(&key).unwrap();
    assert_eq!(manifest.stage(), PipelineStage::Rendered);
    assert_eq!(manifest.render_signature(), Some(first.signature()));
    let master = &manifest.outputs()["master"];
    assert_eq!(master.path, PathBuf::from("catalog/mc_fluff/bubble/mc_fluff_bubble_master.mp4"));
    assert_eq!(master.resolution, "1920x1080");
    assert!(master.size_bytes > 0);
    assert!(manifest.source_hash.is_some());
}

#[tokio::test]
async fn test_force_always_renders() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let engine = FakeEngine::new(Behavior::Succeed);
    let orchestrator = RenderOrchestrator::new(&ctx, engine.clone());

    orchestrator.render(&key, false).await.unwrap();
    let forced = orchestrator.render(&key, true).await.unwrap();
    assert!(!forced.is_skipped());
    assert_eq!(engine.runs(), 2);
    assert_eq!(
        ctx.store().load_required(&key).unwrap().stage(),
        PipelineStage::Rendered
    );
}

#[tokio::test]
async fn test_deleted_output_triggers_rerender() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let engine = FakeEngine::new(Behavior::Succeed);
    let orchestrator = RenderOrchestrator::new(&ctx, engine.clone());

    let RenderOutcome::Rendered { output, .. } = orchestrator.render(&key, false).await.unwrap()
    else {
        panic!("expected a render");
    };
    fs::remove_file(&output).unwrap();

    assert!(!orchestrator.render(&key, false).await.unwrap().is_skipped());
    assert_eq!(engine.runs(), 2);
}

#[tokio::test]
async fn test_notes_do_not_affect_signature() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let engine = FakeEngine::new(Behavior::Succeed);
    let orchestrator = RenderOrchestrator::new(&ctx, engine.clone());
    orchestrator.render(&key, false).await.unwrap();

    let store = ctx.store();
    let mut manifest = store.load_required(&key).unwrap();
    manifest.notes = Some("remember to credit the drummer".into());
    store.save(&manifest).unwrap();

    assert!(orchestrator.render(&key, false).await.unwrap().is_skipped());
    assert_eq!(engine.runs(), 1);
}

#[tokio::test]
async fn test_changed_audio_triggers_rerender() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let engine = FakeEngine::new(Behavior::Succeed);
    let orchestrator = RenderOrchestrator::new(&ctx, engine.clone());
    let first = orchestrator.render(&key, false).await.unwrap();

    fs::write(ctx.store().song_dir(&key).join("bubble.wav"), b"RIFF remastered").unwrap();
    let second = orchestrator.render(&key, false).await.unwrap();
    assert!(!second.is_skipped());
    assert_ne!(first.signature(), second.signature());
}

// =============================================================================
// State Machine Tests
// =============================================================================

#[tokio::test]
async fn test_reanalysis_with_same_signature_stays_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let outcome = RenderOrchestrator::new(&ctx, FakeEngine::new(Behavior::Succeed))
        .render(&key, false)
        .await
        .unwrap();

    let store = ctx.store();
    let mut manifest = store.load_required(&key).unwrap();
    let mood = manifest.mood().cloned().unwrap();
    let characters = manifest.characters().cloned().unwrap();
    manifest
        .apply_analysis(analysis(120.0), mood.clone(), characters.clone(), outcome.signature())
        .unwrap();
    assert_eq!(manifest.stage(), PipelineStage::Rendered);

    let changed = analysis(128.0);
    let fresh = compute_signature(b"RIFF fake audio", &RenderInputs::new(&changed, &mood.name)).unwrap();
    assert_ne!(fresh, outcome.signature());
    manifest.apply_analysis(changed, mood, characters, &fresh).unwrap();
    assert_eq!(manifest.stage(), PipelineStage::Analyzed);
}

#[tokio::test]
async fn test_unanalyzed_manifest_cannot_render() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = PipelineContext::load(dir.path());
    let key = SongKey::new("a", "s");
    ctx.store()
        .save(&Manifest::new(&key, "S", "pop", "s.wav"))
        .unwrap();

    let engine = FakeEngine::new(Behavior::Succeed);
    let result = RenderOrchestrator::new(&ctx, engine.clone())
        .render(&key, false)
        .await;
    assert!(matches!(result, Err(Error::MissingAnalysis { .. })));
    assert_eq!(engine.runs(), 0);
}

#[tokio::test]
async fn test_unknown_song_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = PipelineContext::load(dir.path());
    let result = RenderOrchestrator::new(&ctx, FakeEngine::new(Behavior::Succeed))
        .render(&SongKey::new("nobody", "nothing"), false)
        .await;
    assert!(matches!(result, Err(Error::ManifestNotFound { .. })));
}

// =============================================================================
// Preflight Tests
// =============================================================================

#[tokio::test]
async fn test_missing_pose_aborts_without_engine() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), false);
    let engine = FakeEngine::new(Behavior::Succeed);
    let orchestrator = RenderOrchestrator::new(&ctx, engine.clone());

    let err = orchestrator.render(&key, false).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
    let Error::PreflightFailed { missing } = err else {
        panic!("expected preflight failure");
    };
    assert_eq!(missing.len(), 3);
    assert!(missing
        .iter()
        .all(|p| p.starts_with("assets/characters")));
    assert_eq!(engine.runs(), 0);

    let manifest = ctx.store().load_required(&key).unwrap();
    assert_eq!(manifest.stage(), PipelineStage::AbortedPreflight);
    assert_eq!(manifest.missing_assets(), missing.as_slice());

    let cache = ContentCache::load(&ctx.cache_path());
    assert_eq!(
        cache.get(&key).unwrap().pipeline_stage,
        PipelineStage::AbortedPreflight
    );
}

#[tokio::test]
async fn test_render_recovers_after_assets_restored() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), false);
    let engine = FakeEngine::new(Behavior::Succeed);
    let orchestrator = RenderOrchestrator::new(&ctx, engine.clone());
    assert!(orchestrator.render(&key, false).await.is_err());

    let manifest = ctx.store().load_required(&key).unwrap();
    for pose in manifest.characters().unwrap().poses.values() {
        touch(&ctx.characters_dir().join(&pose.pose));
    }

    assert!(!orchestrator.render(&key, false).await.unwrap().is_skipped());
    let manifest = ctx.store().load_required(&key).unwrap();
    assert_eq!(manifest.stage(), PipelineStage::Rendered);
    assert!(manifest.missing_assets().is_empty());
    assert_eq!(engine.runs(), 1);
}

#[tokio::test]
async fn test_missing_audio_is_a_preflight_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    fs::remove_file(ctx.store().song_dir(&key).join("bubble.wav")).unwrap();

    let engine = FakeEngine::new(Behavior::Succeed);
    let err = RenderOrchestrator::new(&ctx, engine.clone())
        .render(&key, false)
        .await
        .unwrap_err();
    let Error::PreflightFailed { missing } = err else {
        panic!("expected preflight failure");
    };
    assert_eq!(missing, vec![PathBuf::from("catalog/mc_fluff/bubble/bubble.wav")]);
    assert_eq!(engine.runs(), 0);
}

// =============================================================================
// Engine Failure Tests
// =============================================================================

#[tokio::test]
async fn test_engine_failure_leaves_manifest_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let before = fs::read(ctx.store().manifest_path(&key)).unwrap();

    let engine = FakeEngine::new(Behavior::Fail);
    let err = RenderOrchestrator::new(&ctx, engine.clone())
        .render(&key, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RenderFailed { exit_code: Some(1), .. }));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(engine.runs(), 1);

    assert_eq!(fs::read(ctx.store().manifest_path(&key)).unwrap(), before);
    let song_dir = ctx.store().song_dir(&key);
    assert!(partial_files(&song_dir).is_empty());
    assert!(!song_dir.join("mc_fluff_bubble_master.mp4").exists());
}

#[tokio::test]
async fn test_empty_output_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);

    let result = RenderOrchestrator::new(&ctx, FakeEngine::new(Behavior::WriteNothing))
        .render(&key, false)
        .await;
    assert!(matches!(result, Err(Error::EmptyOutput { .. })));
    assert_eq!(
        ctx.store().load_required(&key).unwrap().stage(),
        PipelineStage::Analyzed
    );
}

// =============================================================================
// Cache Tests
// =============================================================================

#[tokio::test]
async fn test_cache_mirrors_rendered_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, key) = analyzed_project(dir.path(), true);
    let outcome = RenderOrchestrator::new(&ctx, FakeEngine::new(Behavior::Succeed))
        .render(&key, false)
        .await
        .unwrap();

    let cache = ContentCache::load(&ctx.cache_path());
    let entry = cache.get(&key).unwrap();
    assert_eq!(entry.pipeline_stage, PipelineStage::Rendered);
    assert_eq!(entry.render_signature.as_deref(), Some(outcome.signature()));
    assert_eq!(entry.analysis.as_ref().unwrap().bpm, 120.0);

    let rebuilt = ContentCache::rebuild(&ctx.store()).unwrap();
    assert_eq!(
        rebuilt.get(&key).unwrap().render_signature,
        entry.render_signature
    );
}
