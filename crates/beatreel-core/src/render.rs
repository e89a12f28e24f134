//! Render orchestration
//!
//! The orchestrator decides whether a render is needed, gates it behind
//! preflight, builds the engine job and records the result. The engine
//! itself sits behind [`RenderEngine`] so tests can substitute a fake.

use crate::cache::{CacheEntry, ContentCache};
use crate::context::PipelineContext;
use crate::error::{Error, Result};
use crate::filter_graph::{build_job, RenderJob};
use crate::preflight;
use crate::signature::{compute_signature, sha256_hex, RenderInputs};
use crate::types::{Manifest, OutputRecord, PipelineStage, SongKey};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Output map key of the full-length render
pub const MASTER_OUTPUT: &str = "master";

/// Something that can execute a render job
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Run the job to completion, writing `job.output`
    async fn run(&self, job: &RenderJob) -> Result<()>;

    /// Engine name for logs
    fn name(&self) -> &str;
}

/// Keep the last `max_lines` lines, then at most `max_chars` trailing characters
pub fn stderr_tail(text: &str, max_lines: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    let tail = lines[start..].join("\n");

    let count = tail.chars().count();
    if count <= max_chars {
        tail
    } else {
        tail.chars().skip(count - max_chars).collect()
    }
}

/// ffmpeg subprocess engine
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    program: String,
    timeout: Duration,
    tail_lines: usize,
    tail_chars: usize,
}

impl FfmpegEngine {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            tail_lines: 20,
            tail_chars: 4000,
        }
    }

    /// Engine configured from `pipeline.json`
    pub fn from_context(ctx: &PipelineContext) -> Self {
        let settings = &ctx.settings;
        Self {
            program: settings.engine.program.clone(),
            timeout: Duration::from_secs(settings.timeouts.render_seconds),
            tail_lines: settings.engine.stderr_tail_lines,
            tail_chars: settings.engine.stderr_tail_chars,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn spawn_error(&self, e: std::io::Error) -> Error {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::EngineNotFound {
                program: self.program.clone(),
            }
        } else {
            Error::Io(e)
        }
    }
}

#[async_trait]
impl RenderEngine for FfmpegEngine {
    async fn run(&self, job: &RenderJob) -> Result<()> {
        debug!("Running {} with {} arguments", self.program, job.args.len());

        let mut child = Command::new(&self.program)
            .args(&job.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        // Drain stderr concurrently so a chatty engine never blocks on a full pipe
        let stderr = child.stderr.take();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                let text = reader.await.unwrap_or_default();
                warn!(
                    "{} timed out after {}s:\n{}",
                    self.program,
                    self.timeout.as_secs(),
                    stderr_tail(&text, self.tail_lines, self.tail_chars)
                );
                return Err(Error::RenderTimeout {
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        let text = reader.await.unwrap_or_default();
        if !status.success() {
            return Err(Error::RenderFailed {
                exit_code: status.code(),
                diagnostic: stderr_tail(&text, self.tail_lines, self.tail_chars),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Result of a render request
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Rendered {
        signature: String,
        output: PathBuf,
        size_bytes: u64,
        elapsed: Duration,
    },
    Skipped {
        signature: String,
        reason: String,
    },
}

impl RenderOutcome {
    pub fn signature(&self) -> &str {
        match self {
            RenderOutcome::Rendered { signature, .. } | RenderOutcome::Skipped { signature, .. } => {
                signature
            }
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RenderOutcome::Skipped { .. })
    }
}

/// File name of the master render for a song
pub fn master_file_name(key: &SongKey) -> String {
    format!("{}_{}_master.mp4", key.artist, key.song_id)
}

/// Drives a single song from `analyzed` to `rendered`
pub struct RenderOrchestrator<'a, E: RenderEngine> {
    ctx: &'a PipelineContext,
    engine: E,
}

impl<'a, E: RenderEngine> RenderOrchestrator<'a, E> {
    pub fn new(ctx: &'a PipelineContext, engine: E) -> Self {
        Self { ctx, engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Render a song, or skip it when nothing render-affecting changed
    pub async fn render(&self, key: &SongKey, force: bool) -> Result<RenderOutcome> {
        let store = self.ctx.store();
        let mut manifest = store.load_required(key)?;
        if !manifest.stage().is_renderable() || manifest.analysis().is_none() {
            return Err(Error::MissingAnalysis {
                song: key.to_string(),
            });
        }
        let inputs = RenderInputs::from_manifest(&manifest).ok_or_else(|| Error::MissingAnalysis {
            song: key.to_string(),
        })?;

        let song_dir = store.song_dir(key);
        let audio_path = manifest.resolve_audio(&song_dir);

        // Missing audio is reported by preflight rather than as a read error
        let audio = match tokio::fs::read(&audio_path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let signature = match &audio {
            Some(bytes) => Some(compute_signature(bytes, &inputs)?),
            None => None,
        };

        if let Some(signature) = &signature {
            if !force {
                if let Some(reason) = self.skip_reason(&manifest, signature) {
                    info!(song = %key, signature = %signature, "Render skipped: {}", reason);
                    return Ok(RenderOutcome::Skipped {
                        signature: signature.clone(),
                        reason,
                    });
                }
            }
        }

        // Preflight
        let report = preflight::check(&manifest, self.ctx);
        if !report.passed() {
            let missing = report.missing();
            warn!(song = %key, missing = missing.len(), "Preflight failed, render aborted");
            manifest.abort_preflight(missing.clone())?;
            store.save(&manifest)?;
            self.update_cache(key, &manifest)?;
            return Err(Error::PreflightFailed { missing });
        }
        manifest.recover_from_preflight()?;

        let audio = match audio {
            Some(bytes) => bytes,
            None => tokio::fs::read(&audio_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::AudioMissing { path: audio_path.clone() }
                } else {
                    Error::Io(e)
                }
            })?,
        };
        let signature = match signature {
            Some(signature) => signature,
            None => compute_signature(&audio, &inputs)?,
        };

        // Engine
        let final_output = song_dir.join(master_file_name(key));
        let partial = partial_path(&final_output);
        let job = build_job(&manifest, self.ctx, &partial)?;

        info!(
            song = %key,
            signature = %signature,
            engine = self.engine.name(),
            duration = job.duration_seconds,
            force,
            "Rendering"
        );
        let started = Instant::now();
        if let Err(e) = self.engine.run(&job).await {
            remove_partial(&partial).await;
            return Err(e);
        }
        let elapsed = started.elapsed();

        let size_bytes = match tokio::fs::metadata(&partial).await {
            Ok(meta) if meta.len() > 0 => meta.len(),
            _ => {
                remove_partial(&partial).await;
                return Err(Error::EmptyOutput { path: final_output });
            }
        };
        tokio::fs::rename(&partial, &final_output).await?;

        let record = OutputRecord {
            path: self.ctx.relativize(&final_output),
            format: "mp4".to_string(),
            resolution: self.ctx.recipe.resolution(),
            size_bytes,
            render_time_seconds: (elapsed.as_secs_f64() * 100.0).round() / 100.0,
            render_version: signature.clone(),
        };
        manifest.source_hash = Some(sha256_hex(&audio));
        manifest.mark_rendered(&signature, MASTER_OUTPUT, record)?;
        store.save(&manifest)?;
        self.update_cache(key, &manifest)?;

        info!(
            song = %key,
            size_bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Render complete: {}",
            final_output.display()
        );
        Ok(RenderOutcome::Rendered {
            signature,
            output: final_output,
            size_bytes,
            elapsed,
        })
    }

    /// Why the render can be skipped, if it can
    fn skip_reason(&self, manifest: &Manifest, signature: &str) -> Option<String> {
        if manifest.stage() != PipelineStage::Rendered {
            return None;
        }
        if manifest.render_signature() != Some(signature) {
            return None;
        }
        let outputs = manifest.outputs();
        if outputs.is_empty() {
            return None;
        }
        for (name, output) in outputs {
            if !self.ctx.resolve(&output.path).is_file() {
                debug!("Output '{}' missing at {}, re-rendering", name, output.path.display());
                return None;
            }
        }
        Some("render signature unchanged and outputs present".to_string())
    }

    fn update_cache(&self, key: &SongKey, manifest: &Manifest) -> Result<()> {
        ContentCache::update_entry(&self.ctx.cache_path(), key, CacheEntry::from_manifest(manifest))
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail_lines_and_chars() {
        let text: String = (1..=30).map(|i| format!("line {}\n", i)).collect();
        let tail = stderr_tail(&text, 20, 4000);
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 30"));

        let tail = stderr_tail(&text, 20, 7);
        assert_eq!(tail, "line 30");
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/c/a/s/a_s_master.mp4")),
            PathBuf::from("/c/a/s/a_s_master.mp4.partial")
        );
    }

    #[test]
    fn test_master_file_name() {
        assert_eq!(
            master_file_name(&SongKey::new("mc_fluff", "bubble")),
            "mc_fluff_bubble_master.mp4"
        );
    }

    #[tokio::test]
    async fn test_missing_program_is_engine_not_found() {
        let engine = FfmpegEngine::new("beatreel-no-such-engine", Duration::from_secs(5));
        let job = RenderJob {
            args: vec![],
            output: PathBuf::from("out.mp4"),
            duration_seconds: 1.0,
            filter_graph: String::new(),
        };
        assert!(matches!(
            engine.run(&job).await,
            Err(Error::EngineNotFound { .. })
        ));
    }
}
