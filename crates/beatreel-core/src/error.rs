//! Error types for beatreel core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    // Manifest errors
    #[error("Manifest not found for {song}: {path}")]
    ManifestNotFound { song: String, path: PathBuf },

    #[error("Failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    #[error("Invalid pipeline stage transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Manifest for {song} has no analysis block")]
    MissingAnalysis { song: String },

    // Input errors
    #[error("Source audio not found: {}", .path.display())]
    AudioMissing { path: PathBuf },

    #[error("Failed to decode audio {}: {reason}", .path.display())]
    AudioDecode { path: PathBuf, reason: String },

    // Stage errors
    #[error("Analysis failed: {0}")]
    Analysis(String),

    #[error("Stage '{stage}' timed out after {seconds}s")]
    StageTimeout { stage: &'static str, seconds: u64 },

    #[error("Preflight failed: {} missing asset(s)", .missing.len())]
    PreflightFailed { missing: Vec<PathBuf> },

    // Render engine errors
    #[error("Render engine exited with {}: {diagnostic}", .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    RenderFailed {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    #[error("Render engine timed out after {seconds}s")]
    RenderTimeout { seconds: u64 },

    #[error("Render engine not found: {program}")]
    EngineNotFound { program: String },

    #[error("Render produced an empty output: {}", .path.display())]
    EmptyOutput { path: PathBuf },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an analysis error
    pub fn analysis(msg: impl Into<String>) -> Self {
        Error::Analysis(msg.into())
    }

    /// Returns true if re-running the same stage may succeed without
    /// changing its inputs
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::StageTimeout { .. }
                | Error::RenderTimeout { .. }
                | Error::RenderFailed { .. }
                | Error::PreflightFailed { .. }
        )
    }

    /// Returns the error code for logs and JSON output
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::ManifestNotFound { .. } => "MANIFEST_NOT_FOUND",
            Error::ManifestParse { .. } => "MANIFEST_PARSE",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::MissingAnalysis { .. } => "MISSING_ANALYSIS",
            Error::AudioMissing { .. } => "AUDIO_MISSING",
            Error::AudioDecode { .. } => "AUDIO_DECODE",
            Error::Analysis(_) => "ANALYSIS",
            Error::StageTimeout { .. } => "STAGE_TIMEOUT",
            Error::PreflightFailed { .. } => "PREFLIGHT",
            Error::RenderFailed { .. } => "RENDER_FAILED",
            Error::RenderTimeout { .. } => "RENDER_TIMEOUT",
            Error::EngineNotFound { .. } => "ENGINE_NOT_FOUND",
            Error::EmptyOutput { .. } => "EMPTY_OUTPUT",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
        }
    }

    /// Process exit code for CLI front-ends: 2 for a preflight abort,
    /// 1 for everything else
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::PreflightFailed { .. } => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preflight_exit_code() {
        let err = Error::PreflightFailed {
            missing: vec![PathBuf::from("assets/characters/weeter/happy/a.png")],
        };
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.error_code(), "PREFLIGHT");
        assert!(err.to_string().contains("1 missing"));
    }

    #[test]
    fn test_timeout_is_distinct_from_analysis_failure() {
        let timeout = Error::StageTimeout { stage: "analysis", seconds: 600 };
        let failure = Error::analysis("onset envelope empty");
        assert_ne!(timeout.error_code(), failure.error_code());
        assert!(timeout.is_recoverable());
        assert!(!failure.is_recoverable());
        assert_eq!(failure.exit_code(), 1);
    }

    #[test]
    fn test_render_failed_without_code() {
        let err = Error::RenderFailed { exit_code: None, diagnostic: "killed".into() };
        assert!(err.to_string().contains("signal"));
    }
}
