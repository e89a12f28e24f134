//! Beatreel Core - analysis-to-render pipeline for beat-synchronized videos
//!
//! This crate provides everything between an analyzed audio track and a
//! rendered video:
//! - Per-song manifests with an explicit pipeline state machine
//! - A non-authoritative content cache mirroring the manifests
//! - Render signatures for idempotent re-render detection
//! - Mood resolution with a confidence safety valve
//! - Character pose assignment
//! - Preflight asset validation
//! - Expression synthesis for the engine's per-frame filter graph
//! - Render orchestration around an external engine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Beatreel Core                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │     Mood     │  │  Character   │  │   Render     │           │
//! │  │   Resolver   │  │   Assigner   │  │  Signature   │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Manifest   │◄──── Content Cache           │
//! │                    │    Store    │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │  Preflight   │──│   Render    │──│  Expression  │            │
//! │  │  Validator   │  │ Orchestrator│  │  Synthesizer │            │
//! │  └──────────────┘  └──────┬──────┘  └──────────────┘            │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │ RenderEngine│ (ffmpeg subprocess)          │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod types;
pub mod atomic;
pub mod signature;
pub mod manifest;
pub mod cache;
pub mod condition;
pub mod config;
pub mod context;
pub mod mood;
pub mod characters;
pub mod preflight;
pub mod expression;
pub mod filter_graph;
pub mod render;

pub use error::{Error, Result};
pub use types::*;
pub use signature::{compute_signature, file_sha256, is_valid_signature, RenderInputs};
pub use manifest::ManifestStore;
pub use cache::{CacheEntry, ContentCache};
pub use condition::{Condition, ConditionSpec};
pub use config::{GenreDefaults, MoodConfig, PipelineSettings, RenderRecipe};
pub use context::PipelineContext;
pub use mood::MoodResolver;
pub use characters::CharacterAssigner;
pub use preflight::{PreflightReport, AssetKind};
pub use expression::{Expr, ExpressionSynthesizer, Timeline, Var};
pub use filter_graph::RenderJob;
pub use render::{FfmpegEngine, RenderEngine, RenderOrchestrator, RenderOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log library initialization
pub fn init() {
    tracing::info!(version = VERSION, "Beatreel Core initialized");
}
