//! Preflight asset validation
//!
//! A read-only probe run before any render subprocess is started. It only
//! checks that every referenced file exists; it never creates or repairs
//! anything.

use crate::context::PipelineContext;
use crate::types::Manifest;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// What a probed asset is used for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Pose { character: String },
    EndcardTemplate,
    SourceAudio,
    BackgroundImage,
    Font,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::Pose { character } => write!(f, "pose ({})", character),
            AssetKind::EndcardTemplate => write!(f, "end-card template"),
            AssetKind::SourceAudio => write!(f, "source audio"),
            AssetKind::BackgroundImage => write!(f, "background image"),
            AssetKind::Font => write!(f, "font"),
        }
    }
}

/// One probed asset
#[derive(Debug, Clone, Serialize)]
pub struct PreflightItem {
    pub kind: AssetKind,
    /// Path relative to the project root when it lies under it
    pub path: PathBuf,
    pub present: bool,
}

/// Result of a preflight run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    pub items: Vec<PreflightItem>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.items.iter().all(|item| item.present)
    }

    /// Missing asset paths, in probe order
    pub fn missing(&self) -> Vec<PathBuf> {
        self.items
            .iter()
            .filter(|item| !item.present)
            .map(|item| item.path.clone())
            .collect()
    }
}

/// Probe every asset a render of `manifest` would read
pub fn check(manifest: &Manifest, ctx: &PipelineContext) -> PreflightReport {
    let mut wanted: Vec<(AssetKind, PathBuf)> = Vec::new();

    if let Some(characters) = manifest.characters() {
        let base = ctx.characters_dir();
        for (character, pose) in &characters.poses {
            wanted.push((
                AssetKind::Pose { character: character.clone() },
                base.join(&pose.pose),
            ));
        }
    }
    if let Some(template) = &ctx.recipe.endcard.template {
        wanted.push((AssetKind::EndcardTemplate, ctx.resolve(template)));
    }
    let song_dir = ctx.store().song_dir(&manifest.key());
    wanted.push((AssetKind::SourceAudio, manifest.resolve_audio(&song_dir)));
    if let Some(background) = &manifest.background_image {
        wanted.push((AssetKind::BackgroundImage, ctx.resolve(background)));
    }
    if let Some(font) = &ctx.recipe.composition.font_file {
        wanted.push((AssetKind::Font, ctx.resolve(font)));
    }

    let items: Vec<PreflightItem> = wanted
        .into_iter()
        .map(|(kind, path)| {
            let present = path.is_file();
            if !present {
                warn!("Preflight: missing {} at {}", kind, path.display());
            }
            PreflightItem {
                kind,
                path: ctx.relativize(&path),
                present,
            }
        })
        .collect();

    debug!(
        "Preflight for {}: {} assets, {} missing",
        manifest.key(),
        items.len(),
        items.iter().filter(|i| !i.present).count()
    );
    PreflightReport { items }
}
