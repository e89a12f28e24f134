//! Explicit per-run context
//!
//! Everything a stage needs from the project (paths, configuration) is
//! carried here and passed down, so stages never reach for globals.

use crate::cache::ContentCache;
use crate::config::{
    load_or_default, GenreDefaults, MoodConfig, PipelineSettings, RenderRecipe,
    GENRE_DEFAULTS_FILE, MOOD_MAP_FILE, PIPELINE_FILE, RECIPE_FILE,
};
use crate::manifest::ManifestStore;
use std::path::{Path, PathBuf};
use tracing::info;

/// Catalog directory under the project root
pub const CATALOG_DIR: &str = "catalog";
/// Configuration directory under the project root
pub const DATA_DIR: &str = "data";
/// Character art directory under the project root
pub const CHARACTERS_DIR: &str = "assets/characters";

/// Project paths plus loaded configuration
#[derive(Debug, Clone)]
pub struct PipelineContext {
    root: PathBuf,
    pub moods: MoodConfig,
    pub genres: GenreDefaults,
    pub recipe: RenderRecipe,
    pub settings: PipelineSettings,
}

impl PipelineContext {
    /// Load configuration from `<root>/data`, using defaults for anything
    /// missing or malformed
    pub fn load(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let data = root.join(DATA_DIR);
        let ctx = Self {
            moods: load_or_default(&data.join(MOOD_MAP_FILE)),
            genres: load_or_default(&data.join(GENRE_DEFAULTS_FILE)),
            recipe: load_or_default(&data.join(RECIPE_FILE)),
            settings: load_or_default(&data.join(PIPELINE_FILE)),
            root,
        };
        info!(
            root = %ctx.root.display(),
            rules = ctx.moods.rules.len(),
            genres = ctx.genres.genres.len(),
            "Pipeline context loaded"
        );
        ctx
    }

    /// Build a context from already-loaded parts
    pub fn with_config(
        root: impl Into<PathBuf>,
        moods: MoodConfig,
        genres: GenreDefaults,
        recipe: RenderRecipe,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            root: root.into(),
            moods,
            genres,
            recipe,
            settings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.root.join(CATALOG_DIR)
    }

    pub fn characters_dir(&self) -> PathBuf {
        self.root.join(CHARACTERS_DIR)
    }

    pub fn cache_path(&self) -> PathBuf {
        ContentCache::path_in(&self.catalog_dir())
    }

    pub fn store(&self) -> ManifestStore {
        ManifestStore::new(self.catalog_dir())
    }

    /// Resolve a project-relative path
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    /// Project-relative form of a path under the root, else the path as is
    pub fn relativize(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }
}
