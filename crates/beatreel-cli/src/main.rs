//! Beatreel CLI - beat-synchronized music video pipeline
//!
//! Features:
//! - Acoustic analysis into the song manifest
//! - Idempotent ffmpeg renders gated by asset preflight
//! - Render signature inspection
//! - Catalog cache maintenance

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use output::OutputFormat;

/// Beatreel CLI - music video pipeline
#[derive(Parser)]
#[command(name = "beatreel")]
#[command(author = "Purple Squirrel Media")]
#[command(version)]
#[command(about = "Beat-synchronized music video pipeline", long_about = None)]
struct Cli {
    /// Project root containing catalog/, data/ and assets/
    #[arg(long, default_value = ".", global = true)]
    project_root: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a song's source audio
    Analyze {
        /// Song identifier
        song_id: String,

        /// Artist identifier
        artist: String,
    },

    /// Render the master video
    Render {
        /// Song identifier
        song_id: String,

        /// Artist identifier
        artist: String,

        /// Render even when the stored signature is current
        #[arg(long)]
        force: bool,
    },

    /// Check that every asset a render needs is present
    Preflight {
        /// Song identifier
        song_id: String,

        /// Artist identifier
        artist: String,
    },

    /// Compute the source hash and render signature for an audio file
    Signature {
        /// Audio file
        audio: PathBuf,

        /// Manifest supplying the render fields
        #[arg(short, long)]
        manifest: Option<PathBuf>,
    },

    /// Inspect or rebuild the catalog cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// List every song in the catalog
    List,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cached entries
    Show,

    /// Regenerate the cache from manifests
    Rebuild,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    beatreel_core::init();

    let format = OutputFormat::from(cli.format.as_str());
    let root = cli.project_root;

    let result = match cli.command {
        Commands::Analyze { song_id, artist } => {
            commands::analyze(&root, &artist, &song_id, format).await
        }
        Commands::Render { song_id, artist, force } => {
            commands::render(&root, &artist, &song_id, force, format).await
        }
        Commands::Preflight { song_id, artist } => {
            commands::preflight(&root, &artist, &song_id, format)
        }
        Commands::Signature { audio, manifest } => {
            commands::signature(&audio, manifest.as_deref(), format)
        }
        Commands::Cache { action } => match action {
            CacheAction::Show => commands::cache_show(&root, format),
            CacheAction::Rebuild => commands::cache_rebuild(&root, format),
        },
        Commands::List => commands::list(&root, format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&e, format);
            ExitCode::from(output::exit_code(&e))
        }
    }
}
