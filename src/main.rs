use std::path::PathBuf;

use clap::{Parser, Subcommand};
use frame_embedder::commands::{
    DEFAULT_SEARCH_LIMIT, add_clip, add_video, run_jobs, search_similar, show_status,
    validate_jobs,
};
use frame_embedder::config::{load_config, show_config};

#[derive(Parser)]
#[command(name = "frame-embedder")]
#[command(about = "Samples video frames, embeds them and keeps the record store and vector index in sync")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, metadata.db and vectors/ (default ~/.frame-embedder)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file, or show the current one
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Validate and re-ingest every source named by a run file
    Run {
        /// TOML run file listing jobs and run options
        run_file: PathBuf,
    },
    /// Report integrity per source without writing anything
    Validate {
        /// TOML run file listing jobs and run options
        run_file: PathBuf,
    },
    /// Find frames similar to a stored frame
    Search {
        /// Id of the stored frame to compare against
        #[arg(long)]
        frame: i64,
        /// Number of neighbours to show
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,
    },
    /// Register a video file
    AddVideo {
        /// Path of the video file
        path: PathBuf,
        /// Optional display name
        #[arg(long)]
        name: Option<String>,
        /// Metadata as key=value, may be repeated
        #[arg(long = "meta")]
        metadata: Vec<String>,
    },
    /// Register a time range of a stored video
    AddClip {
        /// Id of the parent video
        video: i64,
        /// Start time in seconds
        start: f64,
        /// End time in seconds
        end: f64,
        /// Metadata as key=value, may be repeated
        #[arg(long = "meta")]
        metadata: Vec<String>,
    },
    /// Show store counts and service health
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.base_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config);
            } else {
                let path = config.config_file_path();
                if !path.exists() {
                    config.save()?;
                    eprintln!("Wrote default configuration to {}", path.display());
                }
                eprintln!(
                    "Edit {} to change settings, or pass --show to print them",
                    path.display()
                );
            }
        }
        Commands::Run { run_file } => {
            run_jobs(&config, &run_file).await?;
        }
        Commands::Validate { run_file } => {
            validate_jobs(&config, &run_file).await?;
        }
        Commands::Search { frame, limit } => {
            search_similar(&config, frame, limit).await?;
        }
        Commands::AddVideo {
            path,
            name,
            metadata,
        } => {
            add_video(&config, &path, name, &metadata).await?;
        }
        Commands::AddClip {
            video,
            start,
            end,
            metadata,
        } => {
            add_clip(&config, video, start, end, &metadata).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
