//! audiorelay CLI - Resumable bulk audio acquisition with relay to remote storage.

use anyhow::{Context, Result};
use audiorelay::client::{AcquisitionWorker, AvailabilityFilter, InnerTubeClient, Rsync, TransferSink, YtDlp};
use audiorelay::pipeline::{CreationEvents, PipelineOptions, PullPipeline, WatchPipeline, load_identifiers};
use audiorelay::{CheckpointStore, Config, JobRunner, RelayError};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "audiorelay")]
#[command(version)]
#[command(about = "Resumable bulk audio acquisition with relay to remote storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and relay a slice of an identifier list
    Run {
        /// File with one identifier per line
        #[arg(short, long)]
        ids: PathBuf,

        /// Local directory for fetched artifacts
        #[arg(short, long)]
        out_dir: Option<PathBuf>,

        /// Cookies file passed to the acquisition tool
        #[arg(long)]
        cookies: Option<PathBuf>,

        /// Number of concurrent jobs (1 = sequential)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Skip identifiers already present in the music catalog
        #[arg(long)]
        filter_music: bool,

        /// First index of the sorted identifier list (inclusive)
        #[arg(long, default_value = "0")]
        start: usize,

        /// Last index of the sorted identifier list (exclusive)
        #[arg(long, default_value = "3000")]
        stop: usize,

        /// Checkpoint file of completed identifiers
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Relay every new artifact that appears in a directory
    Watch {
        /// Directory to observe
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set subscriber: {e}");
    }
}

fn print_example_config() {
    let example = r#"# audiorelay configuration file

[acquisition]
program = "yt-dlp"
output_dir = "wavs"
format = "bestaudio/best"
audio_format = "wav"
audio_quality = "0"
url_template = "https://www.youtube.com/watch?v={id}"
player_client = "web"
skip_live = true
# cookies = "~/cookies.txt"

[transfer]
program = "rsync"
# Remote destination (supports ${VAR} expansion)
destination = "${RELAY_HOST}:/scratch/wavs/"
bwlimit_kbps = 20000
# ssh_key = "~/.ssh/id_ed25519"

[catalog]
enabled = false
attempts = 5
timeout_secs = 30

[pipeline]
workers = 1
checkpoint_path = "collected_ids.txt"
flush_every = 20
failure_threshold = 50
delay_min_secs = 2.0
delay_max_secs = 6.0

[watch]
# directory = "wavs"
recursive = true
"#;
    println!("{example}");
}

fn load_config(path: &Path) -> Result<Config> {
    let config =
        Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))?;
    Ok(config)
}

/// Token cancelled by the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, letting in-flight jobs finish");
            trigger.cancel();
        }
    });
    token
}

fn transfer_sink(config: &Config) -> TransferSink {
    TransferSink::new(
        Arc::new(Rsync::new(&config.transfer)),
        config.transfer.destination.clone(),
    )
}

async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;

            info!("Configuration is valid");
            info!("  Destination: {}", config.transfer.destination);
            info!(
                "  Workers: {} (flush every {}, abort after {} consecutive failures)",
                config.pipeline.workers,
                config.pipeline.flush_every,
                config.pipeline.failure_threshold
            );
            info!(
                "  Catalog filter: {}",
                if config.catalog.enabled { "on" } else { "off" }
            );
        }

        Commands::Run {
            ids,
            out_dir,
            cookies,
            threads,
            filter_music,
            start,
            stop,
            checkpoint,
        } => {
            let mut config = load_config(&cli.config)?;

            // CLI overrides
            if let Some(dir) = out_dir {
                config.acquisition.output_dir = dir;
            }
            if cookies.is_some() {
                config.acquisition.cookies = cookies;
            }
            if let Some(threads) = threads {
                config.pipeline.workers = threads;
            }
            if filter_music {
                config.catalog.enabled = true;
            }
            if let Some(path) = checkpoint {
                config.pipeline.checkpoint_path = path;
            }
            config.validate().context("Invalid configuration")?;

            let output_dir = config.acquisition.output_dir.clone();
            std::fs::create_dir_all(&output_dir)
                .with_context(|| format!("Failed to create output directory {output_dir:?}"))?;

            let identifiers = load_identifiers(&ids, start..stop)?;
            let store = CheckpointStore::load(&config.pipeline.checkpoint_path)
                .context("Failed to load checkpoint")?;

            let acquisition = AcquisitionWorker::new(
                Arc::new(YtDlp::new(config.acquisition.clone())),
                output_dir.clone(),
                config.acquisition.audio_format.clone(),
            );
            let mut runner = JobRunner::new(acquisition, transfer_sink(&config));
            if config.catalog.enabled {
                let client = InnerTubeClient::new(&config.catalog)
                    .context("Failed to create catalog client")?;
                runner = runner.with_filter(AvailabilityFilter::new(
                    Arc::new(client),
                    config.catalog.attempts,
                ));
            }

            let pipeline = PullPipeline::new(runner, PipelineOptions::from_config(&config.pipeline));
            let stats = pipeline
                .run(identifiers, store, cancel_on_ctrl_c())
                .await?;

            println!("\n=== Run Complete ===");
            println!("Identifiers: {}", stats.total);
            println!("Resumed:     {}", stats.already_checkpointed);
            println!("Catalogued:  {}", stats.catalogued);
            println!("Relayed:     {}", stats.succeeded);
            println!("Failed:      {}", stats.failed);
            println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            println!("Runtime:     {:.1}s", stats.runtime_secs);
            if stats.interrupted {
                println!("Status:      interrupted");
            }
            println!("Checkpoint:  {:?}", config.pipeline.checkpoint_path);
        }

        Commands::Watch { dir } => {
            let config = load_config(&cli.config)?;
            config.validate().context("Invalid configuration")?;

            let dir = dir
                .or_else(|| config.watch.directory.clone())
                .context("No directory to watch: pass --dir or set watch.directory")?;
            if !dir.is_dir() {
                anyhow::bail!("Watch directory {dir:?} does not exist");
            }

            let events = CreationEvents::watch(
                &dir,
                config.watch.recursive,
                &config.acquisition.audio_format,
            )?;
            let pipeline = WatchPipeline::new(transfer_sink(&config));
            let stats = pipeline.run(events, cancel_on_ctrl_c()).await;

            println!("\n=== Watch Complete ===");
            println!("Relayed:     {}", stats.relayed);
            println!("Failed:      {}", stats.failed);
            println!("Directory:   {dir:?}");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<RelayError>())
                .map_or(1, RelayError::exit_code);
            ExitCode::from(code)
        }
    }
}
