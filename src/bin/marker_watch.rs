//! marker_watch - checkpoint marker watcher daemon
//!
//! This daemon:
//! 1. Loads the checkpoint preset, config file and environment overrides
//! 2. Reconciles the save directory left by a previous run
//! 3. Builds the occlusion detector from the first frame it can fetch
//! 4. Polls the camera and uploads a photo once per completed occlusion
//!
//! Exit status: 0 on Ctrl-C, 2 on a fatal configuration error, 1 otherwise.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use marker_watch::{
    fatal_config_error, Checkpoint, DetectorKind, FrameSource, HttpUploader, RecordingUploader,
    ReplaySource, SnapshotSource, Uploader, Watcher, WatcherConfig,
};

const EXIT_FATAL_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Watch a checkpoint camera for covered markers and upload a photo per passage"
)]
struct Args {
    /// Deployment preset (entry or exit).
    #[arg(long)]
    checkpoint: Option<Checkpoint>,

    /// Occlusion detector (color or diff).
    #[arg(long)]
    detector: Option<DetectorKind>,

    /// Read frames from a directory of images instead of the camera.
    #[arg(long, env = "MARKER_WATCH_REPLAY_DIR")]
    replay_dir: Option<PathBuf>,

    /// Log uploads instead of posting them.
    #[arg(long)]
    dry_run: bool,

    /// Capture the reference, run a single detection tick and exit.
    #[arg(long)]
    once: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(args) {
        if let Some(fatal) = fatal_config_error(&err) {
            log::error!("{}", fatal);
            log::error!("operator action required; not retrying");
            std::process::exit(EXIT_FATAL_CONFIG);
        }
        log::error!("{:#}", err);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = WatcherConfig::load(args.checkpoint)?;
    if let Some(kind) = args.detector {
        config.detector = kind;
    }
    log::info!(
        "marker_watch {} starting for checkpoint {} (saving to {})",
        env!("CARGO_PKG_VERSION"),
        config.checkpoint.as_str(),
        config.save_dir.display()
    );

    let source: Box<dyn FrameSource> = match &args.replay_dir {
        Some(dir) => Box::new(ReplaySource::new(dir.clone())?),
        None => Box::new(SnapshotSource::new(config.camera.clone())?),
    };
    let uploader: Box<dyn Uploader> = if args.dry_run {
        Box::new(RecordingUploader::default())
    } else {
        log::info!("uploading to {}", config.upload.url);
        Box::new(HttpUploader::new(config.upload.clone()))
    };

    let mut watcher = Watcher::new(&config, source, uploader)?;

    if args.once {
        while !watcher.is_ready() {
            if !watcher.tick(Instant::now())?.fetched {
                std::thread::sleep(config.poll_interval);
            }
        }
        let report = watcher.tick(Instant::now())?;
        log::info!(
            "single tick: fetched={} visible={:?} state={}",
            report.fetched,
            report.visible,
            watcher.state().name()
        );
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping after the current tick");
        flag.store(true, Ordering::SeqCst);
    })?;

    watcher.run(&shutdown)
}
