//! Headless music player demonstrating flux-dispatch
//!
//! Track loads run as async tasks and report back as `TrackDidLoad` /
//! `TrackDidFail` actions through the dispatch loop. The playlist store
//! records them, the now-playing store waits for the playlist before
//! picking the current track, and its change listener scrobbles through
//! the queue because dispatching from inside a dispatch is refused.
//!
//! ```text
//! RUST_LOG=debug song-flux --track 3 --track 1 --track 7 --skips 1
//! ```

mod action;
mod library;
mod stores;

use std::error::Error;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use flux_dispatch::{
    ComposedMiddleware, DispatchLogger, DispatchLoop, Dispatcher, DispatcherConfig,
    LoggingMiddleware,
};
use tracing_subscriber::EnvFilter;

use crate::action::PlayerAction;
use crate::stores::Player;

#[derive(Parser, Debug)]
#[command(name = "song-flux")]
#[command(about = "A headless music player demonstrating flux-dispatch patterns")]
struct Args {
    /// Track ids to load from the library
    #[arg(long = "track", short, default_values_t = [1, 2, 3])]
    tracks: Vec<u32>,

    /// Simulated library latency in milliseconds
    #[arg(long, default_value = "20")]
    latency_ms: u64,

    /// How many times to skip once every load has finished
    #[arg(long, default_value = "1")]
    skips: usize,

    /// Dispatcher config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the dispatch log as JSON before exiting
    #[arg(long)]
    dump_log: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<DispatcherConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(DispatcherConfig::from_json(&json)?)
        }
        None => Ok(DispatcherConfig::labeled("song-flux")),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    let config = load_config(args.config.as_ref())?;
    let logger = DispatchLogger::from_config(&config.log);
    let log = logger.log_handle();
    let middleware = ComposedMiddleware::new()
        .with(LoggingMiddleware::new())
        .with(logger);
    let dispatcher: Rc<Dispatcher<PlayerAction>> =
        Rc::new(Dispatcher::with_config(config).with_middleware(middleware));

    let mut dispatch_loop = DispatchLoop::new(dispatcher.clone());
    let player = Player::new(
        &dispatcher,
        dispatch_loop.action_tx(),
        args.tracks.len(),
        args.skips,
    );

    let latency = Duration::from_millis(args.latency_ms);
    let mut tasks = dispatch_loop.task_manager();
    library::spawn_loads(&mut tasks, &args.tracks, latency);
    if args.tracks.is_empty() {
        dispatch_loop.enqueue(PlayerAction::Quit);
    }

    let dispatched = dispatch_loop
        .run(
            |action| matches!(action, PlayerAction::Quit),
            |name, err| tracing::error!(action = name, error = %err, "Dispatch failed"),
        )
        .await;
    tasks.cancel_all();

    let playlist = player.playlist.state();
    let now_playing = player.now_playing.state();
    println!("dispatched {dispatched} actions");
    for (index, track) in playlist.tracks.iter().enumerate() {
        let marker = if index == playlist.position { '>' } else { ' ' };
        println!(
            "{marker} {} - {} ({}:{:02})",
            track.artist,
            track.title,
            track.duration_secs / 60,
            track.duration_secs % 60
        );
    }
    if !playlist.failed.is_empty() {
        println!("failed to load: {:?}", playlist.failed);
    }
    if let Some(track) = &now_playing.current {
        println!("now playing: {}", track.title);
    }
    println!("scrobbled: {:?}", now_playing.scrobbled);

    if args.dump_log {
        if let Some(log) = log {
            println!("{}", log.borrow().to_json()?);
        }
    }

    Ok(())
}
