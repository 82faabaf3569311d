use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fswatch_watcher::{
    ClassifiedEvent, Engine, EventType, PollingScanner, RunStats, StopHandle, WatchConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fswatch", about = "Print filesystem changes below one or more directories")]
struct Cli {
    /// Directories to watch recursively
    roots: Vec<PathBuf>,

    /// JSON config file; positional roots are added to its roots
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Poll every MS milliseconds instead of using inotify
    #[arg(long, value_name = "MS")]
    poll: Option<u64>,

    /// Bytes read from inotify at a time
    #[arg(long, value_name = "BYTES")]
    buffer_size: Option<usize>,

    /// Comma-separated event types to print (default: all)
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    events: Vec<EventType>,
}

impl Cli {
    fn watch_config(&self) -> Result<WatchConfig> {
        let mut config = match &self.config {
            Some(path) => WatchConfig::from_json_file(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => WatchConfig::default(),
        };

        config.roots.extend(self.roots.iter().cloned());
        if config.roots.is_empty() {
            config.roots.push(PathBuf::from("."));
        }
        if let Some(buffer_size) = self.buffer_size {
            config.buffer_size = buffer_size;
        }
        if let Some(interval) = self.poll {
            config = config.with_poll_interval(Duration::from_millis(interval));
        }
        Ok(config)
    }

    fn event_types(&self) -> Vec<EventType> {
        if self.events.is_empty() {
            EventType::ALL.to_vec()
        } else {
            self.events.clone()
        }
    }
}

fn print_event(event: &ClassifiedEvent) {
    println!("{}: {}", event.event_type, event.path.display());
}

fn stop_on_ctrl_c(stop: StopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
        }
        stop.stop();
    });
}

async fn run(cli: Cli) -> Result<RunStats> {
    let config = cli.watch_config()?;
    let event_types = cli.event_types();

    let stats = if cli.poll.is_some() {
        let mut scanner = PollingScanner::new(config).context("failed to set up polling")?;
        scanner.on_many(&event_types, print_event);
        stop_on_ctrl_c(scanner.stop_handle());
        scanner.start().await?
    } else {
        let mut engine = Engine::new(config).context("failed to set up watcher")?;
        engine.on_many(&event_types, print_event);
        stop_on_ctrl_c(engine.stop_handle());
        engine.start().await.context("watcher terminated")?
    };
    Ok(stats)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stats = run(Cli::parse()).await?;
    info!(
        "done: {} batches, {} records, {} dispatched, {} dropped",
        stats.batches, stats.records, stats.dispatched, stats.dropped
    );
    Ok(())
}
