use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use impact_rust::clock::SystemClock;
use impact_rust::error::{ImpactError, Result};
use impact_rust::gate::FlushGate;
use impact_rust::pipeline::{feed_file, run_pipeline};
use impact_rust::receiver::start_receiver;
use impact_rust::registry::StreamRegistry;
use impact_rust::settings::Settings;
use impact_rust::sink::{SinkManager, run_sink};
use impact_rust::streams::load_streams;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log every emitted message to stdout as JSON
    #[arg(short, long)]
    verbose: bool,

    /// Do not send messages to the queue
    #[arg(long)]
    dry_run: bool,

    /// Stamp messages with the current time instead of the record time
    #[arg(long)]
    replay: bool,

    /// Per-channel stream configuration (json, toml or yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Settings file; defaults to ~/.impact/settings.{toml,yaml}
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Queue region [AWS_IMPACT_REGION]
    #[arg(long)]
    region: Option<String>,

    /// Queue name or URL [AWS_IMPACT_QUEUE]
    #[arg(long)]
    queue: Option<String>,

    /// AWS access key id
    #[arg(long)]
    key: Option<String>,

    /// AWS secret access key
    #[arg(long)]
    secret: Option<String>,

    /// Initial quiet period per channel, e.g. "10m"
    #[arg(long, value_parser = humantime::parse_duration)]
    probation: Option<Duration>,

    /// Default sensitivity level
    #[arg(long)]
    level: Option<i32>,

    /// Level changes tolerated inside the flap window
    #[arg(long)]
    flap_tolerance: Option<usize>,

    /// Flap window, e.g. "60s"
    #[arg(long, value_parser = humantime::parse_duration)]
    flap_window: Option<Duration>,

    /// Time a noisy channel stays suppressed, e.g. "10m"
    #[arg(long, value_parser = humantime::parse_duration)]
    cooldown: Option<Duration>,

    /// UDP port used when no files are given
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the effective settings in the given format (toml or yaml) and exit
    #[arg(long)]
    dump_config: Option<String>,

    /// miniSEED files to process instead of listening on UDP
    files: Vec<PathBuf>,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        settings.settings.verbose |= self.verbose;
        settings.settings.dry_run |= self.dry_run;
        settings.settings.replay |= self.replay;
        if let Some(path) = &self.config {
            settings.settings.streams = path.clone();
        }
        if let Some(port) = self.port {
            settings.settings.port = port;
        }
        if let Some(probation) = self.probation {
            settings.noise.probation = probation.as_secs();
        }
        if let Some(level) = self.level {
            settings.noise.level = level;
        }
        if let Some(tolerance) = self.flap_tolerance {
            settings.noise.flap_tolerance = tolerance;
        }
        if let Some(window) = self.flap_window {
            settings.noise.flap_window = window.as_secs();
        }
        if let Some(cooldown) = self.cooldown {
            settings.noise.cooldown = cooldown.as_secs();
        }
        if self.region.is_some() {
            settings.queue.region = self.region.clone();
        }
        if self.queue.is_some() {
            settings.queue.queue = self.queue.clone();
        }
        if self.key.is_some() {
            settings.queue.aws_access_key_id = self.key.clone();
        }
        if self.secret.is_some() {
            settings.queue.aws_secret_access_key = self.secret.clone();
        }
        settings.queue.apply_env_fallback();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut settings = Settings::new(args.settings.clone())?;
    args.apply(&mut settings);

    if let Some(format) = &args.dump_config {
        let dumped = settings
            .dump(format)
            .map_err(|e| ImpactError::Config(e.to_string()))?;
        println!("{}", dumped);
        return Ok(());
    }

    let streams = load_streams(&settings.settings.streams)?;

    let registry = StreamRegistry::init(
        streams,
        settings.noise.channel_defaults()?,
        FlushGate::new(settings.noise.flap_policy()?),
        Arc::new(SystemClock),
    )?;

    let sinks = SinkManager::from_settings(&settings).await?;
    info!("Delivering to: {:?}", sinks.names());

    let (msg_tx, msg_rx) = mpsc::channel(100);
    let sink_handle = tokio::spawn(run_sink(msg_rx, sinks));

    let (pipe_tx, pipe_rx) = mpsc::channel(100);
    let replay = settings.settings.replay;
    let pipeline_handle = tokio::spawn(run_pipeline(pipe_rx, registry, msg_tx, replay));

    if !args.files.is_empty() {
        info!("Processing {} files", args.files.len());
        for path in &args.files {
            match feed_file(path, &pipe_tx).await {
                Ok(count) => info!("Fed {} records from {}", count, path.display()),
                Err(e) => warn!("Failed to read file {}: {}", path.display(), e),
            }
        }
        drop(pipe_tx);
    } else {
        let port = settings.settings.port;
        let mut receiver_handle = tokio::spawn(start_receiver(port, pipe_tx));

        tokio::select! {
            result = &mut receiver_handle => {
                match result {
                    Ok(Ok(())) => info!("Receiver finished"),
                    Ok(Err(e)) => return Err(e.into()),
                    Err(e) => error!("Receiver task failed: {}", e),
                }
            }
            _ = shutdown_signal() => {
                receiver_handle.abort();
                let _ = receiver_handle.await;
            }
        }
    }

    // Closing the record channel lets the pipeline drain, which in turn
    // closes the message channel and lets the sink drain.
    match pipeline_handle.await {
        Ok(stats) => info!("Processed {} blocks, emitted {}", stats.processed, stats.emitted),
        Err(e) => error!("Pipeline task failed: {}", e),
    }
    match sink_handle.await {
        Ok(stats) if stats.failed > 0 => warn!("{} messages failed delivery", stats.failed),
        Ok(_) => {}
        Err(e) => error!("Sink task failed: {}", e),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
