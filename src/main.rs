//! mqtt-replay - Main Entry Point
//!
//! Records MQTT traffic into numbered logs and replays those logs against
//! a broker. Every termination path exits with status 0; failures are
//! printed rather than propagated as a crash.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mqtt_replay::{
    broker::MqttConnector,
    config::{AppConfig, BrokerConfig},
    logging,
    session::{PlayOptions, Playback, Recorder},
    Interrupt, ReplayError,
};

/// How often `record` checks whether the broker connection is gone
const LOSS_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Record and replay MQTT traffic
#[derive(Parser)]
#[command(name = "mqtt-replay")]
#[command(about = "Record MQTT traffic to timestamped logs and replay it")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log every message and connection step
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded log
    Play(PlayArgs),

    /// Record messages until interrupted
    Record(RecordArgs),
}

#[derive(Debug, Args)]
struct BrokerArgs {
    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,
}

impl BrokerArgs {
    fn apply(&self, mut config: BrokerConfig) -> BrokerConfig {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

#[derive(Debug, Args)]
struct PlayArgs {
    /// Log file to replay
    file: PathBuf,

    #[command(flatten)]
    broker: BrokerArgs,

    /// Speed multiplier (2 plays twice as fast)
    #[arg(short, long)]
    speed: Option<f64>,

    /// Start this many seconds into the log
    #[arg(short, long)]
    jump: Option<f64>,
}

#[derive(Debug, Args)]
struct RecordArgs {
    /// Directory for log files
    dir: Option<PathBuf>,

    #[command(flatten)]
    broker: BrokerArgs,

    /// Topic filter to subscribe to (repeatable, default '#')
    #[arg(short, long = "topic")]
    topics: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("mqtt-replay")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start the async runtime: {}", e);
            return;
        }
    };

    let interrupt = Interrupt::new();
    let result = runtime.block_on(async {
        interrupt.listen_for_ctrl_c().await;
        run(cli, &interrupt).await
    });
    if let Err(e) = result {
        report_error(&e);
    }

    // Blocking connects or drains abandoned by an interrupt are not awaited
    runtime.shutdown_background();
}

async fn run(cli: Cli, interrupt: &Interrupt) -> Result<()> {
    let config = AppConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Play(args) => play(args, config, cli.verbose, interrupt).await,
        Commands::Record(args) => record(args, config, cli.verbose, interrupt).await,
    }
}

async fn play(args: PlayArgs, config: AppConfig, verbose: bool, interrupt: &Interrupt) -> Result<()> {
    let broker = args.broker.apply(config.broker);
    let mut options = PlayOptions::from(&config.playback);
    if let Some(speed) = args.speed {
        options.speed = speed;
    }
    if let Some(jump) = args.jump {
        options.start_offset = jump;
    }
    options.validate()?;

    let file = args.file.clone();
    let verbose = verbose || config.playback.verbose;
    let mut playback = interrupt
        .guard_blocking(move || {
            let connector = MqttConnector::new(broker.clone());
            Playback::open(&file, &connector, broker.connect_timeout(), verbose)
        })
        .await
        .with_context(|| format!("Failed to start playback of {}", args.file.display()))?;

    let report = playback.play_until(options, interrupt.triggered()).await?;

    if report.interrupted {
        println!(
            "Playback interrupted: {} of {} messages published",
            report.published, report.scheduled
        );
    } else {
        println!(
            "Published {} of {} messages in {:.2}s",
            report.published,
            report.scheduled,
            report.elapsed.as_secs_f64()
        );
    }
    for failure in &report.failures {
        println!(
            "  failed: #{} at {}s on '{}': {}",
            failure.index, failure.time_delta, failure.topic, failure.reason
        );
    }

    // An interrupted run skips the drain; dropping the playback disconnects
    if !report.interrupted {
        let drain = config.playback.drain_timeout();
        let closed = interrupt
            .guard_blocking(move || {
                playback.close(drain);
                Ok(())
            })
            .await;
        if let Err(e) = closed {
            tracing::warn!("Playback link not drained: {}", e);
        }
    }
    Ok(())
}

async fn record(args: RecordArgs, config: AppConfig, verbose: bool, interrupt: &Interrupt) -> Result<()> {
    let broker = args.broker.apply(config.broker);
    let mut recorder_config = config.recorder;
    if let Some(dir) = args.dir {
        recorder_config.log_dir = dir;
    }
    if !args.topics.is_empty() {
        recorder_config.topics = args.topics;
    }
    recorder_config.verbose |= verbose;

    let mut recorder = interrupt
        .guard_blocking(move || {
            let connector = MqttConnector::new(broker.clone());
            let mut recorder = Recorder::new(&recorder_config, &connector)?;
            recorder.wait_until_connected(broker.connect_timeout())?;
            recorder.start()?;
            Ok(recorder)
        })
        .await?;
    println!(
        "Recording {} to {} (Ctrl-C to stop)",
        recorder.topics().join(", "),
        recorder.log_path().display()
    );

    if interrupt.guard(connection_lost(&recorder)).await.is_ok() {
        tracing::error!("Broker connection lost, stopping the recording");
    }

    let stopped = recorder.stop();
    let stats = recorder.stats();
    println!(
        "Recording stopped: {} messages saved to {}",
        stats.recorded,
        recorder.log_path().display()
    );
    if stats.append_failures > 0 {
        println!("  {} messages could not be written", stats.append_failures);
    }
    if stats.reconnects > 0 {
        println!("  the connection dropped {} times", stats.reconnects);
    }
    stopped?;
    Ok(())
}

/// Resolves once the recorder has lost its broker for good
async fn connection_lost(recorder: &Recorder) {
    let mut ticks = tokio::time::interval(LOSS_POLL_INTERVAL);
    while recorder.connection_lost().is_none() {
        ticks.tick().await;
    }
}

fn report_error(error: &anyhow::Error) {
    match error.downcast_ref::<ReplayError>().map(ReplayError::root) {
        Some(ReplayError::Interrupted) => eprintln!("Interrupted, exiting"),
        Some(ReplayError::ConnectTimeout { address, .. }) => {
            eprintln!("Connection to {} timed out. Is the broker running?", address);
        }
        Some(ReplayError::Connection(reason)) => {
            eprintln!("Broker connection failed: {}", reason);
        }
        _ => eprintln!("{:#}", error),
    }
}
