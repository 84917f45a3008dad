//! Blaulicht Feed CLI
//!
//! Command-line client for the controller's live update channel:
//! - Watch live updates (tempo, fixture state, heartbeat, audio devices)
//! - Select the audio input or serial (DMX) device
//! - Generate a default config file

use anyhow::Context;
use blaulicht_feed::config::{generate_default_config, Config, LoggingConfig};
use blaulicht_feed::link::{
    ConnectionManager, SendCommand, SubscriptionRegistry, Topic, UpdateMessage,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

#[derive(Parser)]
#[command(name = "blaulicht-feed")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Live update channel for the Blaulicht lighting dashboard")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Dashboard page URL (overrides config)
    #[arg(long, global = true)]
    pub page_url: Option<String>,

    /// Config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for updates
    #[arg(short, long, value_enum, default_value = "pretty", global = true)]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print live updates until the connection ends
    Watch {
        /// Topics to print (default: all)
        #[arg(short, long = "topic", value_enum)]
        topics: Vec<TopicArg>,
    },

    /// Select the audio input device (omit the name to deselect)
    SelectAudio {
        /// Device name as listed in the audio device view
        name: Option<String>,
    },

    /// Select the serial (DMX) device (omit the port to deselect)
    SelectSerial {
        /// Serial port path
        port: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TopicArg {
    Bpm,
    Dmx,
    Heartbeat,
    AudioDevices,
}

impl From<TopicArg> for Topic {
    fn from(arg: TopicArg) -> Self {
        match arg {
            TopicArg::Bpm => Topic::beat_tempo(),
            TopicArg::Dmx => Topic::fixture_state(),
            TopicArg::Heartbeat => Topic::heartbeat(),
            TopicArg::AudioDevices => Topic::audio_device_list(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Pretty,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    if let Some(page_url) = cli.page_url {
        config.dashboard.page_url = page_url;
    }

    init_logging(&config.logging);

    let page_url = config.dashboard.page_url.clone();
    let page = || {
        Url::parse(&page_url).with_context(|| format!("Invalid page URL '{}'", page_url))
    };

    let result = match cli.command {
        Commands::Watch { topics } => watch(&page()?, topics, cli.format).await,
        Commands::SelectAudio { name } => {
            send_once(&page()?, SendCommand::SelectAudioDevice(name)).await
        }
        Commands::SelectSerial { port } => {
            send_once(&page()?, SendCommand::SelectSerialDevice(port)).await
        }
        Commands::Config { output } => write_config(output),
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Live updates stopped");
    }
    result
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("blaulicht_feed={}", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn watch(page: &Url, topics: Vec<TopicArg>, format: OutputFormat) -> anyhow::Result<()> {
    let selected: Vec<Topic> = if topics.is_empty() {
        Topic::ALL.to_vec()
    } else {
        topics.into_iter().map(Topic::from).collect()
    };

    let registry = SubscriptionRegistry::new();
    for topic in Topic::ALL {
        let kind = topic.kind();
        if selected.contains(&topic) {
            registry
                .subscribe(topic, move |msg| print_update(&msg, format))
                .await;
        } else {
            // Unwatched topics still need a handler or dispatch fails
            registry
                .subscribe(topic, move |_| tracing::trace!(topic = %kind, "Update not watched"))
                .await;
        }
    }

    let manager = ConnectionManager::open(page, registry).await?;
    let handle = manager.handle();
    tracing::info!(endpoint = %manager.endpoint(), "Watching live updates");

    let mut run = tokio::spawn(manager.run());

    tokio::select! {
        joined = &mut run => joined??,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            handle.shutdown();
            run.await??;
        }
    }

    handle.clear_all().await;
    Ok(())
}

async fn send_once(page: &Url, command: SendCommand) -> anyhow::Result<()> {
    let registry = SubscriptionRegistry::new();
    for topic in Topic::ALL {
        registry.subscribe(topic, |_| {}).await;
    }

    let mut manager = ConnectionManager::open(page, registry).await?;
    manager.send(&command).await?;

    manager.handle().shutdown();
    manager.run().await?;

    println!("Sent {}", command.encode()?);
    Ok(())
}

fn write_config(output: Option<PathBuf>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(&path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default config to {}", path.display());
        }
        None => print!("{}", content),
    }
    Ok(())
}

fn print_update(message: &UpdateMessage, format: OutputFormat) {
    match format {
        OutputFormat::Json => match message.encode() {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!(error = %e, "Failed to serialize update"),
        },
        OutputFormat::Pretty => {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            println!("[{}] {:<16} {}", now, message.kind().as_str(), describe(message));
        }
    }
}

fn describe(message: &UpdateMessage) -> String {
    fn or_dash<T: ToString>(value: Option<T>) -> String {
        value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
    }

    match message {
        UpdateMessage::BeatTempo(tempo) => format!(
            "bpm={} beat={} volume={} bass={}",
            or_dash(tempo.bpm.map(|b| format!("{:.1}", b))),
            or_dash(tempo.beat),
            or_dash(tempo.volume),
            or_dash(tempo.bass),
        ),
        UpdateMessage::FixtureState(state) => format!(
            "universe={} channels={} active={}",
            or_dash(state.universe),
            state.channels.len(),
            state.channels.iter().skip(1).filter(|v| **v > 0).count(),
        ),
        UpdateMessage::Heartbeat(seq) => format!("seq={}", seq),
        UpdateMessage::AudioDeviceList(names) if names.is_empty() => "(no devices)".to_string(),
        UpdateMessage::AudioDeviceList(names) => names.join(", "),
    }
}
