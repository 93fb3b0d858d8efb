//! cloudtap - tap a cloud device event stream
//!
//! Holds a long-lived streaming connection to the cloud event endpoint and
//! hands every event to local sinks (JSONL file/stdout, webhook).

mod report;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cloudtap_core::config::{mask_secret, to_toml, CloudtapConfig, ConfigLoader};
use cloudtap_core::FanoutSink;
use cloudtap_export::{JsonlSink, WebhookSink};
use cloudtap_stream::Consumer;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cloudtap")]
#[command(version)]
#[command(about = "Consume a cloud device event stream", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format (json, text)
    #[arg(short, long, global = true)]
    format: Option<String>,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "CLOUDTAP_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the event stream until Ctrl+C
    Consume(ConsumeArgs),

    /// Show recorded events
    Show {
        /// Input file (JSONL)
        #[arg(short, long)]
        input: PathBuf,

        /// Only events whose name contains this
        #[arg(long)]
        name: Option<String>,

        /// Number of events to show
        #[arg(short = 'n', long, default_value = "50")]
        num: usize,
    },

    /// Print the effective configuration
    Config {
        /// Also write it to this path
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
struct ConsumeArgs {
    /// Only events with this name
    #[arg(short, long)]
    event: Option<String>,

    /// Access token
    #[arg(short, long, env = "CLOUDTAP_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// JSONL output path, `-` for stdout
    #[arg(short, long)]
    output: Option<String>,

    /// Also POST events to this URL
    #[arg(long)]
    webhook: Option<String>,

    /// Stream host
    #[arg(long)]
    host: Option<String>,

    /// Stream port
    #[arg(long)]
    port: Option<u16>,

    /// Connect over plain TCP instead of TLS
    #[arg(long)]
    plain: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .with_cli_path(cli.config.clone())
        .load()
        .context("Failed to load configuration")?;
    if let Some(format) = cli.format {
        config.logging.format = format;
    }

    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Consume(args) => consume_command(config, args).await,
        Commands::Show { input, name, num } => show_command(&input, name.as_deref(), num),
        Commands::Config { save } => config_command(&config, save.as_deref()),
    }
}

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins over `-v`, which wins over the configured level. Logs go
/// to stderr so stdout stays free for JSONL output.
fn init_logging(config: &CloudtapConfig, verbose: u8) -> anyhow::Result<()> {
    let level = if verbose > 0 {
        match verbose {
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    } else {
        match config.logging.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let result = if config.logging.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))
}

/// CLI arguments take precedence over the configuration file
fn apply_consume_args(config: &mut CloudtapConfig, args: ConsumeArgs) {
    if let Some(event) = args.event {
        config.stream.event_name = Some(event);
    }
    if let Some(token) = args.token {
        config.stream.access_token = Some(token);
    }
    if let Some(output) = args.output {
        config.sink.jsonl.enabled = true;
        config.sink.jsonl.path = output;
    }
    if let Some(url) = args.webhook {
        config.sink.webhook.enabled = true;
        config.sink.webhook.url = url;
    }
    if let Some(host) = args.host {
        config.stream.host = host;
    }
    if let Some(port) = args.port {
        config.stream.port = port;
    }
    if args.plain {
        config.stream.tls = false;
    }
}

fn build_sink(config: &CloudtapConfig) -> anyhow::Result<FanoutSink> {
    let mut sink = FanoutSink::new();

    if config.sink.jsonl.enabled {
        sink.add(Box::new(JsonlSink::open(&config.sink.jsonl)?));
    }
    if config.sink.webhook.enabled {
        sink.add(Box::new(WebhookSink::new((&config.sink.webhook).into())?));
        info!("Webhook sink delivering to: {}", config.sink.webhook.url);
    }

    if sink.is_empty() {
        anyhow::bail!("No sink enabled; enable sink.jsonl or sink.webhook");
    }
    Ok(sink)
}

async fn consume_command(mut config: CloudtapConfig, args: ConsumeArgs) -> anyhow::Result<()> {
    apply_consume_args(&mut config, args);
    ConfigLoader::new().validate(&config)?;
    config.stream.require_credentials()?;

    let sink = build_sink(&config)?;
    let mut consumer = Consumer::new(config.stream.clone(), sink)?;
    let handle = consumer.handle();

    info!(
        remote = %config.stream.remote(),
        token = %config.stream.masked_token().unwrap_or_default(),
        "Starting cloudtap v{}",
        env!("CARGO_PKG_VERSION")
    );

    let stopper = {
        let handle = handle.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, stopping...");
                    handle.stop();
                }
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
        })
    };

    let reporter = config
        .stats
        .report_interval()
        .map(|interval| report::spawn_reporter(handle.clone(), interval));

    let result = consumer.consume().await;

    stopper.abort();
    if let Some(reporter) = reporter {
        reporter.abort();
    }

    let stats = consumer.stats();
    if config.logging.format.eq_ignore_ascii_case("json") {
        eprintln!("{}", serde_json::to_string(&stats)?);
    } else {
        eprintln!("cloudtap stopped: {}", report::format_stats(&stats));
    }

    result?;
    Ok(())
}

/// Read up to `num` recorded events, optionally filtered by name
fn read_events(
    input: &Path,
    name: Option<&str>,
    num: usize,
) -> anyhow::Result<Vec<serde_json::Value>> {
    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event: serde_json::Value = serde_json::from_str(&line)?;

        if let Some(filter) = name {
            let matches = event
                .get("name")
                .and_then(|v| v.as_str())
                .is_some_and(|n| n.contains(filter));
            if !matches {
                continue;
            }
        }

        events.push(event);
        if events.len() >= num {
            break;
        }
    }
    Ok(events)
}

fn show_command(input: &Path, name: Option<&str>, num: usize) -> anyhow::Result<()> {
    for event in read_events(input, name, num)? {
        println!("{}", serde_json::to_string_pretty(&event)?);
    }
    Ok(())
}

fn config_command(config: &CloudtapConfig, save: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = save {
        ConfigLoader::new().save(config, path)?;
    }

    let mut shown = config.clone();
    shown.stream.access_token = shown.stream.access_token.as_deref().map(mask_secret);
    shown.sink.webhook.bearer_token = shown.sink.webhook.bearer_token.as_deref().map(mask_secret);
    print!("{}", to_toml(&shown)?);
    Ok(())
}
