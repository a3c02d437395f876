//! SLDP CLI - Command-line player for SLDP low-delay streams
//!
//! Connect to a server, list the announced streams, play them and watch
//! buffer fill and clock drift.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use sldp_client::ConnectionConfig;
use sldp_core::{DEFAULT_TLS_PORT, WS_SUBPROTOCOL};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod player;

/// SLDP - Softvelum Low Delay Protocol player
#[derive(Parser)]
#[command(name = "sldp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true, env = "SLDP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, play every announced stream and report on it
    Play {
        /// Server host
        host: String,

        /// Application name
        app: String,

        /// Stream name
        stream: String,

        /// Port number (default 80, or 443 with --tls)
        #[arg(short = 'P', long, env = "SLDP_PORT")]
        port: Option<u16>,

        /// Connect over TLS (wss://)
        #[arg(long)]
        tls: bool,

        /// Accept any server certificate
        #[arg(long)]
        insecure: bool,

        /// Low-delay playback offset in milliseconds; enables drift reporting
        #[arg(short, long, env = "SLDP_DELAY_MS")]
        delay_ms: Option<u32>,

        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Interval between stream reports, in milliseconds
        #[arg(long, default_value = "1000")]
        report_ms: u64,

        /// Print the effective configuration as TOML and exit
        #[arg(long)]
        print_config: bool,
    },

    /// Show version and protocol info
    Info,
}

/// Overrides from the `play` command line
#[derive(Debug, Default)]
struct PlayArgs {
    host: String,
    app: String,
    stream: String,
    port: Option<u16>,
    tls: bool,
    insecure: bool,
    delay_ms: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(()).await;
        }
    });

    match cli.command {
        Commands::Play {
            host,
            app,
            stream,
            port,
            tls,
            insecure,
            delay_ms,
            seconds,
            report_ms,
            print_config,
        } => {
            let args = PlayArgs {
                host,
                app,
                stream,
                port,
                tls,
                insecure,
                delay_ms,
            };
            let config = build_config(cli.config.as_deref(), args)?;

            if print_config {
                print!("{}", toml::to_string_pretty(&config)?);
                return Ok(());
            }

            println!(
                "{} Connecting to {}",
                "SLDP".cyan().bold(),
                config.url().yellow()
            );
            let options = player::PlayOptions {
                run_for: seconds.map(Duration::from_secs),
                report_every: Duration::from_millis(report_ms.max(100)),
            };
            player::run(config, options, &mut shutdown_rx).await?;
        }

        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

fn setup_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to parse log level")?;

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

/// Config file first, then command-line values on top
fn build_config(path: Option<&std::path::Path>, args: PlayArgs) -> Result<ConnectionConfig> {
    let mut config = match path {
        Some(path) => ConnectionConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConnectionConfig::default(),
    };

    config.host = args.host;
    config.app = args.app;
    config.stream = args.stream;
    config.tls |= args.tls;
    config.trust_all_certs |= args.insecure;
    if let Some(delay_ms) = args.delay_ms {
        config.steady_delay_ms = delay_ms;
    }
    match args.port {
        Some(port) => config.port = port,
        None if config.tls && config.port == sldp_core::DEFAULT_PORT => {
            config.port = DEFAULT_TLS_PORT
        }
        None => {}
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_info() {
    println!(
        "{}",
        "SLDP - Softvelum Low Delay Protocol player".cyan().bold()
    );
    println!();
    println!("Version:      {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:     {}", std::env::consts::OS);
    println!("Arch:         {}", std::env::consts::ARCH);
    println!("Subprotocol:  {}", WS_SUBPROTOCOL);
    println!(
        "TLS:          {}",
        if cfg!(feature = "tls") { "rustls" } else { "disabled" }
    );
    println!();
    println!("{}", "Codecs:".green());
    println!("  - Video: H.264, H.265, VP6, VP8, VP9, AV1");
    println!("  - Audio: AAC, MP3, Opus");
    println!();
    println!("{}", "Examples:".green());
    println!("  sldp play demo.host live stream1             # Play over ws://");
    println!("  sldp play demo.host live stream1 --tls       # Play over wss://");
    println!("  sldp play demo.host live stream1 -d 500 -s 30  # Drift report for 30 s");
}
