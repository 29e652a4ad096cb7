//! oscine - Open Sound Control from the command line
//!
//! Print the OSC packets arriving on a port, or send one message.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use oscine_core::DEFAULT_PORT;
use oscine_server::Policy;
use oscine_transport::Framing;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt as log_fmt, prelude::*, EnvFilter};

mod args;
mod client;
mod config;
mod output;
mod server;

/// oscine - Open Sound Control toolkit
#[derive(Parser)]
#[command(name = "oscine")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "OSCINE_CONFIG")]
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Protocol {
    Udp,
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Udp => f.write_str("udp"),
            Protocol::Tcp => f.write_str("tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum FramingArg {
    /// 4-byte length prefix (OSC 1.0)
    #[default]
    Length,
    /// SLIP (OSC 1.1)
    Slip,
}

impl From<FramingArg> for Framing {
    fn from(arg: FramingArg) -> Self {
        match arg {
            FramingArg::Length => Framing::LengthPrefixed,
            FramingArg::Slip => Framing::Slip,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for OSC packets and print them
    Dump {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,

        /// Port number
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Transport to listen on
        #[arg(long, value_enum, default_value_t = Protocol::Udp)]
        protocol: Protocol,

        /// Concurrency policy (sequential, worker, isolated, cooperative)
        #[arg(long)]
        policy: Option<Policy>,

        /// TCP stream framing
        #[arg(long, value_enum)]
        framing: Option<FramingArg>,

        /// Hold bundles until their timestamp
        #[arg(long)]
        schedule: bool,

        /// Only print addresses matching these patterns
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Send every message back to its sender
        #[arg(long)]
        echo: bool,
    },

    /// Send one OSC message
    Send {
        /// Target host
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Target port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Transport to send over
        #[arg(long, value_enum, default_value_t = Protocol::Udp)]
        protocol: Protocol,

        /// TCP stream framing
        #[arg(long, value_enum, default_value_t)]
        framing: FramingArg,

        /// Deliver inside a bundle due this many milliseconds from now
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Allow sending to a broadcast address
        #[arg(long)]
        broadcast: bool,

        /// Wait this many milliseconds for a reply
        #[arg(short, long)]
        wait_ms: Option<u64>,

        /// OSC address
        address: String,

        /// Arguments: i:1 h:1 f:0.5 d:0.5 s:text S:sym c:x b:hex r:rrggbbaa m:hex t:unix T F N I
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show version and build info
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level, cli.json_logs)?;

    // Handle Ctrl+C
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(()).await;
        }
    });

    match cli.command {
        Commands::Dump {
            bind,
            port,
            protocol,
            policy,
            framing,
            schedule,
            patterns,
            echo,
        } => {
            let mut config = config::load(cli.config.as_deref())?;
            if let Some(policy) = policy {
                config.policy = policy;
            }
            if let Some(framing) = framing {
                config.tcp.framing = framing.into();
            }
            if schedule {
                config.schedule_bundles = true;
            }
            config.send_replies = echo;

            let options = server::DumpOptions {
                addr: format!("{}:{}", bind, port),
                protocol,
                patterns,
                echo,
            };
            server::run_dump(options, config, &mut shutdown_rx).await?;
        }

        Commands::Send {
            host,
            port,
            protocol,
            framing,
            delay_ms,
            broadcast,
            wait_ms,
            address,
            args,
        } => {
            let options = client::SendOptions {
                target: format!("{}:{}", host, port),
                protocol,
                framing: framing.into(),
                address,
                args,
                delay: delay_ms.map(Duration::from_millis),
                broadcast,
                wait: wait_ms.map(Duration::from_millis),
            };
            client::run_send(options).await?;
        }

        Commands::Info => print_info(),
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
            .with(log_fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(log_fmt::layer().with_target(false).compact())
            .init();
    }

    Ok(())
}

fn print_info() {
    println!(
        "{} - Open Sound Control toolkit",
        "oscine".cyan().bold()
    );
    println!();
    println!("Version:    {}", env!("CARGO_PKG_VERSION"));
    println!("Platform:   {}", std::env::consts::OS);
    println!("Arch:       {}", std::env::consts::ARCH);
    if let Some(path) = config::default_config_path() {
        println!("Config:     {}", path.display());
    }
    println!();
    println!("{}", "Transports:".green());
    println!("  - UDP (one packet per datagram)");
    println!("  - TCP (length-prefixed or SLIP framing)");
    println!();
    println!("{}", "Policies:".green());
    for policy in Policy::ALL {
        println!("  - {}", policy);
    }
    println!();
    println!("{}", "Examples:".green());
    println!("  oscine dump --port 5005                     # Print incoming packets");
    println!("  oscine dump --protocol tcp --framing slip   # OSC 1.1 over TCP");
    println!("  oscine send /synth/freq f:440               # Send one message");
    println!("  oscine send --wait-ms 500 /status           # Send and print the reply");
}
