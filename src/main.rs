//! Entry point for `reliable-udp`.
//!
//! Parses CLI arguments and runs one connection in either **listen** or
//! **connect** mode, piping stdin to the peer and the peer's stream to
//! stdout.  All protocol work is delegated to the library; `main.rs` owns
//! only process setup (logging, argument parsing, configuration).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use reliable_udp::config::Config;
use reliable_udp::driver;
use reliable_udp::packet::PacketFormat;
use reliable_udp::simulator::SimulatorConfig;
use reliable_udp::socket::Socket;

/// Reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    opts: Options,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Options {
    /// Window size in packets.
    #[arg(short, long, global = true, default_value_t = 16)]
    window: u32,

    /// Congestion window at start-up and after a timeout, in packets.
    #[arg(long, global = true, default_value_t = 1)]
    initial_window: u32,

    /// Timer tick interval in milliseconds.
    #[arg(short, long, global = true, default_value_t = 500)]
    timer_ms: u64,

    /// Congestion epoch length in milliseconds.
    #[arg(short = 'T', long, global = true, default_value_t = 2000)]
    timeout_ms: u64,

    /// Use the short header without a receive-window field.
    #[arg(long, global = true)]
    plain: bool,

    /// Probability of dropping an outgoing datagram.
    #[arg(long, global = true, default_value_t = 0.0)]
    loss: f64,

    /// Probability of sending an outgoing datagram twice.
    #[arg(long, global = true, default_value_t = 0.0)]
    duplicate: f64,

    /// Probability of holding an outgoing datagram back.
    #[arg(long, global = true, default_value_t = 0.0)]
    reorder: f64,

    /// Probability of flipping a bit in an outgoing datagram.
    #[arg(long, global = true, default_value_t = 0.0)]
    corrupt: f64,

    /// Seed for the fault simulator.
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a peer and adopt the first one that sends a datagram.
    Listen {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
    /// Start talking to a known peer.
    Connect {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Remote address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
    },
}

impl Options {
    fn config(&self) -> anyhow::Result<Config> {
        let config = Config {
            window: self.window,
            initial_window: self.initial_window,
            timer_interval: Duration::from_millis(self.timer_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            format: if self.plain {
                PacketFormat::Plain
            } else {
                PacketFormat::Windowed
            },
        };
        config.validate().context("invalid connection settings")?;
        Ok(config)
    }

    fn simulator(&self) -> anyhow::Result<Option<SimulatorConfig>> {
        let sim = SimulatorConfig {
            loss_rate: self.loss,
            duplicate_rate: self.duplicate,
            reorder_rate: self.reorder,
            corrupt_rate: self.corrupt,
            seed: self.seed,
        };
        sim.validate().context("invalid fault settings")?;
        Ok((!sim.is_transparent()).then_some(sim))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.opts.config()?;
    let simulator = cli.opts.simulator()?;
    if let Some(sim) = &simulator {
        log::warn!("fault injection enabled: {sim:?}");
    }

    let (bind, peer) = match cli.mode {
        Mode::Listen { bind } => (bind, None),
        Mode::Connect { bind, peer } => (bind, Some(peer)),
    };

    let socket = Socket::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let summary = driver::run(
        socket,
        peer,
        config,
        simulator,
        tokio::io::stdin(),
        tokio::io::stdout(),
    )
    .await?;

    if let Some(stats) = summary.simulator {
        log::info!("simulator: {stats:?}");
    }
    Ok(())
}
