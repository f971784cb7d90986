//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand, ValueEnum};

use pulse_core::TransportMode;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Override the persistent server address (host:port)
    #[arg(short, long)]
    pub address: Option<String>,

    /// Override the transport mode
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the runtime with the keep-alive engine until interrupted
    Run {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
        /// Seconds between keep-alive pings
        #[arg(short, long, default_value_t = 30)]
        interval: u64,
        /// User id of an already authenticated session
        #[arg(long, requires = "session_id")]
        user_id: Option<u64>,
        /// Session id of an already authenticated session
        #[arg(long, requires = "user_id")]
        session_id: Option<String>,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Validate the effective configuration and exit
    Check,
}

/// Transport mode as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Persistent,
    Polling,
}

impl From<ModeArg> for TransportMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Persistent => TransportMode::Persistent,
            ModeArg::Polling => TransportMode::Polling,
        }
    }
}
