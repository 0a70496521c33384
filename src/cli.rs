//! Command line interface for the demo broker binary.

use clap::Parser;

/// Command line arguments for the `ferrumq` binary.
#[derive(Debug, Parser)]
#[command(name = "ferrumq", version, about = "Demo AMQP 0-9-1 connection engine")]
pub struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 5672)]
    pub port: u16,

    /// Heartbeat period offered to clients, in seconds (0 disables).
    #[arg(long, default_value_t = 60)]
    pub heartbeat: u16,

    /// Connection cap for the port (0 means unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_connections: u32,

    /// Offer the ANONYMOUS mechanism alongside PLAIN.
    #[arg(long)]
    pub allow_anonymous: bool,
}
