use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, fanning messages out to every verified peer.
    Relay(RelayArgs),
    /// Connect to a relay and exchange broadcast messages.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub listen: SocketAddr,

    /// Seconds a verified connection may stay silent before it is closed.
    #[arg(long, default_value_t = 300)]
    pub idle_window: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Username shown to other participants.
    #[arg(long, default_value = "anonymous")]
    pub user: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub server: SocketAddr,

    /// Seconds between keepalive pings.
    #[arg(long, default_value_t = 5)]
    pub heartbeat: u64,
}
