// `relay-send`: write one command to a running SweetGeany relay.
//
// Shell-friendly replacement for the ad hoc socket code in hook scripts:
//
//   relay-send [--config relay.json] [--host H] [--port P] \
//       <network> <destination> <message...>
//
// The message words are joined with single spaces. Host and port default to
// the relay's defaults, or to the values in `--config` when given. Exits
// non-zero if the command is malformed or the relay cannot be reached. The
// relay sends no reply, so success only means the line was delivered and
// processed.
//
// Logging goes to stderr; set `RUST_LOG=debug` for detail.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sweetgeany_protocol::RelayCommand;
use sweetgeany_relay::{RelayConfig, send_command};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-send", about = "Send one message through the SweetGeany relay socket")]
struct Args {
    /// JSON relay config to take host and port from.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Relay host (overrides the config).
    #[arg(long)]
    host: Option<String>,

    /// Relay port (overrides the config).
    #[arg(long)]
    port: Option<u16>,

    /// Connect/write/wait timeout in milliseconds.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Network name, e.g. `Freenode`.
    network: String,

    /// Channel (`#name`) or nick.
    destination: String,

    /// Message text.
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    message: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let command = RelayCommand::new(args.network, args.destination, args.message.join(" "))
        .context("invalid relay command")?;
    let addr = config.bind_addr();
    send_command(&addr, &command, Duration::from_millis(args.timeout_ms))
        .with_context(|| format!("failed to send command to {addr}"))?;

    tracing::debug!(%addr, network = %command.network, destination = %command.destination, "command sent");
    Ok(())
}
