// Error types for the relay.
//
// Only `ListenerError` ever reaches the host (from `start()`). Everything else
// is per-connection or per-command and ends up in a log line: the socket
// protocol has no way to report failure back to the client.

use std::io;
use std::path::PathBuf;

use sweetgeany_protocol::ParseError;
use thiserror::Error;

/// Failure reported by a host session's send primitive.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session for network {network} is disconnected")]
    Disconnected { network: String },
    #[error("session rejected the message: {0}")]
    Rejected(String),
}

/// Why a relay command could not be dispatched.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("not on network: {0}")]
    UnknownNetwork(String),
    #[error("not on channel {destination} (network {network})")]
    UnknownDestination { network: String, destination: String },
    #[error("send failed: {0}")]
    Send(#[from] SessionError),
}

/// Errors returned by `CommandListener::start`.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind command listener to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("command listener is already running")]
    AlreadyRunning,
    #[error("failed to spawn accept thread: {0}")]
    Spawn(#[source] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure while serving a single socket connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("read failed: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed without a command")]
    NoCommand,
    #[error("malformed command: {0}")]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Relay(#[from] RelayError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from the blocking socket client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to send command: {0}")]
    Io(#[from] io::Error),
}
