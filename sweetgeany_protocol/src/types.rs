// Destination addressing for relay commands.
//
// A destination is either a channel (name starts with `#`) or a bare peer
// nick. Channels must be joined by the session before the relay will write to
// them; peers are addressed directly, since a private message needs no prior
// join. The membership check itself lives in the relay crate's registry, this
// module only classifies names.

use std::fmt;

/// Leading character that marks a channel-style destination.
pub const CHANNEL_PREFIX: char = '#';

/// Where a relay command should be delivered within a session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Destination {
    Channel(String),
    Peer(String),
}

impl Destination {
    /// Classify a destination name by its prefix. Never fails; an empty name
    /// classifies as a peer and is rejected later by command validation.
    pub fn classify(name: &str) -> Self {
        if name.starts_with(CHANNEL_PREFIX) {
            Destination::Channel(name.to_owned())
        } else {
            Destination::Peer(name.to_owned())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Destination::Channel(name) | Destination::Peer(name) => name,
        }
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, Destination::Channel(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
