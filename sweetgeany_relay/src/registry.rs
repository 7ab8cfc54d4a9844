// Session registry: the relay's read-only view of the host's IRC sessions.
//
// The host process owns its network connections. It exposes each one to the
// relay as a `Session` and registers it in something implementing
// `SessionRegistry`, usually the `SessionTable` below. The relay never creates
// or tears down sessions; it only looks them up by network name when a
// command arrives.
//
// Destination lookup follows IRC conventions: a name starting with `#` must
// be a channel the session has joined (compared ASCII case-insensitively,
// since IRC servers fold channel case), anything else is a nick and is
// returned as-is because private messages need no prior join.
//
// `SessionTable` guards its map with an `RwLock`, so the host can add and
// remove sessions while connection workers are looking them up. Each lookup
// is atomic on its own; nothing here assumes two lookups see the same state.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use sweetgeany_protocol::Destination;

use crate::error::SessionError;
use crate::outbound::OutboundMessage;

/// One live connection to an IRC network, implemented by the host.
pub trait Session: Send + Sync {
    /// Network name this session is registered under. Case-sensitive.
    fn network(&self) -> &str;

    /// Nick the bot uses on this network.
    fn nick(&self) -> &str;

    /// Channels currently joined.
    fn joined_channels(&self) -> Vec<String>;

    /// Find a joined channel by name, returning the name as the session
    /// knows it.
    fn find_channel(&self, name: &str) -> Option<String> {
        self.joined_channels()
            .into_iter()
            .find(|channel| channel.eq_ignore_ascii_case(name))
    }

    /// Queue a message on the session's write path.
    fn send(&self, message: OutboundMessage) -> Result<(), SessionError>;
}

/// Lookup of sessions by network name.
pub trait SessionRegistry: Send + Sync {
    fn find_session(&self, network: &str) -> Option<Arc<dyn Session>>;
}

/// Resolve a destination name within a session.
///
/// Channels must be joined; peers are returned verbatim without any
/// membership check. An empty name never resolves.
pub fn find_destination(session: &dyn Session, name: &str) -> Option<Destination> {
    if name.is_empty() {
        return None;
    }
    match Destination::classify(name) {
        Destination::Channel(_) => session.find_channel(name).map(Destination::Channel),
        peer @ Destination::Peer(_) => Some(peer),
    }
}

/// Registry of sessions maintained by the host.
#[derive(Default)]
pub struct SessionTable {
    sessions: RwLock<BTreeMap<String, Arc<dyn Session>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its network name. Returns the session
    /// previously registered under that name, if any.
    pub fn insert(&self, session: Arc<dyn Session>) -> Option<Arc<dyn Session>> {
        let network = session.network().to_owned();
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(network, session)
    }

    /// Unregister a session, e.g. after the host lost the connection.
    pub fn remove(&self, network: &str) -> Option<Arc<dyn Session>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(network)
    }

    /// Names of all registered networks, sorted.
    pub fn networks(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionRegistry for SessionTable {
    fn find_session(&self, network: &str) -> Option<Arc<dyn Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(network)
            .cloned()
    }
}
