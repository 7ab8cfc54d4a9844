// Test fakes: a host session that records what it is asked to send, and an
// in-memory log sink for asserting on what the relay logs.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::Level;

use crate::error::SessionError;
use crate::outbound::OutboundMessage;
use crate::registry::Session;

/// Session that records every message it is asked to send.
pub(crate) struct RecordingSession {
    network: String,
    channels: Vec<String>,
    sent: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
    panicking: AtomicBool,
    panics: AtomicUsize,
}

impl RecordingSession {
    pub(crate) fn new(network: &str, channels: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            network: network.into(),
            channels: channels.iter().map(|c| (*c).to_string()).collect(),
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            panics: AtomicUsize::new(0),
        })
    }

    pub(crate) fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Make subsequent sends fail with `Disconnected`.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make subsequent sends panic, as a buggy host session might.
    pub(crate) fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub(crate) fn panic_count(&self) -> usize {
        self.panics.load(Ordering::SeqCst)
    }
}

impl Session for RecordingSession {
    fn network(&self) -> &str {
        &self.network
    }

    fn nick(&self) -> &str {
        "SweetGeany"
    }

    fn joined_channels(&self) -> Vec<String> {
        self.channels.clone()
    }

    fn send(&self, message: OutboundMessage) -> Result<(), SessionError> {
        if self.panicking.load(Ordering::SeqCst) {
            self.panics.fetch_add(1, Ordering::SeqCst);
            panic!("session for {} blew up", self.network);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SessionError::Disconnected {
                network: self.network.clone(),
            });
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// Shared buffer the fmt subscriber writes formatted events into.
#[derive(Clone, Default)]
struct CapturedLog(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber at `level` and return everything
/// it logged, one event per line.
pub(crate) fn capture_logs(level: Level, f: impl FnOnce()) -> String {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = log.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}
