// Reply correlation: route the bot's replies to relayed commands.
//
// A relayed message can trigger the bot itself (a command addressed to the
// bot, a keyword it reacts to). The reply the host generates for it would
// normally go wherever the host's reply logic points. When the relay sent the
// trigger, it instead registers a `PendingCorrelation` under the trigger's
// `MessageId`, and the host asks `maybe_redirect` before delivering each
// reply. A reply whose `in_reply_to` matches a pending entry is sent to the
// relay destination recorded in that entry, as a notice or a privmsg, and the
// host skips its default delivery.
//
// Consumption is `HashMap::remove` under the table mutex, so an entry is
// handed out at most once even when several replies race for it. The mutex is
// never held while talking to a session.
//
// Entries for triggers that never produce a reply would otherwise pile up.
// Each `register` prunes entries older than the TTL, and the table is capped
// at `capacity` entries with the oldest evicted first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::outbound::{MessageId, MessageKind, OutboundMessage, OutboundReply};
use crate::registry::Session;

/// Default lifetime of an unanswered correlation.
pub const DEFAULT_CORRELATION_TTL: Duration = Duration::from_secs(300);

/// Default upper bound on outstanding correlations.
pub const MAX_PENDING_CORRELATIONS: usize = 1024;

/// Where the reply to one relayed message should be redirected.
#[derive(Clone, Debug)]
pub struct PendingCorrelation {
    session: Weak<dyn Session>,
    network: String,
    destination: String,
    reply_kind: MessageKind,
    created: Instant,
}

impl PendingCorrelation {
    pub fn new(
        session: &Arc<dyn Session>,
        destination: impl Into<String>,
        reply_kind: MessageKind,
    ) -> Self {
        Self {
            session: Arc::downgrade(session),
            network: session.network().to_owned(),
            destination: destination.into(),
            reply_kind,
            created: Instant::now(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn reply_kind(&self) -> MessageKind {
        self.reply_kind
    }

    /// The originating session, if the host still has it.
    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.session.upgrade()
    }
}

/// Outcome of `maybe_redirect`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The reply was sent to the relay destination; skip default delivery.
    Redirected,
    /// Not a reply to a relayed message; deliver normally.
    Passthrough,
}

pub struct ReplyCorrelator {
    pending: Mutex<HashMap<MessageId, PendingCorrelation>>,
    ttl: Duration,
    capacity: usize,
}

impl ReplyCorrelator {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, MAX_PENDING_CORRELATIONS)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Attach a correlation to an outbound message. A message carries at
    /// most one; a second registration for the same id is ignored.
    pub fn register(&self, id: MessageId, correlation: PendingCorrelation) {
        let mut pending = self.lock();
        let ttl = self.ttl;
        pending.retain(|_, entry| entry.created.elapsed() < ttl);

        if pending.contains_key(&id) {
            warn!(message_id = %id, "message already has a reply correlation");
            return;
        }

        if pending.len() >= self.capacity {
            let oldest = pending
                .iter()
                .min_by_key(|(_, entry)| entry.created)
                .map(|(id, _)| *id);
            if let Some(oldest) = oldest {
                pending.remove(&oldest);
                debug!(message_id = %oldest, "evicted unanswered reply correlation");
            }
        }
        pending.insert(id, correlation);
    }

    /// Take the correlation for `id`, if one is pending and not expired.
    /// Returns `Some` to exactly one caller per registration.
    pub fn consume(&self, id: MessageId) -> Option<PendingCorrelation> {
        let correlation = self.lock().remove(&id)?;
        if correlation.created.elapsed() >= self.ttl {
            debug!(message_id = %id, "reply correlation expired");
            return None;
        }
        Some(correlation)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Decide how a reply the host is about to deliver should travel.
    ///
    /// On `Redirected` the reply text has already been sent, verbatim, to the
    /// correlated destination. If the correlated session is gone or refuses
    /// the message, the correlation is still spent and `Passthrough` is
    /// returned so the text goes out through the default path instead of
    /// being lost.
    pub fn maybe_redirect(&self, reply: &OutboundReply) -> Delivery {
        let Some(id) = reply.in_reply_to else {
            return Delivery::Passthrough;
        };
        let Some(correlation) = self.consume(id) else {
            return Delivery::Passthrough;
        };
        let Some(session) = correlation.session() else {
            warn!(
                network = %correlation.network,
                message_id = %id,
                "session for correlated reply is gone, delivering normally"
            );
            return Delivery::Passthrough;
        };

        let redirect = OutboundMessage::new(
            correlation.reply_kind,
            correlation.destination.clone(),
            reply.text.clone(),
        );
        match session.send(redirect) {
            Ok(()) => {
                debug!(
                    network = %correlation.network,
                    nick = session.nick(),
                    destination = %correlation.destination,
                    kind = ?correlation.reply_kind,
                    message_id = %id,
                    "redirected reply to relay destination"
                );
                Delivery::Redirected
            }
            Err(e) => {
                warn!(
                    network = %correlation.network,
                    destination = %correlation.destination,
                    error = %e,
                    "failed to redirect reply, delivering normally"
                );
                Delivery::Passthrough
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageId, PendingCorrelation>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReplyCorrelator {
    fn default() -> Self {
        Self::new(DEFAULT_CORRELATION_TTL)
    }
}
