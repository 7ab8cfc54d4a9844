// Message envelopes exchanged with the host session layer.
//
// `OutboundMessage` is what the relay hands to `Session::send`. Every message
// gets a process-unique `MessageId`. When the host later generates a reply
// triggered by one of these messages, it reports it to the reply correlator
// as an `OutboundReply` whose `in_reply_to` carries that id. This id link is
// the only connection between a relayed command and its reply.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an outbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

impl MessageId {
    /// Allocate a fresh id. Ids are never reused within a process.
    pub fn next() -> Self {
        MessageId(NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg-{}", self.0)
    }
}

/// IRC delivery mode: a regular message or a notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Privmsg,
    Notice,
}

/// A message the relay asks a session to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub id: MessageId,
    pub kind: MessageKind,
    pub target: String,
    pub text: String,
}

impl OutboundMessage {
    pub fn new(kind: MessageKind, target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: MessageId::next(),
            kind,
            target: target.into(),
            text: text.into(),
        }
    }

    pub fn privmsg(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Privmsg, target, text)
    }
}

/// A reply the host is about to deliver, with the id of the message that
/// triggered it (if the host knows one).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundReply {
    pub target: String,
    pub text: String,
    pub in_reply_to: Option<MessageId>,
}
