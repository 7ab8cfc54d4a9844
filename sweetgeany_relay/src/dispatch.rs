// Relay dispatcher: turn a parsed command into one outbound message.
//
// Resolution happens in two steps against the injected registry: the network
// name selects a session, then the destination is checked against that
// session (joined channel, or any peer nick). Either miss is reported as a
// distinct `RelayError` and nothing is sent. On success exactly one privmsg
// is queued on the session; there are no retries.
//
// When reply correlation is enabled, the correlation for the new message is
// registered before the send, so a reply produced by a fast host cannot
// arrive ahead of it. A failed send withdraws the registration again.

use std::sync::Arc;

use sweetgeany_protocol::RelayCommand;
use tracing::debug;

use crate::correlate::{PendingCorrelation, ReplyCorrelator};
use crate::error::RelayError;
use crate::outbound::{MessageKind, OutboundMessage};
use crate::registry::{SessionRegistry, find_destination};

pub struct Dispatcher {
    registry: Arc<dyn SessionRegistry>,
    correlation: Option<(Arc<ReplyCorrelator>, MessageKind)>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn SessionRegistry>) -> Self {
        Self {
            registry,
            correlation: None,
        }
    }

    /// Register a reply correlation for every relayed message, redirecting
    /// replies as `reply_kind`.
    pub fn with_correlation(
        mut self,
        correlator: Arc<ReplyCorrelator>,
        reply_kind: MessageKind,
    ) -> Self {
        self.correlation = Some((correlator, reply_kind));
        self
    }

    pub fn correlator(&self) -> Option<&Arc<ReplyCorrelator>> {
        self.correlation.as_ref().map(|(correlator, _)| correlator)
    }

    /// Send `message` to `destination` on the session for `network`.
    pub fn relay(&self, network: &str, destination: &str, message: &str) -> Result<(), RelayError> {
        let session = self
            .registry
            .find_session(network)
            .ok_or_else(|| RelayError::UnknownNetwork(network.to_owned()))?;
        let target = find_destination(&*session, destination).ok_or_else(|| {
            RelayError::UnknownDestination {
                network: network.to_owned(),
                destination: destination.to_owned(),
            }
        })?;

        let outbound = OutboundMessage::privmsg(target.name(), message);
        let id = outbound.id;

        if let Some((correlator, reply_kind)) = &self.correlation {
            correlator.register(
                id,
                PendingCorrelation::new(&session, target.name(), *reply_kind),
            );
        }

        if let Err(e) = session.send(outbound) {
            if let Some((correlator, _)) = &self.correlation {
                correlator.consume(id);
            }
            return Err(e.into());
        }

        debug!(
            network,
            nick = session.nick(),
            destination = %target,
            message_id = %id,
            "relayed message"
        );
        Ok(())
    }

    pub fn relay_command(&self, command: &RelayCommand) -> Result<(), RelayError> {
        self.relay(&command.network, &command.destination, &command.message)
    }
}
