// sweetgeany_relay: command socket relay for the SweetGeany IRC bot.
//
// Local tools hand the bot messages by writing `<network> <destination>
// <message>` lines to a TCP socket (format in `sweetgeany_protocol`). This
// crate is the bot-side half: it listens on that socket, resolves each command
// against the bot's live IRC sessions, and queues the message on the right
// session. It also routes the bot's own replies to relayed messages back to
// where the relayed message went.
//
// Module overview:
// - `registry.rs`:   `Session` and `SessionRegistry`, the host-implemented
//                    view of the bot's IRC connections, plus `SessionTable`
//                    and destination resolution.
// - `dispatch.rs`:   `Dispatcher`: resolve (network, destination), send one
//                    privmsg, register a reply correlation.
// - `server.rs`:     `CommandListener`: bind, accept thread with a bounded
//                    poll, one worker thread per connection, stop-and-join
//                    shutdown. `start_relay` wires everything from a config.
// - `correlate.rs`:  `ReplyCorrelator`: `MessageId → PendingCorrelation`
//                    table with at-most-once consumption; redirects replies
//                    as notice or privmsg.
// - `outbound.rs`:   `OutboundMessage` / `OutboundReply` envelopes and ids.
// - `config.rs`:     `RelayConfig`, JSON-loadable listener settings.
// - `client.rs`:     Blocking producer for the socket, used by `relay-send`.
// - `error.rs`:      Error enums.
//
// Nothing here owns an IRC connection. The host process (the bot) implements
// `Session` for each network it is on and keeps the registry current; the
// relay only looks things up.

pub mod client;
pub mod config;
pub mod correlate;
pub mod dispatch;
pub mod error;
pub mod outbound;
pub mod registry;
pub mod server;

#[cfg(test)]
mod test_support;

pub use client::send_command;
pub use config::RelayConfig;
pub use correlate::{Delivery, PendingCorrelation, ReplyCorrelator};
pub use dispatch::Dispatcher;
pub use error::{
    ClientError, ConfigError, ConnectionError, ListenerError, RelayError, SessionError,
};
pub use outbound::{MessageId, MessageKind, OutboundMessage, OutboundReply};
pub use registry::{Session, SessionRegistry, SessionTable, find_destination};
pub use server::{CommandListener, ListenerState, RelayHandle, start_relay};
