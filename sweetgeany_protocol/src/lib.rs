// sweetgeany_protocol: wire format of the SweetGeany command socket.
//
// Local tools (commit notifiers, cron jobs, shell scripts) ask the bot to say
// something by opening a TCP connection to the relay and writing one line:
//
//     <network> <destination> <message...>
//
// This crate owns that format. It is shared by the relay listener and by the
// client helpers, and has no dependency on the relay or on any IRC code.
//
// Module overview:
// - `command.rs`:  `RelayCommand` and its parser. Splits on the first two
//                  spaces, keeps the message verbatim, rejects lines that
//                  could not be relayed as a single IRC line.
// - `framing.rs`:  One-line-per-connection framing over any `BufRead`/`Write`:
//                  read to `\n` or EOF with a length cap, write a terminated
//                  line.
// - `types.rs`:    `Destination`, the channel/peer classification of the
//                  destination field.
//
// Design decisions:
// - **Plain text, no framing header.** The producers are shell scripts and
//   CGI hooks; anything fancier than a line would break them.
// - **No response.** The protocol is fire-and-forget. Errors surface only in
//   the relay's logs.

pub mod command;
pub mod framing;
pub mod types;

pub use command::{ParseError, RelayCommand, parse_command};
pub use framing::{MAX_LINE_LEN, read_line, write_command};
pub use types::{CHANNEL_PREFIX, Destination};
