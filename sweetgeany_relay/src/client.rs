// Blocking client for the relay's command socket.
//
// This is the producer side of the protocol, the same thing the git commit
// notifier and other scripts do by hand: connect, write one line, close.
// `send_command` additionally waits for the relay to close its end, which it
// does only after it has dispatched (or dropped) the command. A successful
// return therefore means the relay has processed the line, not merely that
// the bytes left this process. It says nothing about whether the relay
// accepted it; the protocol has no error channel.

use std::io::{self, BufWriter, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use sweetgeany_protocol::{RelayCommand, write_command};

use crate::error::ClientError;

/// Connect to `addr`, send `command`, and wait for the relay to hang up.
/// `timeout` bounds the connect, the write, and the wait separately.
pub fn send_command(
    addr: &str,
    command: &RelayCommand,
    timeout: Duration,
) -> Result<(), ClientError> {
    let candidates: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|source| ClientError::Resolve {
            addr: addr.to_owned(),
            source,
        })?
        .collect();

    let mut last_err = None;
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => return deliver(stream, command, timeout),
            Err(e) => last_err = Some(e),
        }
    }
    Err(ClientError::Connect {
        addr: addr.to_owned(),
        source: last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
        }),
    })
}

fn deliver(stream: TcpStream, command: &RelayCommand, timeout: Duration) -> Result<(), ClientError> {
    stream.set_write_timeout(Some(timeout))?;
    stream.set_read_timeout(Some(timeout))?;

    let mut writer = BufWriter::new(&stream);
    write_command(&mut writer, command)?;
    drop(writer);
    stream.shutdown(Shutdown::Write)?;

    // The relay never writes; EOF (or a reset, if it closed with unread
    // data) means it is done with the connection.
    let mut buf = [0u8; 64];
    loop {
        match (&stream).read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}
