// Line framing for the command socket.
//
// Each connection carries exactly one command. `read_line` reads up to the
// first `\n` or to EOF, whichever comes first, because some producers (the
// git commit notifier among them) write the command and close the socket
// without a terminator. The returned bytes exclude the `\n`; trailing `\r`
// and other whitespace are left for the command parser to strip.
//
// `max_len` bounds the allocation for a single line. A line longer than that
// is rejected with `InvalidData` rather than truncated, so a half-read
// command is never relayed.

use std::io::{self, BufRead, Read, Write};

use crate::command::RelayCommand;

/// Default upper bound on a command line, excluding the terminator.
pub const MAX_LINE_LEN: usize = 4096;

/// Read one command line. Returns `Ok(None)` if the peer closed the stream
/// before sending anything.
pub fn read_line<R: BufRead>(reader: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX).saturating_add(1);
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if buf.len() > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("command line too long (max {max_len} bytes)"),
        ));
    }
    Ok(Some(buf))
}

/// Write a command as a single `\n`-terminated line and flush.
pub fn write_command<W: Write>(writer: &mut W, command: &RelayCommand) -> io::Result<()> {
    writeln!(writer, "{command}")?;
    writer.flush()
}
