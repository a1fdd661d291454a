//! Xilinx Virtual Cable compatibility surface.
//!
//! A parallel dialect of the daemon on its own port, for vendor tools that
//! speak XVC 1.0 (`open_hw_target -xvc_url host:port`). Commands are ASCII
//! with a colon delimiter and no length prefix:
//!
//! - `getinfo:` is answered with the fixed `xvcServer_v1.0:2048\n` banner
//! - `settck:<ns>` carries a 32-bit little-endian period in nanoseconds;
//!   it is logged, ignored and echoed back (the adapter clock is not
//!   reconfigured)
//! - `shift:...` is defined by XVC 1.0 but not implemented here; it ends
//!   the connection
//!
//! Framing is command-prefix based: every command is at least six bytes, so
//! the reader peels six and branches on what they spell.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

use crate::session::SessionError;

/// Info banner sent for `getinfo:`. The vector size matches what the
/// hardware daemon always reported.
const XVC_INFO: &[u8] = b"xvcServer_v1.0:2048\n";

/// Runs one XVC connection until EOF, error or an unsupported command.
pub fn handle_connection(mut tcp: TcpStream) -> Result<(), SessionError> {
    tcp.set_nodelay(true)?;

    loop {
        // All commands are at least six bytes long.
        let mut cmd = [0u8; 8];
        if !read_prefix(&mut tcp, &mut cmd[..6])? {
            log::debug!("XVC client closed the connection");
            return Ok(());
        }

        if cmd[0] == b'g' {
            // should be "getinfo:", read 2 more bytes to make sure
            tcp.read_exact(&mut cmd[6..8])?;
            if &cmd != b"getinfo:" {
                return Err(SessionError::Protocol(format!(
                    "garbage XVC command {:?} (expected getinfo)",
                    String::from_utf8_lossy(&cmd)
                )));
            }
            log::debug!("XVC getinfo");
            tcp.write_all(XVC_INFO)?;
        } else if &cmd[..6] == b"shift:" {
            return Err(SessionError::Protocol(
                "XVC shift command is not implemented".to_string(),
            ));
        } else {
            // last candidate: "settck:", one more byte to check
            tcp.read_exact(&mut cmd[6..7])?;
            if &cmd[..7] != b"settck:" {
                return Err(SessionError::Protocol(format!(
                    "garbage XVC command {:?} (expected settck)",
                    String::from_utf8_lossy(&cmd[..7])
                )));
            }

            let mut period = [0u8; 4];
            tcp.read_exact(&mut period)?;
            let period_ns = u32::from_le_bytes(period);
            log::debug!("XVC client requested a {} ns TCK period", period_ns);
            log::info!("ignoring requested TCK period, the adapter clock is fixed");
            tcp.write_all(&period)?;
        }
    }
}

/// Fills `buf` completely. Returns `false` on a clean EOF before the first
/// byte; EOF inside a command is a protocol error.
fn read_prefix(tcp: &mut TcpStream, buf: &mut [u8]) -> Result<bool, SessionError> {
    let mut filled = 0;
    while filled < buf.len() {
        match tcp.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(SessionError::Protocol(
                    "stream ended inside an XVC command".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}
