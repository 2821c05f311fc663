//! Protocol implementations.
//!
//! - [`checksum`]: 8-bit checksums shared by HEX records and page frames
//! - [`upload`]: page-by-page flash upload with ACK/NAK and bounded retries
//!
//! Both the handshake and the uploader talk to the port through the two
//! helpers here, which bound every read by a timeout and optionally log the
//! raw byte exchange.

pub mod checksum;
pub mod upload;

use {
    crate::{
        error::{Error, Result},
        port::Port,
    },
    log::trace,
    std::{fmt::Write as _, io, time::Duration},
};

/// Log target for raw byte traces.
pub const WIRE_TARGET: &str = "megaload::wire";

/// Read one byte, waiting at most `timeout`.
///
/// Returns `Ok(None)` on timeout. Any other I/O failure is a transport error.
pub(crate) fn read_byte<P: Port + ?Sized>(
    port: &mut P,
    timeout: Duration,
    trace_wire: bool,
) -> Result<Option<u8>> {
    if port.timeout() != timeout {
        port.set_timeout(timeout)?;
    }

    let mut buf = [0u8; 1];
    loop {
        match port.read(&mut buf) {
            Ok(1) => {
                if trace_wire {
                    trace!(target: WIRE_TARGET, "rx {:02X}", buf[0]);
                }
                return Ok(Some(buf[0]));
            },
            Ok(_) => return Ok(None),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                return Ok(None);
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

/// Write a complete frame and flush it.
pub(crate) fn write_frame<P: Port + ?Sized>(port: &mut P, data: &[u8], trace_wire: bool) -> Result<()> {
    if trace_wire {
        trace!(target: WIRE_TARGET, "tx [{}] {}", data.len(), hex_dump(data));
    }
    port.write_all_bytes(data)
}

fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    #[test]
    fn test_read_byte_sets_timeout() {
        let mut port = MockPort::new().bytes(&[0x21]);
        let got = read_byte(&mut port, Duration::from_millis(250), false).unwrap();
        assert_eq!(got, Some(0x21));
        assert_eq!(port.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_read_byte_timeout_is_none() {
        let mut port = MockPort::new().timeout_once();
        assert_eq!(read_byte(&mut port, Duration::from_millis(5), false).unwrap(), None);
    }

    #[test]
    fn test_read_byte_transport_error() {
        let mut port = MockPort::new().error(io::ErrorKind::BrokenPipe);
        let err = read_byte(&mut port, Duration::from_millis(5), false).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_read_byte_retries_interrupted() {
        let mut port = MockPort::new()
            .error(io::ErrorKind::Interrupted)
            .bytes(&[0x40]);
        assert_eq!(read_byte(&mut port, Duration::from_millis(5), true).unwrap(), Some(0x40));
    }

    #[test]
    fn test_hex_dump() {
        assert_eq!(hex_dump(&[0x00, 0xAB, 0x5]), "00 AB 05");
        assert_eq!(hex_dump(&[]), "");
    }
}
