//! Port abstraction for serial communication with the bootloader.
//!
//! The protocol layer only needs a duplex byte stream with an adjustable
//! read timeout. This module defines that contract as the `Port` trait so the
//! session and uploader stay independent of the serial backend:
//!
//! ```text
//! +--------------------------+
//! | BootloaderSession        |
//! | Uploader                 |
//! +------------+-------------+
//!              |
//!              v
//! +------------+-------------+
//! |        Port trait        |
//! +------------+-------------+
//!              |
//!              v
//! +------------+-------------+
//! | NativePort (serialport)  |
//! +--------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use megaload::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> megaload::Result<()> {
//!     port.write_all_bytes(b"\x55")?;
//!
//!     let mut buf = [0u8; 1];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of MegaLoad bootloaders.
pub const DEFAULT_BAUD: u32 = 38400;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout.
    pub timeout: Duration,
    /// Stop bits. MegaLoad links are more reliable with two.
    pub stop_bits: StopBits,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_secs(3),
            stop_bits: StopBits::Two,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of stop bits.
    #[must_use]
    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

/// Number of stop bits. Data bits and parity are fixed at 8 and none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    One,
    /// 2 stop bits.
    #[default]
    Two,
}

/// Duplex byte stream to the bootloader.
///
/// Reads must return within the configured timeout, either with data or
/// with an `io::ErrorKind::TimedOut` error (or `Ok(0)`).
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
