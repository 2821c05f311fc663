//! # megaload
//!
//! A library for flashing AVR microcontrollers through a MegaLoad-style
//! serial bootloader.
//!
//! The crate covers the whole host side of a flashing run:
//!
//! - Intel HEX parsing into a sparse [`MemoryImage`]
//! - The bootloader handshake ([`BootloaderSession`]): reset trigger,
//!   banner recognition and the five procinfo fields in a configurable order
//! - Page upload ([`Uploader`]) with ACK/NAK, bounded retries and bounds
//!   checks done before anything is written
//! - Device families as pluggable [`DeviceProfile`]s
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization of reporting types
//!
//! ## Example
//!
//! ```rust,no_run
//! use megaload::{
//!     BootloaderSession, MegaLoadProfile, MemoryImage, NativePort, SerialConfig,
//!     SessionConfig, UploadConfig, Uploader, progress::Event,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = MemoryImage::from_file("firmware.hex")?;
//!
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 38400))?;
//!     let mut session = BootloaderSession::new(port, MegaLoadProfile::new(), SessionConfig::default());
//!
//!     let mut report = |event: &Event| println!("{event:?}");
//!     session.handshake(&mut report)?;
//!
//!     let summary = Uploader::new(&mut session, UploadConfig::default()).upload(&image, &mut report)?;
//!     println!("{} pages written", summary.pages_written);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod image;
pub mod port;
pub mod procinfo;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod target;

#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    error::{BoundsError, Error, ErrorKind, HandshakeError, ParseError, ParseErrorKind, Result},
    image::{MemoryImage, Segment},
    port::{Port, SerialConfig},
    procinfo::{FieldOrder, ProcInfo, ProcInfoField},
    progress::{Event, NoProgress, ProgressReporter},
    protocol::upload::{UploadConfig, UploadSummary, Uploader},
    session::{BootloaderSession, SessionConfig, SessionState},
    target::{DeviceProfile, GenericProfile, MegaLoadProfile, ProfileKind},
};
