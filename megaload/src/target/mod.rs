//! Device profiles.
//!
//! The bootloader families that speak "MegaLoad" differ in how they announce
//! themselves, how procinfo values are encoded, how a page write is framed,
//! and which bytes acknowledge a page. A [`DeviceProfile`] captures those
//! differences so the session and uploader stay family-agnostic.
//!
//! Two profiles ship with the crate:
//!
//! - [`MegaLoadProfile`]: MegaLoad 3, 4 and 5 AVR bootloaders
//! - [`GenericProfile`]: a configurable banner followed by fixed-width
//!   big-endian fields, with `address | length | payload | checksum` frames

pub mod generic;
pub mod megaload;

pub use generic::GenericProfile;
pub use megaload::MegaLoadProfile;

use crate::procinfo::{ProcInfo, ProcInfoField};
use std::fmt;

/// What the session should do with a byte received while awaiting the banner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BannerStep {
    /// Not recognized yet; keep waiting.
    Pending,
    /// Write these bytes to the device and keep waiting.
    Reply(Vec<u8>),
    /// The banner is complete.
    Recognized {
        /// Bytes to write before reading fields (may be empty).
        reply: Vec<u8>,
        /// A byte that already belongs to the first procinfo field.
        carry: Option<u8>,
    },
    /// The device sent something this profile cannot be talking to.
    Rejected,
}

/// What the session should do with a byte received after the procinfo block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyStep {
    /// The bootloader is ready for pages.
    Ready,
    /// Ignore the byte and keep reading.
    Skip,
    /// Not valid here.
    Unexpected,
}

/// Interpretation of a page response byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Page accepted and written.
    Ack,
    /// Page rejected.
    Nak,
    /// Neither; counted as a failed attempt.
    Other,
}

/// Device-family behavior used by the session and uploader.
pub trait DeviceProfile {
    /// Short profile name for logs.
    fn name(&self) -> &'static str;

    /// Forget any banner state from a previous handshake.
    fn reset(&mut self) {}

    /// Feed one byte received while waiting for the banner. `first_field` is
    /// the field the device will send first.
    fn banner_byte(&mut self, byte: u8, first_field: ProcInfoField) -> BannerStep;

    /// Human-readable description once the banner is recognized.
    fn describe(&self) -> String {
        self.name()
            .to_string()
    }

    /// Number of bytes each procinfo field occupies on the wire.
    fn field_width(&self) -> usize;

    /// Decode a raw field. `None` means the value is not valid for `field`.
    fn decode_field(&self, field: ProcInfoField, raw: &[u8]) -> Option<u32>;

    /// Processor name for a signature, if known.
    fn processor_name(&self, _signature: u32) -> Option<&'static str> {
        None
    }

    /// Whether the device sends a ready marker after the procinfo block.
    fn expects_ready_marker(&self) -> bool {
        false
    }

    /// Feed one byte received while waiting for the ready marker.
    fn ready_byte(&mut self, _byte: u8) -> ReadyStep {
        ReadyStep::Ready
    }

    /// Build the page-write command for `payload` at `address`.
    fn encode_page(&self, address: u32, payload: &[u8], info: &ProcInfo) -> Vec<u8>;

    /// Classify a page response byte.
    fn classify_ack(&self, byte: u8) -> Ack;

    /// Command sent after the last page, if the family has one.
    fn finalize(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Profile selector, e.g. for command-line or config values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProfileKind {
    /// MegaLoad 3/4/5.
    #[default]
    MegaLoad,
    /// Generic framed protocol.
    Generic,
}

impl ProfileKind {
    /// Parse a profile name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name
            .to_ascii_lowercase()
            .as_str()
        {
            "megaload" | "mega" => Some(Self::MegaLoad),
            "generic" => Some(Self::Generic),
            _ => None,
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MegaLoad => write!(f, "megaload"),
            Self::Generic => write!(f, "generic"),
        }
    }
}
