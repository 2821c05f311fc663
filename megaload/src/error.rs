//! Error types for megaload.

use crate::procinfo::ProcInfoField;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for megaload operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for megaload operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Malformed Intel HEX input.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The bootloader handshake did not complete.
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The image does not fit the device.
    #[error("Out of bounds: {0}")]
    Bounds(#[from] BoundsError),

    /// A page was rejected or unanswered too many times in a row.
    #[error("Page {page} (0x{address:05X}) failed after {attempts} attempts")]
    PageFailed {
        /// Device page number (address / page size).
        page: u32,
        /// Start address of the page.
        address: u32,
        /// Number of consecutive failed attempts.
        attempts: u32,
    },

    /// The image contains no data.
    #[error("HEX image is empty, nothing to download")]
    EmptyImage,

    /// The procinfo field order is not a permutation of the five fields.
    #[error("Invalid field order: {0}")]
    InvalidFieldOrder(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification of an [`Error`], used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ErrorKind {
    /// Malformed HEX input.
    Parse,
    /// Handshake with the bootloader failed.
    Handshake,
    /// Image exceeds the device memory.
    Bounds,
    /// The channel itself failed.
    Transport,
    /// Retry budget exhausted for one page.
    PageFailed,
    /// Invalid configuration.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "parse",
            Self::Handshake => "handshake",
            Self::Bounds => "bounds",
            Self::Transport => "transport",
            Self::PageFailed => "page-failed",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Transport,
            #[cfg(feature = "native")]
            Self::Serial(_) => ErrorKind::Transport,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Handshake(_) => ErrorKind::Handshake,
            Self::Bounds(_) | Self::EmptyImage => ErrorKind::Bounds,
            Self::PageFailed { .. } => ErrorKind::PageFailed,
            Self::InvalidFieldOrder(_) | Self::Config(_) => ErrorKind::Config,
        }
    }

    /// The device page this error refers to, if any.
    pub fn page(&self) -> Option<u32> {
        match self {
            Self::PageFailed { page, .. } => Some(*page),
            _ => None,
        }
    }
}

/// An Intel HEX parse failure with the 1-based line it occurred on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based line number in the input text.
    pub line: usize,
    /// What went wrong.
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub(crate) fn new(line: usize, kind: ParseErrorKind) -> Self {
        Self { line, kind }
    }
}

/// Reason an Intel HEX record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    /// The line does not begin with ':'.
    #[error("record does not start with ':'")]
    MissingStartCode,

    /// A character that is not a hex digit.
    #[error("invalid hex digit {found:?} at column {column}")]
    BadHexDigit {
        /// 1-based column of the offending character.
        column: usize,
        /// The character found.
        found: char,
    },

    /// The record is shorter than its header requires.
    #[error("truncated record: expected {expected} bytes, found {found}")]
    Truncated {
        /// Bytes required by the length field.
        expected: usize,
        /// Bytes present.
        found: usize,
    },

    /// The record is longer than its length byte says.
    #[error("record length mismatch: expected {expected} bytes, found {found}")]
    LengthMismatch {
        /// Bytes required by the length field.
        expected: usize,
        /// Bytes present.
        found: usize,
    },

    /// Checksum byte does not match the record contents.
    #[error("checksum mismatch: expected 0x{expected:02X}, found 0x{found:02X}")]
    ChecksumMismatch {
        /// Checksum computed from the record.
        expected: u8,
        /// Checksum byte stored in the record.
        found: u8,
    },

    /// A record type this parser does not accept.
    #[error("unrecognized record type 0x{0:02X}")]
    UnknownRecordType(u8),

    /// Extended address record with a payload other than two bytes.
    #[error("extended address record must carry 2 data bytes, found {0}")]
    BadExtendedAddress(usize),

    /// Data would land above the 32-bit address space.
    #[error("address overflows 32 bits")]
    AddressOverflow,
}

/// Reason the bootloader handshake failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// No banner within the session timeout.
    #[error("no bootloader banner within {}s", .0.as_secs_f32())]
    BannerTimeout(Duration),

    /// A procinfo field did not arrive in time.
    #[error("timeout reading {0} field")]
    FieldTimeout(ProcInfoField),

    /// The profile could not decode a field value.
    #[error("unexpected {field} code {raw:02X?}")]
    InvalidField {
        /// Field being read.
        field: ProcInfoField,
        /// Raw bytes received.
        raw: Vec<u8>,
    },

    /// A decoded field value was zero.
    #[error("{0} must be strictly positive")]
    ZeroField(ProcInfoField),

    /// A byte arrived that is not valid at this point of the handshake.
    #[error("unexpected byte 0x{byte:02X} while {stage}")]
    UnexpectedByte {
        /// Byte received.
        byte: u8,
        /// What the session was waiting for.
        stage: &'static str,
    },

    /// No ready marker after the procinfo block.
    #[error("timeout waiting for the bootloader to start loading")]
    ReadyTimeout,

    /// The session is not in the state the operation requires.
    #[error("session is {0}, expected {1}")]
    WrongState(&'static str, &'static str),
}

/// Reason an image does not fit the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundsError {
    /// Covered range ends past the end of flash.
    #[error("image ends at 0x{end:X}, flash size is 0x{flash_size:X}")]
    ExceedsFlash {
        /// First address past the last covered page.
        end: u64,
        /// Device flash size in bytes.
        flash_size: u32,
    },

    /// Covered range reaches into the bootloader section.
    #[error("image ends at 0x{end:X}, bootloader starts at 0x{boot_start:X}")]
    OverlapsBootSection {
        /// First address past the last covered page.
        end: u64,
        /// First address of the boot section.
        boot_start: u32,
    },

    /// Flash or boot size is not a whole number of pages.
    #[error("{what} size {size} is not a multiple of page size {page_size}")]
    Misaligned {
        /// Which region ("flash" or "boot").
        what: &'static str,
        /// Region size in bytes.
        size: u32,
        /// Page size in bytes.
        page_size: u32,
    },
}
