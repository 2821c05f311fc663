//! Lifecycle events emitted while talking to the bootloader.
//!
//! The session and the uploader never print anything themselves. They hand
//! [`Event`]s to a [`ProgressReporter`], which is usually a closure:
//!
//! ```rust
//! use megaload::progress::{Event, ProgressReporter};
//!
//! let mut pages = 0;
//! let mut reporter = |event: &Event| {
//!     if let Event::PageWritten { .. } = event {
//!         pages += 1;
//!     }
//! };
//! reporter.report(&Event::ResetSent);
//! ```

use crate::error::ErrorKind;
use crate::procinfo::ProcInfo;
use crate::protocol::upload::UploadSummary;

/// Why a page attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The device answered with NAK.
    Nak,
    /// No answer within the page timeout.
    Timeout,
    /// The device answered with a byte that is neither ACK nor NAK.
    Unexpected(u8),
}

/// A lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The reset sequence was written (or there was none to write).
    ResetSent,
    /// The device banner was recognized.
    BannerRecognized {
        /// Profile-specific description, e.g. the protocol version.
        description: String,
    },
    /// All procinfo fields were read and validated.
    ProcInfoRead(ProcInfo),
    /// The page plan passed its bounds checks.
    UploadStarted {
        /// Pages that will be sent.
        total_pages: usize,
        /// Page size in bytes.
        page_size: u32,
    },
    /// A page attempt failed and will be retried (or given up on).
    PageRetry {
        /// Position of the page within this upload.
        index: usize,
        /// Device page number.
        page: u32,
        /// Failed attempts so far for this page.
        failures: u32,
        /// What went wrong.
        reason: RetryReason,
    },
    /// A page was acknowledged.
    PageWritten {
        /// Position of the page within this upload.
        index: usize,
        /// Pages in this upload.
        total: usize,
        /// Device page number.
        page: u32,
        /// Retries this page needed.
        retries: u32,
    },
    /// The upload completed.
    Finished(UploadSummary),
    /// The handshake or upload failed.
    Failed {
        /// Error class.
        kind: ErrorKind,
        /// Device page number, for page failures.
        page: Option<u32>,
    },
}

/// Sink for lifecycle events.
pub trait ProgressReporter {
    /// Receive one event.
    fn report(&mut self, event: &Event);
}

impl<F> ProgressReporter for F
where
    F: FnMut(&Event),
{
    fn report(&mut self, event: &Event) {
        self(event);
    }
}

/// Reporter that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _event: &Event) {}
}
