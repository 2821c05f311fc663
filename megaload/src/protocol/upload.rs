//! Page-by-page flash upload.
//!
//! The image is cut into page-aligned blocks sized by the device's page
//! size. Each block is framed by the device profile, written, and answered
//! with a single ACK or NAK byte. NAKs, timeouts and stray bytes are retried
//! up to a bound; transport errors abort at once.
//!
//! ```text
//! Host                                Device
//!   |                                   |
//!   |------- page frame (page 0) ------>|
//!   |<-------------- NAK ---------------|
//!   |------- page frame (page 0) ------>|
//!   |<-------------- ACK ---------------|
//!   |               ...                 |
//!   |------- finalize (optional) ------>|
//! ```

use {
    crate::{
        error::{BoundsError, Error, HandshakeError, Result},
        image::MemoryImage,
        port::Port,
        procinfo::ProcInfo,
        progress::{Event, ProgressReporter, RetryReason},
        protocol::{read_byte, write_frame},
        session::{BootloaderSession, SessionState},
        target::{Ack, DeviceProfile},
    },
    log::{debug, info, trace, warn},
    std::time::Duration,
};

/// Default time to wait for a page acknowledgement.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Default number of consecutive failures tolerated per page.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Default fill for page bytes the image does not define.
pub const DEFAULT_PAD: u8 = 0xFF;

/// Upload configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Time to wait for each page acknowledgement.
    pub page_timeout: Duration,
    /// Consecutive failed attempts after which a page is given up on.
    pub max_failures: u32,
    /// Fill byte for undefined page bytes.
    pub pad: u8,
    /// Refuse images that reach into the boot section.
    pub protect_boot_section: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            page_timeout: DEFAULT_PAGE_TIMEOUT,
            max_failures: DEFAULT_MAX_FAILURES,
            pad: DEFAULT_PAD,
            protect_boot_section: true,
        }
    }
}

impl UploadConfig {
    /// Set the page acknowledgement timeout.
    #[must_use]
    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    /// Set the consecutive failure bound (at least 1).
    #[must_use]
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    /// Set the pad byte.
    #[must_use]
    pub fn with_pad(mut self, pad: u8) -> Self {
        self.pad = pad;
        self
    }

    /// Enable or disable boot-section protection.
    #[must_use]
    pub fn with_boot_protection(mut self, protect: bool) -> Self {
        self.protect_boot_section = protect;
        self
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UploadSummary {
    /// Pages acknowledged by the device.
    pub pages_written: usize,
    /// Payload bytes sent, padding included.
    pub bytes_written: usize,
    /// `(device page number, retries)` for every page sent.
    pub page_retries: Vec<(u32, u32)>,
    /// Sum of all retries.
    pub total_retries: u32,
}

impl UploadSummary {
    /// Retries needed by a device page, if it was sent.
    pub fn retries_for(&self, page: u32) -> Option<u32> {
        self.page_retries
            .iter()
            .find(|(p, _)| *p == page)
            .map(|(_, r)| *r)
    }
}

/// Uploads a memory image through a session that completed its handshake.
pub struct Uploader<'a, P: Port, D: DeviceProfile> {
    session: &'a mut BootloaderSession<P, D>,
    config: UploadConfig,
}

impl<'a, P: Port, D: DeviceProfile> Uploader<'a, P, D> {
    /// Create an uploader borrowing `session` for the duration of the upload.
    pub fn new(session: &'a mut BootloaderSession<P, D>, config: UploadConfig) -> Self {
        Self { session, config }
    }

    /// Upload configuration.
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `image` and return what was written.
    ///
    /// Bounds and geometry are checked before anything is sent. On failure
    /// the session moves to [`SessionState::Failed`]; pages already written
    /// stay written.
    pub fn upload<R>(&mut self, image: &MemoryImage, reporter: &mut R) -> Result<UploadSummary>
    where
        R: ProgressReporter + ?Sized,
    {
        let state = self
            .session
            .state();
        let info = match self
            .session
            .proc_info()
        {
            Some(info) if state == SessionState::Ready => info,
            _ => {
                return Err(HandshakeError::WrongState(state.name(), SessionState::Ready.name()).into());
            },
        };

        match self.run(image, &info, reporter) {
            Ok(summary) => {
                reporter.report(&Event::Finished(summary.clone()));
                Ok(summary)
            },
            Err(e) => {
                self.session
                    .mark_failed();
                reporter.report(&Event::Failed {
                    kind: e.kind(),
                    page: e.page(),
                });
                Err(e)
            },
        }
    }

    fn run<R>(&mut self, image: &MemoryImage, info: &ProcInfo, reporter: &mut R) -> Result<UploadSummary>
    where
        R: ProgressReporter + ?Sized,
    {
        let pages = self.plan(image, info)?;
        let total = pages.len();
        let page_size = info.page_size;
        info!("Uploading {total} pages of {page_size} bytes");
        reporter.report(&Event::UploadStarted {
            total_pages: total,
            page_size,
        });

        let trace_wire = self
            .session
            .config()
            .trace_wire;
        let mut summary = UploadSummary::default();

        for (index, &address) in pages
            .iter()
            .enumerate()
        {
            let page = address / page_size;
            let payload = image.page(address, page_size, self.config.pad);
            let frame = self
                .session
                .profile()
                .encode_page(address, &payload, info);

            let retries = self.send_page(index, page, address, &frame, reporter)?;

            summary.pages_written += 1;
            summary.bytes_written += payload.len();
            summary
                .page_retries
                .push((page, retries));
            summary.total_retries += retries;
            reporter.report(&Event::PageWritten {
                index,
                total,
                page,
                retries,
            });
        }

        let (port, profile) = self
            .session
            .channel();
        if let Some(command) = profile.finalize() {
            debug!("Sending finalize command");
            write_frame(port, &command, trace_wire)?;
        }

        info!(
            "Upload complete: {} pages, {} bytes, {} retries",
            summary.pages_written, summary.bytes_written, summary.total_retries
        );
        Ok(summary)
    }

    /// Check the image against the device and list the pages to send.
    fn plan(&self, image: &MemoryImage, info: &ProcInfo) -> Result<Vec<u32>> {
        let (Some(_), Some(max)) = (image.min_address(), image.max_address()) else {
            return Err(Error::EmptyImage);
        };

        let page_size = info.page_size;
        if page_size == 0 {
            return Err(Error::Config("device reported a zero page size".into()));
        }
        for (what, size) in [("flash", info.flash_size), ("boot", info.boot_size)] {
            if size % page_size != 0 {
                return Err(BoundsError::Misaligned {
                    what,
                    size,
                    page_size,
                }
                .into());
            }
        }

        let end = (u64::from(max) / u64::from(page_size) + 1) * u64::from(page_size);
        if end > u64::from(info.flash_size) {
            return Err(BoundsError::ExceedsFlash {
                end,
                flash_size: info.flash_size,
            }
            .into());
        }
        if self
            .config
            .protect_boot_section
            && end > u64::from(info.boot_start())
        {
            return Err(BoundsError::OverlapsBootSection {
                end,
                boot_start: info.boot_start(),
            }
            .into());
        }

        let pages = image.page_starts(page_size);
        debug!(
            "Image covers 0x{:X}..0x{end:X}, {} pages with data",
            pages
                .first()
                .copied()
                .unwrap_or_default(),
            pages.len()
        );
        Ok(pages)
    }

    /// Send one page until it is acknowledged; returns the retries it took.
    fn send_page<R>(
        &mut self,
        index: usize,
        page: u32,
        address: u32,
        frame: &[u8],
        reporter: &mut R,
    ) -> Result<u32>
    where
        R: ProgressReporter + ?Sized,
    {
        let trace_wire = self
            .session
            .config()
            .trace_wire;
        let page_timeout = self.config.page_timeout;
        let max_failures = self
            .config
            .max_failures
            .max(1);
        let (port, profile) = self
            .session
            .channel();

        let mut failures = 0;
        loop {
            trace!("Sending page {page} (attempt {})", failures + 1);
            write_frame(port, frame, trace_wire)?;

            let reason = match read_byte(port, page_timeout, trace_wire)? {
                Some(byte) => match profile.classify_ack(byte) {
                    Ack::Ack => {
                        trace!("Page {page} ACKed");
                        return Ok(failures);
                    },
                    Ack::Nak => {
                        debug!("Page {page} NAKed, retrying...");
                        RetryReason::Nak
                    },
                    Ack::Other => {
                        warn!("Unexpected response to page {page}: 0x{byte:02X}, retrying...");
                        RetryReason::Unexpected(byte)
                    },
                },
                None => {
                    debug!("Timeout waiting for page {page} ACK, retrying...");
                    RetryReason::Timeout
                },
            };

            failures += 1;
            reporter.report(&Event::PageRetry {
                index,
                page,
                failures,
                reason,
            });
            if failures >= max_failures {
                return Err(Error::PageFailed {
                    page,
                    address,
                    attempts: failures,
                });
            }
        }
    }
}
