//! Bootloader handshake.
//!
//! A [`BootloaderSession`] owns the serial port for one flashing run and
//! walks the bootloader through its handshake:
//!
//! ```text
//! Idle -> ResetSent -> AwaitingBanner -> ReadingProcInfo -> Ready
//!   \________\______________\_________________\______> Failed
//! ```
//!
//! Handshake failures are never retried: a wrong reset string, a wrong field
//! order or a silent device are configuration problems, not line noise.
//!
//! ## Example
//!
//! ```rust,no_run
//! use megaload::{
//!     BootloaderSession, MegaLoadProfile, NativePort, SerialConfig, SessionConfig,
//!     progress::NoProgress,
//! };
//!
//! fn main() -> megaload::Result<()> {
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 38400))?;
//!     let config = SessionConfig::default().with_reset_sequence(b"reset\n".to_vec());
//!     let mut session = BootloaderSession::new(port, MegaLoadProfile::new(), config);
//!
//!     let info = session.handshake(&mut NoProgress)?;
//!     println!("page size: {}", info.page_size);
//!     Ok(())
//! }
//! ```

use {
    crate::{
        error::{Error, HandshakeError, Result},
        port::Port,
        procinfo::{FieldOrder, ProcInfo},
        progress::{Event, ProgressReporter},
        protocol::{read_byte, write_frame},
        target::{BannerStep, DeviceProfile, ReadyStep},
    },
    log::{debug, info},
    std::{
        fmt,
        time::{Duration, Instant},
    },
};

/// Default time allowed for the device to show up after reset.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for each procinfo field.
pub const DEFAULT_FIELD_TIMEOUT: Duration = Duration::from_secs(3);

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Nothing sent yet.
    Idle,
    /// Reset sequence written.
    ResetSent,
    /// Waiting for the device banner.
    AwaitingBanner,
    /// Reading the five procinfo fields.
    ReadingProcInfo,
    /// Handshake complete; pages may be sent.
    Ready,
    /// The handshake or a later operation failed.
    Failed,
}

impl SessionState {
    /// Short state name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResetSent => "reset-sent",
            Self::AwaitingBanner => "awaiting-banner",
            Self::ReadingProcInfo => "reading-procinfo",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handshake configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bytes written to make the application jump into the bootloader.
    /// Already escape-decoded; empty means "reset by hand".
    pub reset_sequence: Vec<u8>,
    /// Overall time allowed for the banner to appear.
    pub handshake_timeout: Duration,
    /// Time allowed for each procinfo field and the ready marker.
    pub field_timeout: Duration,
    /// Order the device sends procinfo fields in.
    pub field_order: FieldOrder,
    /// Log every byte written and read on the `megaload::wire` target.
    pub trace_wire: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reset_sequence: Vec::new(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            field_timeout: DEFAULT_FIELD_TIMEOUT,
            field_order: FieldOrder::default(),
            trace_wire: false,
        }
    }
}

impl SessionConfig {
    /// Set the reset sequence.
    #[must_use]
    pub fn with_reset_sequence(mut self, reset_sequence: Vec<u8>) -> Self {
        self.reset_sequence = reset_sequence;
        self
    }

    /// Set the banner timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the per-field timeout.
    #[must_use]
    pub fn with_field_timeout(mut self, timeout: Duration) -> Self {
        self.field_timeout = timeout;
        self
    }

    /// Set the procinfo field order.
    #[must_use]
    pub fn with_field_order(mut self, field_order: FieldOrder) -> Self {
        self.field_order = field_order;
        self
    }

    /// Enable or disable raw byte tracing.
    #[must_use]
    pub fn with_trace_wire(mut self, trace_wire: bool) -> Self {
        self.trace_wire = trace_wire;
        self
    }
}

/// One flashing run against one device.
///
/// Generic over the port `P` so tests can drive it with a scripted port, and
/// over the device profile `D`.
pub struct BootloaderSession<P: Port, D: DeviceProfile> {
    port: P,
    profile: D,
    config: SessionConfig,
    state: SessionState,
    proc_info: Option<ProcInfo>,
}

impl<P: Port, D: DeviceProfile> BootloaderSession<P, D> {
    /// Create a session over an opened port.
    pub fn new(port: P, profile: D, config: SessionConfig) -> Self {
        Self {
            port,
            profile,
            config,
            state: SessionState::Idle,
            proc_info: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Device parameters, once the handshake completed.
    pub fn proc_info(&self) -> Option<ProcInfo> {
        self.proc_info
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Device profile.
    pub fn profile(&self) -> &D {
        &self.profile
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Release the port.
    pub fn close(mut self) -> Result<()> {
        self.port
            .close()
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = SessionState::Failed;
    }

    /// Port and profile, borrowed together for page transfers.
    pub(crate) fn channel(&mut self) -> (&mut P, &D) {
        (&mut self.port, &self.profile)
    }

    /// A session that already completed its handshake.
    #[cfg(test)]
    pub(crate) fn ready(port: P, profile: D, info: ProcInfo) -> Self {
        Self {
            port,
            profile,
            config: SessionConfig::default(),
            state: SessionState::Ready,
            proc_info: Some(info),
        }
    }

    /// Run the handshake and return the device parameters.
    ///
    /// Requires [`SessionState::Idle`]. Emits [`Event::ResetSent`],
    /// [`Event::BannerRecognized`] and [`Event::ProcInfoRead`] on the way,
    /// or [`Event::Failed`] if anything goes wrong.
    pub fn handshake<R>(&mut self, reporter: &mut R) -> Result<ProcInfo>
    where
        R: ProgressReporter + ?Sized,
    {
        if self.state != SessionState::Idle {
            return Err(HandshakeError::WrongState(self.state.name(), SessionState::Idle.name()).into());
        }

        match self.run_handshake(reporter) {
            Ok(info) => Ok(info),
            Err(e) => {
                debug!("Handshake failed in state {}: {e}", self.state);
                self.state = SessionState::Failed;
                reporter.report(&Event::Failed {
                    kind: e.kind(),
                    page: None,
                });
                Err(e)
            },
        }
    }

    fn run_handshake<R>(&mut self, reporter: &mut R) -> Result<ProcInfo>
    where
        R: ProgressReporter + ?Sized,
    {
        self.profile
            .reset();
        self.port
            .clear_buffers()?;

        if self
            .config
            .reset_sequence
            .is_empty()
        {
            debug!("No reset sequence configured, waiting for a manual reset");
        } else {
            debug!(
                "Sending reset sequence ({} bytes)",
                self.config
                    .reset_sequence
                    .len()
            );
            write_frame(&mut self.port, &self.config.reset_sequence, self.config.trace_wire)?;
        }
        self.state = SessionState::ResetSent;
        reporter.report(&Event::ResetSent);

        info!("Waiting for bootloader on {}...", self.port.name());
        self.state = SessionState::AwaitingBanner;
        let carry = self.await_banner()?;

        let description = self
            .profile
            .describe();
        info!("Found {description} bootloader");
        reporter.report(&Event::BannerRecognized { description });

        self.state = SessionState::ReadingProcInfo;
        let info = self.read_proc_info(carry)?;
        if self
            .profile
            .expects_ready_marker()
        {
            self.await_ready()?;
        }

        self.log_proc_info(&info);
        self.proc_info = Some(info);
        self.state = SessionState::Ready;
        reporter.report(&Event::ProcInfoRead(info));
        Ok(info)
    }

    /// Wait for the banner; returns a byte that already belongs to the first field.
    fn await_banner(&mut self) -> Result<Option<u8>> {
        let timeout = self.config.handshake_timeout;
        let first_field = self.config.field_order.fields()[0];
        let start = Instant::now();

        loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(HandshakeError::BannerTimeout(timeout).into());
            }
            let Some(byte) = read_byte(&mut self.port, remaining, self.config.trace_wire)? else {
                return Err(HandshakeError::BannerTimeout(timeout).into());
            };

            match self
                .profile
                .banner_byte(byte, first_field)
            {
                BannerStep::Pending => {},
                BannerStep::Reply(reply) => {
                    write_frame(&mut self.port, &reply, self.config.trace_wire)?;
                },
                BannerStep::Recognized { reply, carry } => {
                    if !reply.is_empty() {
                        write_frame(&mut self.port, &reply, self.config.trace_wire)?;
                    }
                    return Ok(carry);
                },
                BannerStep::Rejected => {
                    return Err(HandshakeError::UnexpectedByte {
                        byte,
                        stage: "waiting for the banner",
                    }
                    .into());
                },
            }
        }
    }

    fn read_proc_info(&mut self, mut carry: Option<u8>) -> Result<ProcInfo> {
        let width = self
            .profile
            .field_width();
        let order = *self
            .config
            .field_order
            .fields();
        let mut info = ProcInfo::default();

        for field in order {
            let mut raw = Vec::with_capacity(width);
            if let Some(b) = carry.take() {
                raw.push(b);
            }
            while raw.len() < width {
                match read_byte(&mut self.port, self.config.field_timeout, self.config.trace_wire)? {
                    Some(b) => raw.push(b),
                    None => return Err(HandshakeError::FieldTimeout(field).into()),
                }
            }

            let Some(value) = self
                .profile
                .decode_field(field, &raw)
            else {
                return Err(HandshakeError::InvalidField { field, raw }.into());
            };
            if value == 0 {
                return Err(HandshakeError::ZeroField(field).into());
            }
            debug!("Read {field}: {value} (raw {raw:02X?})");
            info.set(field, value);
        }

        Ok(info)
    }

    fn await_ready(&mut self) -> Result<()> {
        loop {
            let Some(byte) = read_byte(&mut self.port, self.config.field_timeout, self.config.trace_wire)? else {
                return Err(HandshakeError::ReadyTimeout.into());
            };
            match self
                .profile
                .ready_byte(byte)
            {
                ReadyStep::Ready => return Ok(()),
                ReadyStep::Skip => {},
                ReadyStep::Unexpected => {
                    return Err(Error::Handshake(HandshakeError::UnexpectedByte {
                        byte,
                        stage: "waiting for the ready marker",
                    }));
                },
            }
        }
    }

    fn log_proc_info(&self, info: &ProcInfo) {
        match self
            .profile
            .processor_name(info.signature)
        {
            Some(name) => info!("Processor: {name}"),
            None => info!("Processor signature: 0x{:02X}", info.signature),
        }
        info!(
            "Flash: {} bytes, boot: {} bytes, page: {} bytes, EEPROM: {} bytes",
            info.flash_size, info.boot_size, info.page_size, info.eeprom_size
        );
    }
}
