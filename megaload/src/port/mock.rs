//! Scripted port used by the protocol tests.
//!
//! Unlike `Cursor<Vec<u8>>`, reads and writes are independent: reads replay a
//! script of bytes, timeouts and I/O errors, and every `write` call is
//! captured separately so tests can inspect individual frames.

use {
    crate::{error::Result, port::Port},
    std::{collections::VecDeque, io, time::Duration},
};

/// One scripted read outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Byte(u8),
    Timeout,
    Error(io::ErrorKind),
}

pub(crate) struct MockPort {
    script: VecDeque<Step>,
    pub(crate) writes: Vec<Vec<u8>>,
    pub(crate) fail_writes: bool,
    pub(crate) closed: bool,
    timeout: Duration,
}

impl MockPort {
    pub(crate) fn new() -> Self {
        Self {
            script: VecDeque::new(),
            writes: Vec::new(),
            fail_writes: false,
            closed: false,
            timeout: Duration::from_millis(10),
        }
    }

    /// Queue bytes the device will send.
    pub(crate) fn bytes(mut self, data: &[u8]) -> Self {
        self.script
            .extend(data.iter().map(|b| Step::Byte(*b)));
        self
    }

    /// Queue a single read timeout.
    pub(crate) fn timeout_once(mut self) -> Self {
        self.script
            .push_back(Step::Timeout);
        self
    }

    /// Queue a transport error.
    pub(crate) fn error(mut self, kind: io::ErrorKind) -> Self {
        self.script
            .push_back(Step::Error(kind));
        self
    }

    /// All written bytes, concatenated.
    pub(crate) fn written(&self) -> Vec<u8> {
        self.writes
            .concat()
    }

    /// Number of unread scripted steps.
    pub(crate) fn remaining(&self) -> usize {
        self.script
            .len()
    }
}

impl io::Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self
            .script
            .pop_front()
        {
            Some(Step::Byte(b)) => {
                buf[0] = b;
                Ok(1)
            },
            Some(Step::Error(kind)) => Err(io::Error::new(kind, "scripted failure")),
            Some(Step::Timeout) | None => Err(io::Error::new(io::ErrorKind::TimedOut, "no data")),
        }
    }
}

impl io::Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
        }
        self.writes
            .push(buf.to_vec());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
