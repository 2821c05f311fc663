//! Firmware images.
//!
//! A [`MemoryImage`] is a sparse map from 32-bit address to byte. It is built
//! from Intel HEX text (see [`ihex`]) and sliced into pages by the uploader.

pub mod ihex;

use crate::error::{ParseError, Result};
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Sparse memory image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    bytes: BTreeMap<u32, u8>,
}

/// A maximal run of consecutive defined addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Segment {
    /// First address of the run.
    pub start: u32,
    /// Bytes of the run.
    pub data: Vec<u8>,
}

impl Segment {
    /// First address past the end of the run.
    pub fn end(&self) -> u64 {
        u64::from(self.start) + self.data.len() as u64
    }
}

impl MemoryImage {
    /// Create an empty image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse Intel HEX text.
    pub fn from_ihex(text: &str) -> std::result::Result<Self, ParseError> {
        ihex::parse(text)
    }

    /// Read and parse an Intel HEX file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let image = Self::from_ihex(&text)?;
        debug!(
            "Loaded {} bytes in {} segment(s) from {}",
            image.len(),
            image
                .segments()
                .len(),
            path.display()
        );
        Ok(image)
    }

    /// Serialize to Intel HEX with at most `record_len` data bytes per record.
    pub fn to_ihex(&self, record_len: usize) -> String {
        ihex::serialize(self, record_len)
    }

    /// Define one byte, returning the previous value if there was one.
    pub fn insert(&mut self, address: u32, value: u8) -> Option<u8> {
        self.bytes
            .insert(address, value)
    }

    /// Define a run of bytes starting at `address`.
    ///
    /// Bytes that would land above `u32::MAX` are dropped.
    pub fn write(&mut self, address: u32, data: &[u8]) {
        for (addr, value) in (address..=u32::MAX).zip(data) {
            self.bytes
                .insert(addr, *value);
        }
    }

    /// Value at `address`, if defined.
    pub fn get(&self, address: u32) -> Option<u8> {
        self.bytes
            .get(&address)
            .copied()
    }

    /// Number of defined bytes.
    pub fn len(&self) -> usize {
        self.bytes
            .len()
    }

    /// Whether no byte is defined.
    pub fn is_empty(&self) -> bool {
        self.bytes
            .is_empty()
    }

    /// Lowest defined address.
    pub fn min_address(&self) -> Option<u32> {
        self.bytes
            .keys()
            .next()
            .copied()
    }

    /// Highest defined address.
    pub fn max_address(&self) -> Option<u32> {
        self.bytes
            .keys()
            .next_back()
            .copied()
    }

    /// Iterate over defined `(address, byte)` pairs in address order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.bytes
            .iter()
            .map(|(a, b)| (*a, *b))
    }

    /// Group defined bytes into maximal contiguous runs.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = Vec::new();
        for (addr, value) in self.iter() {
            match segments.last_mut() {
                Some(seg) if seg.end() == u64::from(addr) => seg
                    .data
                    .push(value),
                _ => segments.push(Segment {
                    start: addr,
                    data: vec![value],
                }),
            }
        }
        segments
    }

    /// Start addresses of every `page_size`-aligned page holding at least one
    /// defined byte, ascending.
    pub fn page_starts(&self, page_size: u32) -> Vec<u32> {
        let mut starts: Vec<u32> = Vec::new();
        if page_size == 0 {
            return starts;
        }
        for addr in self.bytes.keys() {
            let start = addr - addr % page_size;
            if starts.last() != Some(&start) {
                starts.push(start);
            }
        }
        starts
    }

    /// Materialize `size` bytes from `start`, filling holes with `pad`.
    pub fn page(&self, start: u32, size: u32, pad: u8) -> Vec<u8> {
        let mut page = vec![pad; size as usize];
        let end = u64::from(start) + u64::from(size);
        for (addr, value) in self
            .bytes
            .range(start..)
            .take_while(|(addr, _)| u64::from(**addr) < end)
        {
            page[(addr - start) as usize] = *value;
        }
        page
    }
}

impl FromIterator<(u32, u8)> for MemoryImage {
    fn from_iter<I: IntoIterator<Item = (u32, u8)>>(iter: I) -> Self {
        Self {
            bytes: iter
                .into_iter()
                .collect(),
        }
    }
}
