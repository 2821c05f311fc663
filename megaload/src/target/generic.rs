//! Generic framed bootloader profile.
//!
//! For boards that follow the MegaLoad handshake shape but not its byte
//! codes: a configurable banner, fixed-width big-endian procinfo fields in
//! plain bytes, and self-describing page frames:
//!
//! ```text
//! +-----------+---------+-------------+----------+
//! | address   | length  |  payload    | checksum |
//! +-----------+---------+-------------+----------+
//! | 4 (BE)    | 2 (BE)  |  length     | 1        |
//! +-----------+---------+-------------+----------+
//! ```
//!
//! The checksum is the two's complement of the byte sum of everything
//! before it, so the whole frame sums to zero.

use {
    super::{Ack, BannerStep, DeviceProfile},
    crate::{
        error::{Error, Result},
        procinfo::{ProcInfo, ProcInfoField},
        protocol::checksum::twos_complement8,
    },
    byteorder::{BigEndian, ByteOrder},
};

/// Default acknowledgement byte (ASCII ACK).
pub const DEFAULT_ACK: u8 = 0x06;
/// Default negative acknowledgement byte (ASCII NAK).
pub const DEFAULT_NAK: u8 = 0x15;

/// Configurable generic profile.
#[derive(Debug, Clone)]
pub struct GenericProfile {
    banner: Vec<u8>,
    banner_reply: Vec<u8>,
    field_width: usize,
    ack: u8,
    nak: u8,
    finalize: Vec<u8>,
    /// Banner bytes matched so far.
    matched: usize,
    /// For each banner prefix, the longest proper prefix that is also its suffix.
    fallback: Vec<usize>,
}

fn prefix_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut len = 0;
    for i in 1..pattern.len() {
        while len > 0 && pattern[i] != pattern[len] {
            len = table[len - 1];
        }
        if pattern[i] == pattern[len] {
            len += 1;
        }
        table[i] = len;
    }
    table
}

impl Default for GenericProfile {
    fn default() -> Self {
        Self {
            banner: b">".to_vec(),
            banner_reply: b"<".to_vec(),
            field_width: 4,
            ack: DEFAULT_ACK,
            nak: DEFAULT_NAK,
            finalize: Vec::new(),
            matched: 0,
            fallback: vec![0],
        }
    }
}

impl GenericProfile {
    /// Create a profile with the default banner `>` answered by `<`,
    /// 4-byte fields and ASCII ACK/NAK.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the banner and the bytes written once it is seen.
    ///
    /// An empty banner means the first byte received already belongs to the
    /// first procinfo field.
    #[must_use]
    pub fn with_banner(mut self, banner: impl Into<Vec<u8>>, reply: impl Into<Vec<u8>>) -> Self {
        self.banner = banner.into();
        self.banner_reply = reply.into();
        self.fallback = prefix_table(&self.banner);
        self.matched = 0;
        self
    }

    /// Set the procinfo field width (1 to 4 bytes).
    pub fn with_field_width(mut self, width: usize) -> Result<Self> {
        if !(1..=4).contains(&width) {
            return Err(Error::Config(format!(
                "field width must be 1 to 4 bytes, got {width}"
            )));
        }
        self.field_width = width;
        Ok(self)
    }

    /// Set the ACK and NAK bytes.
    #[must_use]
    pub fn with_ack_nak(mut self, ack: u8, nak: u8) -> Self {
        self.ack = ack;
        self.nak = nak;
        self
    }

    /// Set a command written after the last page.
    #[must_use]
    pub fn with_finalize(mut self, command: impl Into<Vec<u8>>) -> Self {
        self.finalize = command.into();
        self
    }
}

impl DeviceProfile for GenericProfile {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn reset(&mut self) {
        self.matched = 0;
    }

    fn banner_byte(&mut self, byte: u8, _first_field: ProcInfoField) -> BannerStep {
        if self
            .banner
            .is_empty()
        {
            return BannerStep::Recognized {
                reply: self
                    .banner_reply
                    .clone(),
                carry: Some(byte),
            };
        }

        while self.matched > 0 && self.banner[self.matched] != byte {
            self.matched = self.fallback[self.matched - 1];
        }
        if self.banner[self.matched] == byte {
            self.matched += 1;
        }

        if self.matched == self.banner.len() {
            self.matched = 0;
            BannerStep::Recognized {
                reply: self
                    .banner_reply
                    .clone(),
                carry: None,
            }
        } else {
            BannerStep::Pending
        }
    }

    fn field_width(&self) -> usize {
        self.field_width
    }

    #[allow(clippy::cast_possible_truncation)] // width <= 4 bytes
    fn decode_field(&self, _field: ProcInfoField, raw: &[u8]) -> Option<u32> {
        if raw.len() != self.field_width {
            return None;
        }
        Some(BigEndian::read_uint(raw, raw.len()) as u32)
    }

    #[allow(clippy::cast_possible_truncation)] // payload is one page
    fn encode_page(&self, address: u32, payload: &[u8], _info: &ProcInfo) -> Vec<u8> {
        let mut frame = vec![0u8; 6];
        BigEndian::write_u32(&mut frame[0..4], address);
        BigEndian::write_u16(&mut frame[4..6], payload.len() as u16);
        frame.extend_from_slice(payload);
        let checksum = twos_complement8(&frame);
        frame.push(checksum);
        frame
    }

    fn classify_ack(&self, byte: u8) -> Ack {
        if byte == self.ack {
            Ack::Ack
        } else if byte == self.nak {
            Ack::Nak
        } else {
            Ack::Other
        }
    }

    fn finalize(&self) -> Option<Vec<u8>> {
        (!self
            .finalize
            .is_empty())
        .then(|| {
            self.finalize
                .clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::checksum::sum8;

    #[test]
    fn test_banner_match_with_noise() {
        let mut p = GenericProfile::new().with_banner(b"BL".to_vec(), b"ok".to_vec());
        let first = ProcInfoField::Signature;

        assert_eq!(p.banner_byte(b'x', first), BannerStep::Pending);
        assert_eq!(p.banner_byte(b'B', first), BannerStep::Pending);
        assert_eq!(p.banner_byte(b'B', first), BannerStep::Pending);
        assert_eq!(
            p.banner_byte(b'L', first),
            BannerStep::Recognized {
                reply: b"ok".to_vec(),
                carry: None
            }
        );
    }

    #[test]
    fn test_banner_with_repeated_prefix() {
        let mut p = GenericProfile::new().with_banner(b"aab".to_vec(), Vec::new());
        let first = ProcInfoField::Signature;

        for &b in b"aaa" {
            assert_eq!(p.banner_byte(b, first), BannerStep::Pending);
        }
        assert_eq!(
            p.banner_byte(b'b', first),
            BannerStep::Recognized {
                reply: vec![],
                carry: None
            }
        );
    }

    #[test]
    fn test_prefix_table() {
        assert_eq!(prefix_table(b"aab"), vec![0, 1, 0]);
        assert_eq!(prefix_table(b"abab"), vec![0, 0, 1, 2]);
        assert_eq!(prefix_table(b""), Vec::<usize>::new());
    }

    #[test]
    fn test_empty_banner_carries_first_byte() {
        let mut p = GenericProfile::new().with_banner(Vec::new(), Vec::new());
        assert_eq!(
            p.banner_byte(0x07, ProcInfoField::PageSize),
            BannerStep::Recognized {
                reply: vec![],
                carry: Some(0x07)
            }
        );
    }

    #[test]
    fn test_field_width_bounds() {
        assert!(GenericProfile::new().with_field_width(0).is_err());
        assert!(GenericProfile::new().with_field_width(5).is_err());
        let p = GenericProfile::new()
            .with_field_width(2)
            .unwrap();
        assert_eq!(p.field_width(), 2);
        assert_eq!(p.decode_field(ProcInfoField::PageSize, &[0x00, 0x80]), Some(128));
        assert_eq!(p.decode_field(ProcInfoField::PageSize, &[0x80]), None);
    }

    #[test]
    fn test_decode_field_big_endian() {
        let p = GenericProfile::new();
        assert_eq!(
            p.decode_field(ProcInfoField::FlashSize, &[0x00, 0x00, 0x80, 0x00]),
            Some(0x8000)
        );
    }

    #[test]
    fn test_encode_page_sums_to_zero() {
        let p = GenericProfile::new();
        let frame = p.encode_page(0x0000_0100, &[0xAA, 0xBB, 0xCC], &ProcInfo::default());

        assert_eq!(&frame[..6], &[0x00, 0x00, 0x01, 0x00, 0x00, 0x03]);
        assert_eq!(&frame[6..9], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(sum8(&frame), 0);
    }

    #[test]
    fn test_ack_classification() {
        let p = GenericProfile::new().with_ack_nak(b'K', b'N');
        assert_eq!(p.classify_ack(b'K'), Ack::Ack);
        assert_eq!(p.classify_ack(b'N'), Ack::Nak);
        assert_eq!(p.classify_ack(DEFAULT_ACK), Ack::Other);
    }

    #[test]
    fn test_finalize_optional() {
        assert_eq!(GenericProfile::new().finalize(), None);
        assert_eq!(
            GenericProfile::new()
                .with_finalize(b"Q".to_vec())
                .finalize(),
            Some(b"Q".to_vec())
        );
    }
}
