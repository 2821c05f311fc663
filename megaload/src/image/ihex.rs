//! Intel HEX reader and writer.
//!
//! ## Record Format
//!
//! ```text
//! +-----+-----+---------+------+----------------+----------+
//! | ':' | LL  |  AAAA   |  TT  |  DD ... DD     |    CC    |
//! +-----+-----+---------+------+----------------+----------+
//! |     | len | address | type | len data bytes | checksum |
//! +-----+-----+---------+------+----------------+----------+
//! ```
//!
//! The checksum is the two's complement of the sum of all preceding record
//! bytes. Supported record types are data (0x00), end of file (0x01),
//! extended segment address (0x02) and extended linear address (0x04).
//! Records after the end-of-file record are ignored.

use {
    super::MemoryImage,
    crate::{
        error::{ParseError, ParseErrorKind},
        protocol::checksum::twos_complement8,
    },
    byteorder::{BigEndian, ByteOrder},
    log::{debug, warn},
    std::fmt::Write as _,
};

/// Record type codes.
pub mod record_type {
    /// Data record.
    pub const DATA: u8 = 0x00;
    /// End of file.
    pub const END_OF_FILE: u8 = 0x01;
    /// Extended segment address (base = value * 16).
    pub const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
    /// Extended linear address (base = value << 16).
    pub const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;
}

/// Smallest record: length, address (2), type, checksum.
const MIN_RECORD_LEN: usize = 5;

/// A single decoded, checksum-verified record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Record {
    address: u16,
    record_type: u8,
    data: Vec<u8>,
}

impl Record {
    fn parse(line: &str) -> Result<Self, ParseErrorKind> {
        let digits = line
            .strip_prefix(':')
            .ok_or(ParseErrorKind::MissingStartCode)?;
        let bytes = decode_hex(digits)?;

        if bytes.len() < MIN_RECORD_LEN {
            return Err(ParseErrorKind::Truncated {
                expected: MIN_RECORD_LEN,
                found: bytes.len(),
            });
        }

        let expected = usize::from(bytes[0]) + MIN_RECORD_LEN;
        if bytes.len() < expected {
            return Err(ParseErrorKind::Truncated {
                expected,
                found: bytes.len(),
            });
        }
        if bytes.len() > expected {
            return Err(ParseErrorKind::LengthMismatch {
                expected,
                found: bytes.len(),
            });
        }

        let (body, tail) = bytes.split_at(expected - 1);
        let found = tail[0];
        let computed = twos_complement8(body);
        if computed != found {
            return Err(ParseErrorKind::ChecksumMismatch {
                expected: computed,
                found,
            });
        }

        let record = Self {
            address: BigEndian::read_u16(&body[1..3]),
            record_type: body[3],
            data: body[4..].to_vec(),
        };

        match record.record_type {
            record_type::DATA | record_type::END_OF_FILE => Ok(record),
            record_type::EXTENDED_SEGMENT_ADDRESS | record_type::EXTENDED_LINEAR_ADDRESS => {
                if record.data.len() == 2 {
                    Ok(record)
                } else {
                    Err(ParseErrorKind::BadExtendedAddress(record.data.len()))
                }
            },
            other => Err(ParseErrorKind::UnknownRecordType(other)),
        }
    }
}

/// Decode an even-length run of hex digits. Columns are 1-based and count
/// the leading ':'.
#[allow(clippy::cast_possible_truncation)] // to_digit(16) is < 16
fn decode_hex(digits: &str) -> Result<Vec<u8>, ParseErrorKind> {
    let mut out = Vec::with_capacity(digits.len() / 2);
    let mut high: Option<u8> = None;

    for (i, c) in digits
        .chars()
        .enumerate()
    {
        let nibble = c
            .to_digit(16)
            .ok_or(ParseErrorKind::BadHexDigit {
                column: i + 2,
                found: c,
            })? as u8;
        match high.take() {
            Some(h) => out.push((h << 4) | nibble),
            None => high = Some(nibble),
        }
    }

    if high.is_some() {
        return Err(ParseErrorKind::Truncated {
            expected: out.len() + 1,
            found: out.len(),
        });
    }
    Ok(out)
}

/// Parse Intel HEX text into a memory image.
///
/// Any malformed record fails the whole parse; no partial image is returned.
pub fn parse(text: &str) -> Result<MemoryImage, ParseError> {
    let mut image = MemoryImage::new();
    let mut base: u32 = 0;
    let mut overwritten = 0usize;
    let mut lines = text
        .lines()
        .enumerate();

    while let Some((idx, raw)) = lines.next() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let record = Record::parse(line).map_err(|kind| ParseError::new(line_no, kind))?;

        match record.record_type {
            record_type::DATA => {
                let start = u64::from(base) + u64::from(record.address);
                let end = start + record.data.len() as u64;
                if end > u64::from(u32::MAX) + 1 {
                    return Err(ParseError::new(line_no, ParseErrorKind::AddressOverflow));
                }
                for (offset, value) in record
                    .data
                    .iter()
                    .enumerate()
                {
                    #[allow(clippy::cast_possible_truncation)] // bounded by the check above
                    let addr = (start + offset as u64) as u32;
                    if image
                        .insert(addr, *value)
                        .is_some()
                    {
                        overwritten += 1;
                    }
                }
            },
            record_type::END_OF_FILE => {
                let trailing = lines
                    .by_ref()
                    .filter(|(_, l)| !l.trim().is_empty())
                    .count();
                if trailing > 0 {
                    debug!("Ignoring {trailing} record(s) after end-of-file at line {line_no}");
                }
                break;
            },
            record_type::EXTENDED_SEGMENT_ADDRESS => {
                base = u32::from(BigEndian::read_u16(&record.data)) << 4;
            },
            record_type::EXTENDED_LINEAR_ADDRESS => {
                base = u32::from(BigEndian::read_u16(&record.data)) << 16;
            },
            // Record::parse only lets the four types above through.
            _ => {},
        }
    }

    if overwritten > 0 {
        warn!("HEX records overlap: {overwritten} byte(s) defined more than once, last value kept");
    }

    Ok(image)
}

#[allow(clippy::cast_possible_truncation)] // callers keep data <= 255 bytes
fn push_record(out: &mut String, address: u16, kind: u8, data: &[u8]) {
    let mut bytes = Vec::with_capacity(data.len() + MIN_RECORD_LEN);
    bytes.push(data.len() as u8);
    bytes.extend_from_slice(&address.to_be_bytes());
    bytes.push(kind);
    bytes.extend_from_slice(data);
    bytes.push(twos_complement8(&bytes));

    out.push(':');
    for b in &bytes {
        let _ = write!(out, "{b:02X}");
    }
    out.push('\n');
}

/// Serialize an image to Intel HEX.
///
/// Emits extended linear address records whenever the upper 16 address bits
/// change, splits data records at 64 KiB boundaries, and ends with an
/// end-of-file record.
#[allow(clippy::cast_possible_truncation)]
pub fn serialize(image: &MemoryImage, record_len: usize) -> String {
    let record_len = record_len.clamp(1, 255);
    let mut out = String::new();
    let mut upper: u16 = 0;

    for segment in image.segments() {
        let mut addr = segment.start;
        let mut data = segment
            .data
            .as_slice();

        while !data.is_empty() {
            let hi = (addr >> 16) as u16;
            if hi != upper {
                push_record(
                    &mut out,
                    0,
                    record_type::EXTENDED_LINEAR_ADDRESS,
                    &hi.to_be_bytes(),
                );
                upper = hi;
            }

            let room = 0x1_0000 - (addr & 0xFFFF) as usize;
            let n = data
                .len()
                .min(record_len)
                .min(room);
            push_record(&mut out, addr as u16, record_type::DATA, &data[..n]);

            addr = addr.wrapping_add(n as u32);
            data = &data[n..];
        }
    }

    push_record(&mut out, 0, record_type::END_OF_FILE, &[]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
:10010000214601360121470136007EFE09D2190140
:100110002146017E17C20001FF5F16002148011928
:00000001FF
";

    #[test]
    fn test_parse_data_records() {
        let image = parse(SAMPLE).unwrap();
        assert_eq!(image.len(), 32);
        assert_eq!(image.min_address(), Some(0x0100));
        assert_eq!(image.max_address(), Some(0x011F));
        assert_eq!(image.get(0x0100), Some(0x21));
        assert_eq!(image.get(0x011F), Some(0x19));
    }

    #[test]
    fn test_parse_lowercase_and_whitespace() {
        let text = "  :0300300002337a1e \r\n\n:00000001ff\t\n";
        let image = parse(text).unwrap();
        assert_eq!(image.len(), 3);
        assert_eq!(image.get(0x30), Some(0x02));
        assert_eq!(image.get(0x32), Some(0x7A));
    }

    #[test]
    fn test_flipped_checksum_is_rejected() {
        let text = ":0300300002337A1F\n:00000001FF\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(
            err.kind,
            ParseErrorKind::ChecksumMismatch {
                expected: 0x1E,
                found: 0x1F
            }
        );
    }

    #[test]
    fn test_every_flipped_checksum_bit_fails() {
        for bit in 0..8 {
            let bad = 0x1Eu8 ^ (1 << bit);
            let text = format!(":0300300002337A{bad:02X}\n:00000001FF\n");
            let err = parse(&text).unwrap_err();
            assert!(matches!(err.kind, ParseErrorKind::ChecksumMismatch { .. }));
        }
    }

    #[test]
    fn test_error_on_second_line_reports_line_number() {
        let text = ":0300300002337A1E\n:03003000023G7A1E\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(
            err.kind,
            ParseErrorKind::BadHexDigit {
                column: 13,
                found: 'G'
            }
        );
    }

    #[test]
    fn test_non_ascii_digit_column_counts_characters() {
        let err = parse(":0300\u{e9}0002337A1E\n").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::BadHexDigit {
                column: 6,
                found: '\u{e9}'
            }
        );
    }

    #[test]
    fn test_missing_start_code() {
        let err = parse("0300300002337A1E\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::MissingStartCode);
    }

    #[test]
    fn test_truncated_record() {
        let err = parse(":0300300002337A\n").unwrap_err();
        assert_eq!(
            err.kind,
            ParseErrorKind::Truncated {
                expected: 8,
                found: 7
            }
        );

        let err = parse(":0300\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Truncated { .. }));

        let err = parse(":0300300002337A1\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::Truncated { .. }));
    }

    #[test]
    fn test_record_longer_than_length_byte() {
        let err = parse(":0200300002337A1E\n").unwrap_err();
        assert!(matches!(err.kind, ParseErrorKind::LengthMismatch { .. }));
    }

    #[test]
    fn test_unknown_record_type() {
        // Start linear address record (type 5) is not accepted.
        let err = parse(":04000005000000CD2A\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownRecordType(0x05));
    }

    #[test]
    fn test_extended_linear_address() {
        let text = ":020000040001F9\n:0200100055AAEF\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.get(0x0001_0010), Some(0x55));
        assert_eq!(image.get(0x0001_0011), Some(0xAA));
        assert_eq!(image.get(0x0010), None);
    }

    #[test]
    fn test_extended_segment_address() {
        let text = ":020000021000EC\n:0100040042B9\n:00000001FF\n";
        let image = parse(text).unwrap();
        assert_eq!(image.get(0x10004), Some(0x42));
    }

    #[test]
    fn test_extended_address_applies_until_changed() {
        let text = "\
:020000040001F9
:0100000011EE
:0100010022DC
:020000040000FA
:0100000033CC
:00000001FF
";
        let image = parse(text).unwrap();
        assert_eq!(image.get(0x1_0000), Some(0x11));
        assert_eq!(image.get(0x1_0001), Some(0x22));
        assert_eq!(image.get(0x0000), Some(0x33));
    }

    #[test]
    fn test_records_after_eof_are_ignored() {
        let text = ":0100000011EE\n:00000001FF\n:0100010022DC\nnot even hex\n";
        let image = parse(text).unwrap();
        assert_eq!(image.len(), 1);
        assert_eq!(image.get(0x0001), None);
    }

    #[test]
    fn test_missing_eof_is_accepted() {
        let image = parse(":0100000011EE\n").unwrap();
        assert_eq!(image.len(), 1);
    }

    #[test]
    fn test_later_record_wins_on_overlap() {
        let image = parse(":0100000011EE\n:0100000033CC\n").unwrap();
        assert_eq!(image.get(0), Some(0x33));
    }

    #[test]
    fn test_bad_extended_address_length() {
        let err = parse(":0100000400FB\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::BadExtendedAddress(1));
    }

    #[test]
    fn test_address_overflow() {
        let text = ":02000004FFFFFC\n:02FFFF001122CD\n";
        let err = parse(text).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, ParseErrorKind::AddressOverflow);
    }

    #[test]
    fn test_serialize_then_parse_restores_bytes() {
        let mut image = MemoryImage::new();
        image.write(0x0000, &(0u8..40).collect::<Vec<_>>());
        image.write(0x0100, &[0xDE, 0xAD, 0xBE, 0xEF]);
        // Crosses a 64 KiB bank boundary.
        image.write(0xFFFC, &[1, 2, 3, 4, 5, 6, 7, 8]);
        image.write(0x0003_0000, &[0x77]);

        let text = image.to_ihex(16);
        assert!(text.ends_with(":00000001FF\n"));

        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, image);
    }

    #[test]
    fn test_serialize_splits_records() {
        let mut image = MemoryImage::new();
        image.write(0, &[0xAB; 20]);

        let text = image.to_ihex(16);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(":10000000"));
        assert!(lines[1].starts_with(":04001000"));
    }
}
