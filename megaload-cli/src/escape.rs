//! C-style escape decoding for the reset sequence.
//!
//! Supported: `\n \r \t \0 \a \b \f \v \\ \' \"`, `\xHH` and octal `\NNN`.
//! An unknown escape is kept as written, backslash included.

/// Decode `input` into the bytes to send.
pub(crate) fn unescape(input: &str) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut chars = input
        .chars()
        .peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            out.extend_from_slice(
                c.encode_utf8(&mut buf)
                    .as_bytes(),
            );
            continue;
        }

        let Some(e) = chars.next() else {
            return Err("trailing backslash in escape sequence".to_string());
        };
        match e {
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0C),
            'v' => out.push(0x0B),
            '\\' => out.push(b'\\'),
            '\'' => out.push(b'\''),
            '"' => out.push(b'"'),
            'x' => {
                let mut value = 0u32;
                for _ in 0..2 {
                    let digit = chars
                        .next()
                        .and_then(|d| d.to_digit(16))
                        .ok_or_else(|| "\\x must be followed by two hex digits".to_string())?;
                    value = value * 16 + digit;
                }
                out.push(u8::try_from(value).map_err(|_| format!("hex escape \\x{value:X} is out of range"))?);
            },
            '0'..='7' => {
                let mut value = e.to_digit(8).unwrap_or_default();
                for _ in 0..2 {
                    match chars
                        .peek()
                        .and_then(|d| d.to_digit(8))
                    {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        },
                        None => break,
                    }
                }
                let byte = u8::try_from(value).map_err(|_| format!("octal escape \\{value:o} is out of range"))?;
                out.push(byte);
            },
            other => {
                out.push(b'\\');
                let mut buf = [0u8; 4];
                out.extend_from_slice(
                    other
                        .encode_utf8(&mut buf)
                        .as_bytes(),
                );
            },
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(unescape("reset").unwrap(), b"reset");
        assert_eq!(unescape("").unwrap(), b"");
    }

    #[test]
    fn test_simple_escapes() {
        assert_eq!(unescape(r"boot\r\n").unwrap(), b"boot\r\n");
        assert_eq!(unescape(r"\t\a\b\f\v").unwrap(), vec![0x09, 0x07, 0x08, 0x0C, 0x0B]);
        assert_eq!(unescape(r#"\\\'\""#).unwrap(), b"\\'\"");
    }

    #[test]
    fn test_hex_escape() {
        assert_eq!(unescape(r"\x1b!\xFF").unwrap(), vec![0x1B, b'!', 0xFF]);
        assert!(unescape(r"\x1").is_err());
        assert!(unescape(r"\xZZ").is_err());
    }

    #[test]
    fn test_octal_escape() {
        assert_eq!(unescape(r"\0").unwrap(), vec![0]);
        assert_eq!(unescape(r"\101\1019").unwrap(), b"AA9");
        assert_eq!(unescape(r"\377").unwrap(), vec![0xFF]);
        assert!(unescape(r"\400").is_err());
    }

    #[test]
    fn test_unknown_escape_is_kept() {
        assert_eq!(unescape(r"\q").unwrap(), b"\\q");
    }

    #[test]
    fn test_trailing_backslash() {
        assert!(unescape("abc\\").is_err());
    }

    #[test]
    fn test_non_ascii_is_utf8() {
        assert_eq!(unescape("é").unwrap(), "é".as_bytes());
    }
}
