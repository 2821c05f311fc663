//! 8-bit checksums used by Intel HEX records and page frames.

/// Wrapping byte sum modulo 256.
///
/// MegaLoad verifies page payloads against this plain sum.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Two's complement of the byte sum modulo 256.
///
/// Appending this value to `data` makes the sum of all bytes zero, which is
/// the Intel HEX record rule.
pub fn twos_complement8(data: &[u8]) -> u8 {
    sum8(data).wrapping_neg()
}
