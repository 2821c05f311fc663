//! Device parameters reported by the bootloader during the handshake.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// One of the five procinfo fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ProcInfoField {
    /// Processor signature / device id.
    Signature,
    /// Flash size in bytes.
    FlashSize,
    /// Boot section size in bytes.
    BootSize,
    /// Flash page size in bytes.
    PageSize,
    /// EEPROM size in bytes.
    EepromSize,
}

impl ProcInfoField {
    /// All fields, in the order MegaLoad transmits them by default.
    pub const ALL: [Self; 5] = [
        Self::Signature,
        Self::FlashSize,
        Self::BootSize,
        Self::PageSize,
        Self::EepromSize,
    ];

    /// Short token used on the command line and in config files.
    pub fn token(self) -> &'static str {
        match self {
            Self::Signature => "proc",
            Self::FlashSize => "flash",
            Self::BootSize => "boot",
            Self::PageSize => "page",
            Self::EepromSize => "eeprom",
        }
    }

    /// Parse a field token (case-insensitive).
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "proc" | "signature" | "sig" => Some(Self::Signature),
            "flash" => Some(Self::FlashSize),
            "boot" => Some(Self::BootSize),
            "page" => Some(Self::PageSize),
            "eeprom" => Some(Self::EepromSize),
            _ => None,
        }
    }
}

impl fmt::Display for ProcInfoField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Signature => "processor signature",
            Self::FlashSize => "flash size",
            Self::BootSize => "boot size",
            Self::PageSize => "page size",
            Self::EepromSize => "EEPROM size",
        };
        f.write_str(name)
    }
}

/// Validated permutation of the five procinfo fields.
///
/// Boards disagree on the order the bootloader sends its parameters in, so
/// the order is configuration. Construction rejects anything that is not a
/// permutation, which keeps bad orders out of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldOrder([ProcInfoField; 5]);

impl FieldOrder {
    /// Order used by EvB 5.1 boards, which send the page size first.
    pub const EVB: Self = Self([
        ProcInfoField::PageSize,
        ProcInfoField::Signature,
        ProcInfoField::FlashSize,
        ProcInfoField::BootSize,
        ProcInfoField::EepromSize,
    ]);

    /// Build an order from five fields.
    pub fn new(fields: [ProcInfoField; 5]) -> Result<Self> {
        for (i, field) in fields.iter().enumerate() {
            if fields[..i].contains(field) {
                return Err(Error::InvalidFieldOrder(format!(
                    "'{}' appears more than once",
                    field.token()
                )));
            }
        }
        Ok(Self(fields))
    }

    /// Fields in transmission order.
    pub fn fields(&self) -> &[ProcInfoField; 5] {
        &self.0
    }

    /// Iterate over the fields in transmission order.
    pub fn iter(&self) -> impl Iterator<Item = ProcInfoField> + '_ {
        self.0
            .iter()
            .copied()
    }
}

impl Default for FieldOrder {
    fn default() -> Self {
        Self(ProcInfoField::ALL)
    }
}

impl FromStr for FieldOrder {
    type Err = Error;

    /// Parse five tokens separated by commas and/or whitespace,
    /// e.g. `"proc,flash,boot,page,eeprom"`.
    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();

        if tokens.len() != 5 {
            return Err(Error::InvalidFieldOrder(format!(
                "expected 5 fields, got {} in '{s}'",
                tokens.len()
            )));
        }

        let mut fields = ProcInfoField::ALL;
        for (slot, token) in fields
            .iter_mut()
            .zip(tokens)
        {
            *slot = ProcInfoField::from_token(token).ok_or_else(|| {
                Error::InvalidFieldOrder(format!(
                    "unknown field '{token}' (expected proc, flash, boot, page, eeprom)"
                ))
            })?;
        }

        Self::new(fields)
    }
}

impl fmt::Display for FieldOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self
            .iter()
            .map(ProcInfoField::token)
            .collect();
        f.write_str(&tokens.join(","))
    }
}

/// Device parameters read during the handshake. All sizes are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProcInfo {
    /// Processor signature code.
    pub signature: u32,
    /// Flash size.
    pub flash_size: u32,
    /// Boot section size.
    pub boot_size: u32,
    /// Page size.
    pub page_size: u32,
    /// EEPROM size.
    pub eeprom_size: u32,
}

impl ProcInfo {
    /// Read a field by name.
    pub fn get(&self, field: ProcInfoField) -> u32 {
        match field {
            ProcInfoField::Signature => self.signature,
            ProcInfoField::FlashSize => self.flash_size,
            ProcInfoField::BootSize => self.boot_size,
            ProcInfoField::PageSize => self.page_size,
            ProcInfoField::EepromSize => self.eeprom_size,
        }
    }

    /// Set a field by name.
    pub fn set(&mut self, field: ProcInfoField, value: u32) {
        match field {
            ProcInfoField::Signature => self.signature = value,
            ProcInfoField::FlashSize => self.flash_size = value,
            ProcInfoField::BootSize => self.boot_size = value,
            ProcInfoField::PageSize => self.page_size = value,
            ProcInfoField::EepromSize => self.eeprom_size = value,
        }
    }

    /// First address of the boot section at the top of flash.
    pub fn boot_start(&self) -> u32 {
        self.flash_size
            .saturating_sub(self.boot_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_order_default() {
        let order = FieldOrder::default();
        assert_eq!(order.fields(), &ProcInfoField::ALL);
        assert_eq!(order.to_string(), "proc,flash,boot,page,eeprom");
    }

    #[test]
    fn test_field_order_parse() {
        let order: FieldOrder = "page, PROC flash,boot eeprom"
            .parse()
            .unwrap();
        assert_eq!(order, FieldOrder::EVB);
    }

    #[test]
    fn test_field_order_rejects_duplicates() {
        let err = "proc,proc,boot,page,eeprom"
            .parse::<FieldOrder>()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldOrder(_)));
        assert!(err.to_string().contains("proc"));
    }

    #[test]
    fn test_field_order_rejects_wrong_count() {
        assert!("proc,flash,boot,page".parse::<FieldOrder>().is_err());
        assert!("proc,flash,boot,page,eeprom,flash".parse::<FieldOrder>().is_err());
        assert!("".parse::<FieldOrder>().is_err());
    }

    #[test]
    fn test_field_order_rejects_unknown_token() {
        let err = "proc,flash,boot,page,ram"
            .parse::<FieldOrder>()
            .unwrap_err();
        assert!(err.to_string().contains("ram"));
    }

    #[test]
    fn test_procinfo_get_set() {
        let mut info = ProcInfo::default();
        for (i, field) in ProcInfoField::ALL.iter().enumerate() {
            info.set(*field, i as u32 + 1);
        }
        assert_eq!(info.signature, 1);
        assert_eq!(info.eeprom_size, 5);
        assert_eq!(info.get(ProcInfoField::PageSize), 4);
    }

    #[test]
    fn test_boot_start() {
        let info = ProcInfo {
            signature: 0x45,
            flash_size: 32768,
            boot_size: 1024,
            page_size: 128,
            eeprom_size: 1024,
        };
        assert_eq!(info.boot_start(), 31744);
    }
}
