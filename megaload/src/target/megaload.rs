//! MegaLoad 3/4/5 bootloader profile.
//!
//! ## Handshake
//!
//! ```text
//! device                         host
//!   0x55 ... (autobaud)   ->
//!                         <-     0x55          MegaLoad 4/5
//!   0x3E '>'              ->
//!                         <-     0x3C '<'      MegaLoad 3 (or 5 after 0x55)
//!   proc flash boot page eeprom  (one code byte each, board order)
//!   ['>'] '!'             ->                   ready for pages
//! ```
//!
//! ## Page Frame
//!
//! ```text
//! +-------------+-------------------+-----------+
//! | page number |   page data       | checksum  |
//! +-------------+-------------------+-----------+
//! | 2 (BE)      |   page size       | 1         |
//! +-------------+-------------------+-----------+
//! ```
//!
//! The checksum is the plain byte sum of the page data. The device answers
//! `'!'` after a successful write and `'@'` otherwise. Page number `0xFFFF`
//! ends flash loading.

use {
    super::{Ack, BannerStep, DeviceProfile, ReadyStep},
    crate::{
        procinfo::{ProcInfo, ProcInfoField},
        protocol::checksum::sum8,
    },
    byteorder::{BigEndian, ByteOrder},
};

/// Sync byte sent by MegaLoad 4/5 during autobaud and echoed by the host.
pub const SYNC: u8 = 0x55;
/// '>' prompt (MegaLoad 3 sync, MegaLoad 5 confirmation, MegaLoad 4 pre-'!').
pub const PROMPT: u8 = 0x3E;
/// '<' answer to the prompt.
pub const PROMPT_REPLY: u8 = 0x3C;
/// '!' page written / ready for flash.
pub const ACK: u8 = 0x21;
/// '@' page rejected.
pub const NAK: u8 = 0x40;
/// Page number that ends flash loading.
pub const END_OF_FLASH: u16 = 0xFFFF;

const PROCESSORS: &[(u8, &str)] = &[
    (0x41, "ATmega8"),
    (0x42, "ATmega16"),
    (0x43, "ATmega64"),
    (0x44, "ATmega128"),
    (0x45, "ATmega32"),
    (0x46, "ATmega162"),
    (0x47, "ATmega169"),
    (0x48, "ATmega8515"),
    (0x49, "ATmega8535"),
    (0x4A, "ATmega163"),
    (0x4B, "ATmega323"),
    (0x4C, "ATmega48"),
    (0x4D, "ATmega88"),
    (0x4E, "ATmega168"),
    (0x4F, "ATtiny2313"),
    (0x50, "ATtiny13"),
    (0x80, "ATmega165"),
    (0x81, "ATmega3250"),
    (0x82, "ATmega6450"),
    (0x83, "ATmega3290"),
    (0x84, "ATmega6490"),
    (0x85, "ATmega406"),
    (0x86, "ATmega640"),
    (0x87, "ATmega1280"),
    (0x88, "ATmega2560"),
];

fn flash_size(code: u8) -> Option<u32> {
    Some(match code {
        0x67 => 1024,
        0x68 => 2048,
        0x69 => 4096,
        0x6C => 8192,
        0x6D => 16384,
        0x6E => 32768,
        0x6F => 65536,
        0x70 => 2 * 65536,
        0x71 => 4 * 65536,
        0x72 => 40 * 1024,
        _ => return None,
    })
}

/// Boot size is reported in 16-bit words.
fn boot_size_words(code: u8) -> Option<u32> {
    Some(match code {
        0x61 => 128,
        0x62 => 256,
        0x63 => 512,
        0x64 => 1024,
        0x65 => 2048,
        0x66 => 4096,
        _ => return None,
    })
}

fn page_size(code: u8) -> Option<u32> {
    Some(match code {
        0x51 => 32,
        0x52 => 64,
        0x53 => 128,
        0x54 => 256,
        // MegaLoad 3 uses 'U' for 512-byte pages.
        0x55 | 0x56 => 512,
        _ => return None,
    })
}

fn eeprom_size(code: u8) -> Option<u32> {
    Some(match code {
        0x2E => 64,
        0x2F => 128,
        0x30 => 256,
        0x31 => 512,
        0x32 => 1024,
        0x33 => 2048,
        0x34 => 4096,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Banner {
    #[default]
    Connect,
    Synced3,
    Synced4,
}

/// MegaLoad 3/4/5 profile.
#[derive(Debug, Clone, Default)]
pub struct MegaLoadProfile {
    banner: Banner,
    version: Option<u8>,
}

impl MegaLoadProfile {
    /// Create a profile in its initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Protocol version detected during the handshake.
    pub fn version(&self) -> Option<u8> {
        self.version
    }
}

impl DeviceProfile for MegaLoadProfile {
    fn name(&self) -> &'static str {
        "megaload"
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn banner_byte(&mut self, byte: u8, first_field: ProcInfoField) -> BannerStep {
        match (self.banner, byte) {
            (Banner::Connect, SYNC) => {
                self.banner = Banner::Synced4;
                self.version = Some(4);
                BannerStep::Reply(vec![SYNC])
            },
            (Banner::Connect, PROMPT) => {
                self.banner = Banner::Synced3;
                self.version = Some(3);
                BannerStep::Reply(vec![PROMPT_REPLY])
            },
            (Banner::Connect, _) => BannerStep::Pending,
            // Auto-OSCCAL keeps sending sync bytes.
            (Banner::Synced4, SYNC) => BannerStep::Pending,
            (Banner::Synced4, PROMPT) => {
                self.version = Some(5);
                BannerStep::Reply(vec![PROMPT_REPLY])
            },
            // After '>' the next byte is a field first: 'U' is also a page size code.
            (Banner::Synced3 | Banner::Synced4, b) => {
                if self
                    .decode_field(first_field, &[b])
                    .is_some()
                {
                    BannerStep::Recognized {
                        reply: Vec::new(),
                        carry: Some(b),
                    }
                } else if self.banner == Banner::Synced3 {
                    // A lone '>' may have been line noise.
                    self.banner = Banner::Connect;
                    self.version = None;
                    self.banner_byte(b, first_field)
                } else {
                    BannerStep::Rejected
                }
            },
        }
    }

    fn describe(&self) -> String {
        match self.version {
            Some(v) => format!("MegaLoad {v}"),
            None => "MegaLoad".to_string(),
        }
    }

    fn field_width(&self) -> usize {
        1
    }

    fn decode_field(&self, field: ProcInfoField, raw: &[u8]) -> Option<u32> {
        let [code] = raw else {
            return None;
        };
        match field {
            ProcInfoField::Signature => PROCESSORS
                .iter()
                .any(|(c, _)| c == code)
                .then_some(u32::from(*code)),
            ProcInfoField::FlashSize => flash_size(*code),
            ProcInfoField::BootSize => boot_size_words(*code).map(|words| words * 2),
            ProcInfoField::PageSize => page_size(*code),
            ProcInfoField::EepromSize => eeprom_size(*code),
        }
    }

    fn processor_name(&self, signature: u32) -> Option<&'static str> {
        PROCESSORS
            .iter()
            .find(|(c, _)| u32::from(*c) == signature)
            .map(|(_, name)| *name)
    }

    fn expects_ready_marker(&self) -> bool {
        true
    }

    fn ready_byte(&mut self, byte: u8) -> ReadyStep {
        match byte {
            ACK => ReadyStep::Ready,
            // MegaLoad 4 sends '>' before '!'.
            PROMPT => ReadyStep::Skip,
            _ => ReadyStep::Unexpected,
        }
    }

    #[allow(clippy::cast_possible_truncation)] // page numbers fit: flash <= 256 KiB
    fn encode_page(&self, address: u32, payload: &[u8], info: &ProcInfo) -> Vec<u8> {
        let page_number = (address / info.page_size.max(1)) as u16;
        let mut frame = vec![0u8; 2];
        BigEndian::write_u16(&mut frame, page_number);
        frame.extend_from_slice(payload);
        frame.push(sum8(payload));
        frame
    }

    fn classify_ack(&self, byte: u8) -> Ack {
        match byte {
            ACK => Ack::Ack,
            NAK => Ack::Nak,
            _ => Ack::Other,
        }
    }

    fn finalize(&self) -> Option<Vec<u8>> {
        Some(END_OF_FLASH.to_be_bytes().to_vec())
    }
}
