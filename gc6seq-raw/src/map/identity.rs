//! EC firmware identity block
//!
//! A fixed 32-byte block at [`addr::IDENTITY_BASE`](super::addr::IDENTITY_BASE).
//!
//! | Offset    | Field           |
//! |-----------|-----------------|
//! | 0x00-0x01 | vendor id (LE)  |
//! | 0x02-0x03 | device id (LE)  |
//! | 0x04      | version major   |
//! | 0x05      | version minor   |
//! | 0x06      | year - 2000     |
//! | 0x07      | month           |
//! | 0x08      | day             |
//! | 0x09      | capability bits |
//! | 0x0A-0x0F | reserved        |
//! | 0x10-0x1F | project string, ASCII, NUL padded |

use std::fmt;

use crate::map::FsmMode;
use crate::register::{LayoutError, RegisterLayout};

/// Size of the identity block in bytes
pub const IDENTITY_LEN: usize = 0x20;

/// Vendor signature the EC must report
pub const EXPECTED_VENDOR_ID: u16 = 0x10DE;

/// Oldest firmware (major, minor) that implements this register map
pub const MIN_FW_VERSION: (u8, u8) = (1, 2);

pub mod offset {
    pub const VENDOR_ID: usize = 0x00;
    pub const DEVICE_ID: usize = 0x02;
    pub const VERSION_MAJOR: usize = 0x04;
    pub const VERSION_MINOR: usize = 0x05;
    pub const DATE_YEAR: usize = 0x06;
    pub const DATE_MONTH: usize = 0x07;
    pub const DATE_DAY: usize = 0x08;
    pub const CAPABILITIES: usize = 0x09;
    pub const PROJECT: usize = 0x10;
    pub const PROJECT_LEN: usize = 0x10;
}

/// Capability Register layout
///
/// | Bit | Field  | Description                   |
/// |-----|--------|-------------------------------|
/// | 0   | gc6    | GC6 supported                 |
/// | 1   | gc6m   | GC6M (self-refresh) supported |
/// | 2   | d3cold | D3Cold supported              |
/// | 3   | rtd3   | RTD3 supported                |
/// | 4   | t1t2   | T1/T2 hotplug events supported |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub gc6: bool,
    pub gc6m: bool,
    pub d3cold: bool,
    pub rtd3: bool,
    pub t1t2: bool,
}

impl Capabilities {
    pub fn supports(&self, mode: FsmMode) -> bool {
        match mode {
            FsmMode::Gc6 => self.gc6,
            FsmMode::Gc6M => self.gc6m,
            FsmMode::Rtd3 => self.rtd3,
            FsmMode::D3Cold => self.d3cold,
        }
    }
}

impl RegisterLayout for Capabilities {
    fn to_reg_value(&self) -> u8 {
        u8::from(self.gc6)
            | u8::from(self.gc6m) << 1
            | u8::from(self.d3cold) << 2
            | u8::from(self.rtd3) << 3
            | u8::from(self.t1t2) << 4
    }

    fn from_reg_value(value: u8) -> Self {
        Self {
            gc6: value & 0x01 != 0,
            gc6m: value & 0x02 != 0,
            d3cold: value & 0x04 != 0,
            rtd3: value & 0x08 != 0,
            t1t2: value & 0x10 != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl fmt::Display for BuildDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Decoded identity block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub vendor_id: u16,
    pub device_id: u16,
    pub version: (u8, u8),
    pub date: BuildDate,
    pub project: String,
    pub capabilities: Capabilities,
}

impl FirmwareInfo {
    /// Decode a raw identity block
    ///
    /// The vendor signature is checked before any other field is looked at,
    /// so a foreign device never yields a partially decoded `FirmwareInfo`.
    pub fn decode(block: &[u8]) -> Result<Self, LayoutError> {
        if block.len() < IDENTITY_LEN {
            return Err(LayoutError::ShortBlock {
                expected: IDENTITY_LEN,
                actual: block.len(),
            });
        }

        let vendor_id = u16::from_le_bytes([block[offset::VENDOR_ID], block[offset::VENDOR_ID + 1]]);
        if vendor_id != EXPECTED_VENDOR_ID {
            return Err(LayoutError::VendorMismatch {
                expected: EXPECTED_VENDOR_ID,
                found: vendor_id,
            });
        }

        let device_id = u16::from_le_bytes([block[offset::DEVICE_ID], block[offset::DEVICE_ID + 1]]);

        let month = block[offset::DATE_MONTH];
        if !(1..=12).contains(&month) {
            return Err(LayoutError::InvalidField {
                field: "build month",
                value: month,
            });
        }

        let project_bytes = &block[offset::PROJECT..offset::PROJECT + offset::PROJECT_LEN];
        let end = project_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(project_bytes.len());
        let project = String::from_utf8_lossy(&project_bytes[..end]).trim().to_string();

        Ok(Self {
            vendor_id,
            device_id,
            version: (block[offset::VERSION_MAJOR], block[offset::VERSION_MINOR]),
            date: BuildDate {
                year: 2000 + u16::from(block[offset::DATE_YEAR]),
                month,
                day: block[offset::DATE_DAY],
            },
            project,
            capabilities: Capabilities::from_reg_value(block[offset::CAPABILITIES]),
        })
    }

    /// Whether the firmware is at least [`MIN_FW_VERSION`]
    pub fn is_supported(&self) -> bool {
        self.version >= MIN_FW_VERSION
    }
}
