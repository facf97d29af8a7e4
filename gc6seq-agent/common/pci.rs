use once_cell::sync::Lazy;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Gc6Error, Result};

/// Root of the sysfs PCI device tree, overridable for containers and tests
pub static SYSFS_PCI_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var_os("GC6SEQ_SYSFS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/sys/bus/pci/devices"))
});

/// PCI Express capability id
pub const PCI_CAP_ID_EXP: u8 = 0x10;

/// Standard configuration header offsets
pub mod cfg {
    pub const VENDOR_ID: u32 = 0x00;
    pub const STATUS: u32 = 0x06;
    pub const CLASS_CODE: u32 = 0x0B;
    pub const CAPABILITY_LIST: u32 = 0x34;

    pub const STATUS_CAP_LIST: u16 = 1 << 4;
}

/// Offsets inside the PCI Express capability
pub mod exp {
    pub const LINK_CONTROL: u32 = 0x10;
    pub const LINK_STATUS: u32 = 0x12;
    pub const DEVICE_CONTROL2: u32 = 0x28;

    pub const LINK_CONTROL_DISABLE: u16 = 1 << 4;
    pub const LINK_STATUS_DLL_ACTIVE: u16 = 1 << 13;
    pub const DEVICE_CONTROL2_LTR_EN: u16 = 1 << 10;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub fn new(domain: u16, bus: u8, device: u8, function: u8) -> Self {
        Self {
            domain,
            bus,
            device,
            function,
        }
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl FromStr for PciAddress {
    type Err = Gc6Error;

    /// Parses `dddd:bb:dd.f` or `bb:dd.f` (domain 0)
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Gc6Error::PciError(format!("Invalid PCI address '{s}'"));

        let s = s.trim();
        let (head, function) = s.rsplit_once('.').ok_or_else(invalid)?;
        let parts: Vec<&str> = head.split(':').collect();
        let (domain, bus, device) = match parts.as_slice() {
            [domain, bus, device] => (*domain, *bus, *device),
            [bus, device] => ("0", *bus, *device),
            _ => return Err(invalid()),
        };

        let address = PciAddress {
            domain: u16::from_str_radix(domain, 16).map_err(|_| invalid())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| invalid())?,
            device: u8::from_str_radix(device, 16).map_err(|_| invalid())?,
            function: u8::from_str_radix(function, 16).map_err(|_| invalid())?,
        };

        if address.device > 0x1F || address.function > 7 {
            return Err(invalid());
        }
        Ok(address)
    }
}

impl serde::Serialize for PciAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for PciAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Configuration-space accessor for one PCI function
pub struct PciHandle {
    file: parking_lot::Mutex<File>,
    address: PciAddress,
}

impl PciHandle {
    pub fn open(root: &Path, address: PciAddress) -> Result<Self> {
        let path = Self::config_path(root, address);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                Gc6Error::PciError(format!("Failed to open PCI device {address}: {e}"))
            })?;

        Ok(Self {
            file: parking_lot::Mutex::new(file),
            address,
        })
    }

    fn config_path(root: &Path, address: PciAddress) -> PathBuf {
        root.join(address.to_string()).join("config")
    }

    pub fn address(&self) -> PciAddress {
        self.address
    }

    fn read_at<const N: usize>(&self, offset: u32) -> Result<[u8; N]> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(offset))).map_err(|e| {
            Gc6Error::PciError(format!(
                "{}: failed to seek to offset 0x{offset:x}: {e}",
                self.address
            ))
        })?;

        let mut buffer = [0u8; N];
        file.read_exact(&mut buffer).map_err(|e| {
            Gc6Error::PciError(format!(
                "{}: failed to read at offset 0x{offset:x}: {e}",
                self.address
            ))
        })?;
        Ok(buffer)
    }

    fn write_at(&self, offset: u32, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(offset))).map_err(|e| {
            Gc6Error::PciError(format!(
                "{}: failed to seek to offset 0x{offset:x}: {e}",
                self.address
            ))
        })?;

        file.write_all(bytes).map_err(|e| {
            Gc6Error::PciError(format!(
                "{}: failed to write at offset 0x{offset:x}: {e}",
                self.address
            ))
        })?;

        tracing::debug!(
            "PCI write: {} offset 0x{:03x} = {:02x?}",
            self.address,
            offset,
            bytes
        );
        Ok(())
    }

    pub fn read8(&self, offset: u32) -> Result<u8> {
        Ok(self.read_at::<1>(offset)?[0])
    }

    pub fn read16(&self, offset: u32) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_at(offset)?))
    }

    pub fn read32(&self, offset: u32) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_at(offset)?))
    }

    pub fn write16(&self, offset: u32, value: u16) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    pub fn write32(&self, offset: u32, value: u32) -> Result<()> {
        self.write_at(offset, &value.to_le_bytes())
    }

    /// Walk the capability list for `id`, returning its config offset
    pub fn find_capability(&self, id: u8) -> Result<Option<u32>> {
        if self.read16(cfg::STATUS)? & cfg::STATUS_CAP_LIST == 0 {
            return Ok(None);
        }

        let mut ptr = self.read8(cfg::CAPABILITY_LIST)? & 0xFC;
        // 48 is the most capabilities that fit in 256 bytes of config space
        for _ in 0..48 {
            if ptr == 0 {
                break;
            }
            let offset = u32::from(ptr);
            if self.read8(offset)? == id {
                return Ok(Some(offset));
            }
            ptr = self.read8(offset + 1)? & 0xFC;
        }
        Ok(None)
    }
}

/// True when the function exists and answers with a valid vendor id
pub fn device_exists(root: &Path, address: PciAddress) -> bool {
    PciHandle::open(root, address)
        .and_then(|handle| handle.read16(cfg::VENDOR_ID))
        .map(|vendor| vendor != 0xFFFF && vendor != 0)
        .unwrap_or(false)
}

/// Address of the bridge directly above `address` in the sysfs hierarchy
pub fn upstream_of(root: &Path, address: PciAddress) -> Result<PciAddress> {
    let real = std::fs::canonicalize(root.join(address.to_string()))?;
    real.parent()
        .and_then(|p| p.file_name())
        .and_then(|name| name.to_str())
        .and_then(|name| name.parse().ok())
        .ok_or_else(|| Gc6Error::PciError(format!("{address} has no upstream PCI bridge")))
}

/// Enumerate every function under `root`
pub fn list_devices(root: &Path) -> Result<Vec<PciAddress>> {
    let mut devices: Vec<PciAddress> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse().ok()))
        .collect();
    devices.sort_unstable();
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_function(name: &str, config: &[u8; 256]) -> (PathBuf, PciAddress) {
        let root = std::env::temp_dir().join(format!("gc6seq-pci-{}-{}", name, std::process::id()));
        let address = PciAddress::new(0, 1, 0, 0);
        let dir = root.join(address.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config"), config).unwrap();
        (root, address)
    }

    #[test]
    fn test_address_parse_and_display() {
        let addr: PciAddress = "0000:01:00.0".parse().unwrap();
        assert_eq!(addr, PciAddress::new(0, 1, 0, 0));
        assert_eq!(addr.to_string(), "0000:01:00.0");

        let short: PciAddress = "3b:1f.7".parse().unwrap();
        assert_eq!(short, PciAddress::new(0, 0x3b, 0x1f, 7));

        assert!("01:20.0".parse::<PciAddress>().is_err());
        assert!("nonsense".parse::<PciAddress>().is_err());
    }

    #[test]
    fn test_capability_walk() {
        let mut config = [0u8; 256];
        config[0..2].copy_from_slice(&0x10DEu16.to_le_bytes());
        config[0x06] = cfg::STATUS_CAP_LIST as u8;
        config[0x34] = 0x40;
        // Power management capability, then PCI Express
        config[0x40] = 0x01;
        config[0x41] = 0x60;
        config[0x60] = PCI_CAP_ID_EXP;
        config[0x61] = 0x00;

        let (root, address) = fake_function("capwalk", &config);
        let handle = PciHandle::open(&root, address).unwrap();
        assert_eq!(handle.find_capability(PCI_CAP_ID_EXP).unwrap(), Some(0x60));
        assert_eq!(handle.find_capability(0x05).unwrap(), None);
        assert!(device_exists(&root, address));

        handle.write16(0x60 + exp::LINK_CONTROL, exp::LINK_CONTROL_DISABLE).unwrap();
        assert_eq!(
            handle.read16(0x60 + exp::LINK_CONTROL).unwrap(),
            exp::LINK_CONTROL_DISABLE
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_missing_device() {
        let root = std::env::temp_dir().join("gc6seq-pci-missing");
        assert!(!device_exists(&root, PciAddress::new(0, 9, 0, 0)));
    }
}
