use std::path::{Path, PathBuf};

use crate::common::pci::{PciAddress, PciHandle};
use crate::error::{Gc6Error, Result};

/// Saves and restores the configuration space of functions that lose it
/// while the GPU is held in reset
pub trait CompanionConfigPreserver {
    fn save_all(&mut self) -> Result<()>;

    fn restore_all(&mut self) -> Result<()>;
}

/// Dwords in the standard (non-extended) configuration header
const CONFIG_DWORDS: usize = 64;

/// Plain config-space snapshot of each companion function.
///
/// Restore writes dwords from the top down so the command register at
/// offset 0x04 goes last, after BARs are back in place.
pub struct ConfigSpaceSnapshot {
    root: PathBuf,
    functions: Vec<PciAddress>,
    saved: Vec<(PciAddress, [u32; CONFIG_DWORDS])>,
}

impl ConfigSpaceSnapshot {
    pub fn new(root: &Path, functions: Vec<PciAddress>) -> Self {
        Self {
            root: root.to_path_buf(),
            functions,
            saved: Vec::new(),
        }
    }

    pub fn functions(&self) -> &[PciAddress] {
        &self.functions
    }

    fn open(&self, address: PciAddress) -> Result<PciHandle> {
        PciHandle::open(&self.root, address)
            .map_err(|e| Gc6Error::Companion(format!("cannot open companion {address}: {e}")))
    }
}

impl CompanionConfigPreserver for ConfigSpaceSnapshot {
    fn save_all(&mut self) -> Result<()> {
        let mut saved = Vec::with_capacity(self.functions.len());
        for &address in &self.functions {
            let handle = self.open(address)?;
            let mut dwords = [0u32; CONFIG_DWORDS];
            for (i, dword) in dwords.iter_mut().enumerate() {
                *dword = handle.read32((i * 4) as u32).map_err(|e| {
                    Gc6Error::Companion(format!("saving {address}: {e}"))
                })?;
            }
            if dwords[0] & 0xFFFF == 0xFFFF {
                return Err(Gc6Error::Companion(format!(
                    "companion {address} is not responding"
                )));
            }
            saved.push((address, dwords));
        }

        tracing::debug!("Saved config space of {} companion function(s)", saved.len());
        self.saved = saved;
        Ok(())
    }

    fn restore_all(&mut self) -> Result<()> {
        if self.saved.is_empty() && !self.functions.is_empty() {
            return Err(Gc6Error::Companion("restore requested without a prior save".into()));
        }

        for (address, dwords) in &self.saved {
            let handle = self.open(*address)?;
            // Dword 0 holds the read-only vendor/device ids
            for (i, value) in dwords.iter().enumerate().skip(1).rev() {
                handle.write32((i * 4) as u32, *value).map_err(|e| {
                    Gc6Error::Companion(format!("restoring {address}: {e}"))
                })?;
            }
        }

        tracing::debug!("Restored config space of {} companion function(s)", self.saved.len());
        self.saved.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_companion(name: &str) -> (PathBuf, PciAddress) {
        let root = std::env::temp_dir().join(format!("gc6seq-comp-{}-{}", name, std::process::id()));
        let address = PciAddress::new(0, 1, 0, 1);
        let mut config = [0u8; 256];
        config[0..2].copy_from_slice(&0x10DEu16.to_le_bytes());
        config[0x04] = 0x06;
        config[0x10..0x14].copy_from_slice(&0xF000_0000u32.to_le_bytes());
        let dir = root.join(address.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config"), config).unwrap();
        (root, address)
    }

    #[test]
    fn test_save_and_restore() {
        let (root, address) = fake_companion("restore");
        let mut snapshot = ConfigSpaceSnapshot::new(&root, vec![address]);
        snapshot.save_all().unwrap();

        // Reset clears BARs and the command register
        let handle = PciHandle::open(&root, address).unwrap();
        handle.write32(0x04, 0).unwrap();
        handle.write32(0x10, 0).unwrap();

        snapshot.restore_all().unwrap();
        assert_eq!(handle.read32(0x10).unwrap(), 0xF000_0000);
        assert_eq!(handle.read16(0x04).unwrap(), 0x0006);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_restore_without_save() {
        let (root, address) = fake_companion("nosave");
        let mut snapshot = ConfigSpaceSnapshot::new(&root, vec![address]);
        assert!(matches!(snapshot.restore_all(), Err(Gc6Error::Companion(_))));
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_missing_companion() {
        let root = std::env::temp_dir().join("gc6seq-comp-missing");
        let mut snapshot = ConfigSpaceSnapshot::new(&root, vec![PciAddress::new(0, 7, 0, 1)]);
        assert!(matches!(snapshot.save_all(), Err(Gc6Error::Companion(_))));
    }
}
