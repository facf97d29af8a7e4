use std::collections::HashMap;
use std::path::PathBuf;

use crate::common::pci::{self, exp, PciAddress, PciHandle, PCI_CAP_ID_EXP, SYSFS_PCI_ROOT};
use crate::error::{Gc6Error, Result};
use crate::link::LinkPowerState;

/// Root or switch downstream port above the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortHandle {
    pub address: PciAddress,
    /// Slot of the GPU below this port
    pub index: u32,
}

/// Latency Tolerance Reporting state of a downstream port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LtrState {
    pub enabled: bool,
}

/// PCIe hierarchy operations the sequencer depends on
pub trait LinkTopology {
    fn upstream_port(&mut self, device: PciAddress) -> Result<PortHandle>;

    fn set_downstream_link_state(&mut self, port: &PortHandle, state: LinkPowerState) -> Result<()>;

    fn downstream_link_state(&mut self, port: &PortHandle) -> Result<LinkPowerState>;

    fn downstream_ltr(&mut self, port: &PortHandle) -> Result<LtrState>;

    fn set_downstream_ltr(&mut self, port: &PortHandle, ltr: LtrState) -> Result<()>;

    /// Whether `device` currently answers config reads with a valid identity
    fn device_present(&mut self, device: PciAddress) -> Result<bool>;
}

/// Topology provider over sysfs config-space files
///
/// Generic ports have no software-visible L2 request, so L2 is driven with
/// the Link Disable bit and L0 by clearing it. Link state is read back from
/// Data Link Layer Link Active.
pub struct SysfsTopology {
    root: PathBuf,
    handles: HashMap<PciAddress, PciHandle>,
}

impl SysfsTopology {
    pub fn new() -> Self {
        Self::with_root(SYSFS_PCI_ROOT.clone())
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            root,
            handles: HashMap::new(),
        }
    }

    fn handle(&mut self, address: PciAddress) -> Result<&PciHandle> {
        if !self.handles.contains_key(&address) {
            let handle = PciHandle::open(&self.root, address)?;
            self.handles.insert(address, handle);
        }
        self.handles
            .get(&address)
            .ok_or_else(|| Gc6Error::PciError(format!("No handle for {address}")))
    }

    fn pcie_capability(&mut self, address: PciAddress) -> Result<u32> {
        self.handle(address)?
            .find_capability(PCI_CAP_ID_EXP)?
            .ok_or_else(|| Gc6Error::Link(format!("{address} has no PCI Express capability")))
    }

    fn update16(&mut self, address: PciAddress, offset: u32, set: u16, clear: u16) -> Result<()> {
        let handle = self.handle(address)?;
        let value = handle.read16(offset)?;
        let updated = (value & !clear) | set;
        if updated != value {
            handle.write16(offset, updated)?;
        }
        Ok(())
    }
}

impl Default for SysfsTopology {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkTopology for SysfsTopology {
    fn upstream_port(&mut self, device: PciAddress) -> Result<PortHandle> {
        let address = pci::upstream_of(&self.root, device)?;
        // Confirm the bridge really is a PCIe port before handing it out
        self.pcie_capability(address)?;
        Ok(PortHandle {
            address,
            index: u32::from(device.device),
        })
    }

    fn set_downstream_link_state(&mut self, port: &PortHandle, state: LinkPowerState) -> Result<()> {
        let cap = self.pcie_capability(port.address)?;
        let offset = cap + exp::LINK_CONTROL;
        if state.is_up() {
            self.update16(port.address, offset, 0, exp::LINK_CONTROL_DISABLE)
        } else {
            self.update16(port.address, offset, exp::LINK_CONTROL_DISABLE, 0)
        }
    }

    fn downstream_link_state(&mut self, port: &PortHandle) -> Result<LinkPowerState> {
        let cap = self.pcie_capability(port.address)?;
        let handle = self.handle(port.address)?;
        let control = handle.read16(cap + exp::LINK_CONTROL)?;
        let status = handle.read16(cap + exp::LINK_STATUS)?;

        Ok(if control & exp::LINK_CONTROL_DISABLE != 0 {
            LinkPowerState::LinkDisabled
        } else if status & exp::LINK_STATUS_DLL_ACTIVE != 0 {
            LinkPowerState::L0
        } else {
            LinkPowerState::L2
        })
    }

    fn downstream_ltr(&mut self, port: &PortHandle) -> Result<LtrState> {
        let cap = self.pcie_capability(port.address)?;
        let control2 = self.handle(port.address)?.read16(cap + exp::DEVICE_CONTROL2)?;
        Ok(LtrState {
            enabled: control2 & exp::DEVICE_CONTROL2_LTR_EN != 0,
        })
    }

    fn set_downstream_ltr(&mut self, port: &PortHandle, ltr: LtrState) -> Result<()> {
        let cap = self.pcie_capability(port.address)?;
        let offset = cap + exp::DEVICE_CONTROL2;
        if ltr.enabled {
            self.update16(port.address, offset, exp::DEVICE_CONTROL2_LTR_EN, 0)
        } else {
            self.update16(port.address, offset, 0, exp::DEVICE_CONTROL2_LTR_EN)
        }
    }

    fn device_present(&mut self, device: PciAddress) -> Result<bool> {
        Ok(pci::device_exists(&self.root, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::pci::cfg;

    const CAP: usize = 0x40;

    fn fake_port(name: &str) -> (PathBuf, PortHandle) {
        let root = std::env::temp_dir().join(format!("gc6seq-topo-{}-{}", name, std::process::id()));
        let address = PciAddress::new(0, 0, 1, 0);

        let mut config = [0u8; 256];
        config[0..2].copy_from_slice(&0x8086u16.to_le_bytes());
        config[cfg::STATUS as usize] = cfg::STATUS_CAP_LIST as u8;
        config[cfg::CAPABILITY_LIST as usize] = CAP as u8;
        config[CAP] = PCI_CAP_ID_EXP;
        let status = exp::LINK_STATUS_DLL_ACTIVE.to_le_bytes();
        config[CAP + exp::LINK_STATUS as usize..CAP + exp::LINK_STATUS as usize + 2]
            .copy_from_slice(&status);

        let dir = root.join(address.to_string());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config"), config).unwrap();

        (root, PortHandle { address, index: 0 })
    }

    #[test]
    fn test_link_disable_and_enable() {
        let (root, port) = fake_port("link");
        let mut topo = SysfsTopology::with_root(root.clone());

        assert_eq!(topo.downstream_link_state(&port).unwrap(), LinkPowerState::L0);

        topo.set_downstream_link_state(&port, LinkPowerState::LinkDisabled).unwrap();
        assert_eq!(
            topo.downstream_link_state(&port).unwrap(),
            LinkPowerState::LinkDisabled
        );

        topo.set_downstream_link_state(&port, LinkPowerState::L0).unwrap();
        assert!(topo.downstream_link_state(&port).unwrap().is_up());

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_ltr_save_restore() {
        let (root, port) = fake_port("ltr");
        let mut topo = SysfsTopology::with_root(root.clone());

        assert_eq!(topo.downstream_ltr(&port).unwrap(), LtrState { enabled: false });
        topo.set_downstream_ltr(&port, LtrState { enabled: true }).unwrap();
        assert_eq!(topo.downstream_ltr(&port).unwrap(), LtrState { enabled: true });

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_device_presence() {
        let (root, port) = fake_port("presence");
        let mut topo = SysfsTopology::with_root(root.clone());
        assert!(topo.device_present(port.address).unwrap());
        assert!(!topo.device_present(PciAddress::new(0, 1, 0, 0)).unwrap());
        let _ = std::fs::remove_dir_all(root);
    }
}
