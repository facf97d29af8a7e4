use std::path::Path;

use serde::{Deserialize, Serialize};

use gc6seq_raw::map::DEFAULT_EC_ADDRESS;

use crate::common::pci::{self, cfg, PciAddress, PciHandle};
use crate::error::{Gc6Error, Result};
use crate::wakeup::WakeupEventKind;
use crate::{named_enum, serde_by_name};

/// PCI vendor id of the GPUs this tool sequences
pub const NVIDIA_VENDOR_ID: u16 = 0x10DE;

/// PCI base class of display controllers
const DISPLAY_CLASS: u8 = 0x03;

/// Longest link or presence poll a config may request
const MAX_LINK_POLL_MS: u64 = 10_000;

named_enum! {
    /// Where link coordination happens relative to the EC command
    pub enum LinkSequencing {
        None => "none",
        BeforeEc => "before-ec",
        AfterEc => "after-ec",
    }
}

serde_by_name!(LinkSequencing);

impl Default for LinkSequencing {
    fn default() -> Self {
        LinkSequencing::AfterEc
    }
}

/// Knobs for one entry/exit sequence, fixed for the duration of a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProtocolOptions {
    /// Settle time between an EC command and reading its status
    pub post_command_delay_ms: u64,
    /// Settle time after the link reached L2
    pub post_l2_entry_delay_ms: u64,
    /// Settle time after the link returned to L0
    pub post_l2_exit_delay_ms: u64,
    /// Ceiling for link-state and presence polls
    pub link_poll_timeout_ms: u64,
    pub verbosity: u8,
    pub wakeup: WakeupEventKind,
    /// EC wake timer armed during entry for timer wakeups
    pub wake_timer_ms: u16,
    pub entry_link: LinkSequencing,
    pub exit_link: LinkSequencing,
    /// Request the link up a second time once the exit is confirmed
    pub reenable_link_after_exit: bool,
    /// Save companion config space across RTD3 resets
    pub preserve_companions: bool,
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            post_command_delay_ms: 2,
            post_l2_entry_delay_ms: 10,
            post_l2_exit_delay_ms: 100,
            link_poll_timeout_ms: 200,
            verbosity: 0,
            wakeup: WakeupEventKind::default(),
            wake_timer_ms: 500,
            entry_link: LinkSequencing::AfterEc,
            exit_link: LinkSequencing::AfterEc,
            reenable_link_after_exit: false,
            preserve_companions: false,
        }
    }
}

impl ProtocolOptions {
    pub fn validate(&self) -> Result<()> {
        if self.link_poll_timeout_ms == 0 || self.link_poll_timeout_ms > MAX_LINK_POLL_MS {
            return Err(Gc6Error::ConfigError(format!(
                "link_poll_timeout_ms must be within 1..={MAX_LINK_POLL_MS}, got {}",
                self.link_poll_timeout_ms
            )));
        }
        if self.wakeup.arms_timer() && self.wake_timer_ms == 0 {
            return Err(Gc6Error::ConfigError(format!(
                "wakeup '{}' needs a non-zero wake_timer_ms",
                self.wakeup
            )));
        }
        Ok(())
    }
}

/// Where the hardware lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// `/dev/i2c-N` adapter the EC hangs off
    pub i2c_bus: u32,
    pub ec_address: u8,
    /// GPU function; detected from sysfs when absent
    pub gpu: Option<PciAddress>,
    /// Functions whose config space must survive an RTD3 reset
    pub companions: Vec<PciAddress>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            i2c_bus: 0,
            ec_address: DEFAULT_EC_ADDRESS,
            gpu: None,
            companions: Vec::new(),
        }
    }
}

impl DeviceConfig {
    /// Find the first NVIDIA display-class function under `root`
    pub fn auto_detect(root: &Path) -> Result<PciAddress> {
        for address in pci::list_devices(root)? {
            let Ok(handle) = PciHandle::open(root, address) else {
                continue;
            };
            let vendor = handle.read16(cfg::VENDOR_ID).unwrap_or(0xFFFF);
            let class = handle.read8(cfg::CLASS_CODE).unwrap_or(0xFF);
            if vendor == NVIDIA_VENDOR_ID && class == DISPLAY_CLASS {
                tracing::info!("Auto-detected GPU at {}", address);
                return Ok(address);
            }
        }
        Err(Gc6Error::DeviceNotFound(format!(
            "no NVIDIA display controller under {}",
            root.display()
        )))
    }

    /// Configured GPU, or the auto-detected one
    pub fn resolve_gpu(&self, root: &Path) -> Result<PciAddress> {
        match self.gpu {
            Some(gpu) => Ok(gpu),
            None => Self::auto_detect(root),
        }
    }

    /// Configured companions, or the GPU's sibling functions (HDA, USB-C)
    pub fn resolve_companions(&self, root: &Path, gpu: PciAddress) -> Result<Vec<PciAddress>> {
        if !self.companions.is_empty() {
            return Ok(self.companions.clone());
        }
        Ok(pci::list_devices(root)?
            .into_iter()
            .filter(|a| {
                a.domain == gpu.domain
                    && a.bus == gpu.bus
                    && a.device == gpu.device
                    && a.function != gpu.function
            })
            .collect())
    }
}

/// On-disk configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SequencerConfig {
    pub device: DeviceConfig,
    pub options: ProtocolOptions,
}

impl SequencerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Gc6Error::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&text)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.options.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_defaults() {
        let options = ProtocolOptions::default();
        assert_eq!(options.entry_link, LinkSequencing::AfterEc);
        assert_eq!(options.exit_link, LinkSequencing::AfterEc);
        assert_eq!(options.wakeup, WakeupEventKind::GpuEvent);
        options.validate().unwrap();
        assert_eq!(DeviceConfig::default().ec_address, 0x2A);
    }

    #[test]
    fn test_parse_partial_json() {
        let config = SequencerConfig::from_json(
            r#"{
                "device": { "i2c_bus": 3, "gpu": "0000:01:00.0" },
                "options": { "wakeup": "hotplug", "entry_link": "before-ec", "verbosity": 2 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.device.i2c_bus, 3);
        assert_eq!(config.device.gpu, Some(PciAddress::new(0, 1, 0, 0)));
        assert_eq!(config.options.wakeup, WakeupEventKind::HotPlug);
        assert_eq!(config.options.entry_link, LinkSequencing::BeforeEc);
        assert_eq!(config.options.link_poll_timeout_ms, 200);
    }

    #[test]
    fn test_rejects_bad_options() {
        assert!(matches!(
            SequencerConfig::from_json(r#"{ "options": { "wakeup": "sneeze" } }"#),
            Err(Gc6Error::JsonError(_))
        ));
        assert!(matches!(
            SequencerConfig::from_json(r#"{ "options": { "wakeup": "timer", "wake_timer_ms": 0 } }"#),
            Err(Gc6Error::ConfigError(_))
        ));
        assert!(matches!(
            SequencerConfig::from_json(r#"{ "options": { "link_poll_timeout_ms": 0 } }"#),
            Err(Gc6Error::ConfigError(_))
        ));
        assert!(SequencerConfig::from_json(r#"{ "bogus": 1 }"#).is_err());
    }

    fn fake_tree(name: &str, functions: &[(&str, u16, u8)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("gc6seq-cfg-{}-{}", name, std::process::id()));
        for (address, vendor, class) in functions {
            let mut config = [0u8; 256];
            config[0..2].copy_from_slice(&vendor.to_le_bytes());
            config[cfg::CLASS_CODE as usize] = *class;
            let dir = root.join(address);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("config"), config).unwrap();
        }
        root
    }

    #[test]
    fn test_auto_detect() {
        let root = fake_tree(
            "detect",
            &[
                ("0000:00:01.0", 0x8086, 0x06),
                ("0000:01:00.0", NVIDIA_VENDOR_ID, DISPLAY_CLASS),
                ("0000:01:00.1", NVIDIA_VENDOR_ID, 0x04),
            ],
        );

        let gpu = DeviceConfig::auto_detect(&root).unwrap();
        assert_eq!(gpu, PciAddress::new(0, 1, 0, 0));

        let device = DeviceConfig::default();
        assert_eq!(device.resolve_gpu(&root).unwrap(), gpu);
        assert_eq!(
            device.resolve_companions(&root, gpu).unwrap(),
            vec![PciAddress::new(0, 1, 0, 1)]
        );

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn test_auto_detect_without_gpu() {
        let root = fake_tree("nogpu", &[("0000:00:02.0", 0x8086, DISPLAY_CLASS)]);
        assert!(matches!(
            DeviceConfig::auto_detect(&root),
            Err(Gc6Error::DeviceNotFound(_))
        ));
        let _ = std::fs::remove_dir_all(root);
    }
}
