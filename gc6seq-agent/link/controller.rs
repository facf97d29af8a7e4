use std::time::Duration;

use crate::common::pci::PciAddress;
use crate::common::poll::{poll_bounded, PollBudget};
use crate::error::{Gc6Error, Result};
use crate::link::{LinkPowerState, LinkTopology, LtrState, PortHandle};

/// Default ceiling for link and presence polls
pub const DEFAULT_LINK_POLL_MS: u64 = 200;

/// Drives the link between the GPU and its upstream port
pub struct LinkPowerController<L: LinkTopology> {
    topology: L,
    device: PciAddress,
    port: Option<PortHandle>,
    saved_ltr: Option<LtrState>,
    poll_timeout_ms: u64,
}

impl<L: LinkTopology> LinkPowerController<L> {
    pub fn new(topology: L, device: PciAddress) -> Self {
        Self {
            topology,
            device,
            port: None,
            saved_ltr: None,
            poll_timeout_ms: DEFAULT_LINK_POLL_MS,
        }
    }

    pub fn device(&self) -> PciAddress {
        self.device
    }

    pub fn topology(&self) -> &L {
        &self.topology
    }

    pub fn set_poll_timeout_ms(&mut self, timeout_ms: u64) {
        self.poll_timeout_ms = timeout_ms;
    }

    pub fn poll_timeout_ms(&self) -> u64 {
        self.poll_timeout_ms
    }

    /// Upstream port of the GPU, looked up once
    pub fn port(&mut self) -> Result<PortHandle> {
        if let Some(port) = self.port {
            return Ok(port);
        }
        let port = self.topology.upstream_port(self.device)?;
        tracing::debug!("GPU {} sits below port {} (slot {})", self.device, port.address, port.index);
        self.port = Some(port);
        Ok(port)
    }

    /// Take the link down and wait for the port to report it down
    pub fn disable_link(&mut self, target: LinkPowerState) -> Result<Duration> {
        if target.is_up() {
            return Err(Gc6Error::SoftwareError(format!(
                "disable_link called with link-up state {target}"
            )));
        }
        self.request(target)?;
        self.poll_link_status(target, self.poll_timeout_ms)
    }

    /// Bring the link up and wait for it to train
    pub fn enable_link(&mut self, target: LinkPowerState) -> Result<Duration> {
        self.request_enable(target)?;
        self.poll_link_status(target, self.poll_timeout_ms)
    }

    /// Request the link up without waiting for it
    pub fn request_enable(&mut self, target: LinkPowerState) -> Result<()> {
        if !target.is_up() {
            return Err(Gc6Error::SoftwareError(format!(
                "enable_link called with link-down state {target}"
            )));
        }
        self.request(target)
    }

    fn request(&mut self, target: LinkPowerState) -> Result<()> {
        let port = self.port()?;
        tracing::debug!("Requesting link {} on port {}", target, port.address);
        self.topology.set_downstream_link_state(&port, target)
    }

    /// Poll every millisecond until the observed state satisfies `expected`
    pub fn poll_link_status(&mut self, expected: LinkPowerState, timeout_ms: u64) -> Result<Duration> {
        let port = self.port()?;
        let topology = &mut self.topology;
        let what = format!("link {expected} on port {}", port.address);
        let elapsed = poll_bounded(&what, PollBudget::millis(timeout_ms), |_| {
            Ok(expected.satisfied_by(topology.downstream_link_state(&port)?))
        })?;
        tracing::debug!("Link reached {} in {:?}", expected, elapsed);
        Ok(elapsed)
    }

    /// Remember the port's LTR state for a later `restore_ltr`
    pub fn save_ltr(&mut self) -> Result<LtrState> {
        let port = self.port()?;
        let ltr = self.topology.downstream_ltr(&port)?;
        tracing::debug!("Saved LTR state of port {}: {:?}", port.address, ltr);
        self.saved_ltr = Some(ltr);
        Ok(ltr)
    }

    pub fn restore_ltr(&mut self) -> Result<()> {
        let Some(ltr) = self.saved_ltr.take() else {
            tracing::warn!("No saved LTR state to restore for {}", self.device);
            return Ok(());
        };
        let port = self.port()?;
        self.topology.set_downstream_ltr(&port, ltr)
    }

    pub fn device_present(&mut self) -> Result<bool> {
        self.topology.device_present(self.device)
    }

    /// Wait for the GPU to answer config reads again
    pub fn poll_device_present(&mut self, timeout_ms: u64) -> Result<Duration> {
        let device = self.device;
        let topology = &mut self.topology;
        let what = format!("PCI identity of {device}");
        poll_bounded(&what, PollBudget::millis(timeout_ms), |_| topology.device_present(device))
    }
}
