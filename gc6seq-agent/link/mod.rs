pub mod controller;
pub mod topology;

pub use controller::LinkPowerController;
pub use topology::{LinkTopology, LtrState, PortHandle, SysfsTopology};

use crate::named_enum;

named_enum! {
    /// Requested or observed state of the upstream PCIe link
    pub enum LinkPowerState {
        L0 => "L0",
        L2 => "L2",
        LinkEnabled => "enabled",
        LinkDisabled => "disabled",
    }
}

impl LinkPowerState {
    /// Link trained and carrying traffic
    pub fn is_up(&self) -> bool {
        matches!(self, LinkPowerState::L0 | LinkPowerState::LinkEnabled)
    }

    /// Whether an observed state fulfils this requested state
    pub fn satisfied_by(&self, observed: LinkPowerState) -> bool {
        self.is_up() == observed.is_up()
    }
}
