pub mod bus;
pub mod pci;
pub mod poll;

pub use bus::{BusError, BusOp, I2cDevBus, SmbusTransport};
pub use pci::{PciAddress, PciHandle};
pub use poll::{poll_bounded, PollBudget};
