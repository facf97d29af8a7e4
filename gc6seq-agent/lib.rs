// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod common;
pub mod companion;
pub mod config;
pub mod diag;
pub mod ec;
pub mod error;
pub mod link;
pub mod orchestrator;
pub mod prom;
pub mod sequencer;
pub mod wakeup;

#[cfg(test)]
pub(crate) mod testing;

pub use companion::{CompanionConfigPreserver, ConfigSpaceSnapshot};
pub use config::{DeviceConfig, LinkSequencing, ProtocolOptions, SequencerConfig};
pub use ec::EcProtocol;
pub use error::{Gc6Error, Result};
pub use link::{LinkPowerController, LinkPowerState, LinkTopology, SysfsTopology};
pub use orchestrator::{CycleConfig, CycleRunner, CycleSummary};
pub use prom::CycleMetricExporter;
pub use sequencer::{CycleStatistics, PowerSequencer, PowerState, ResultCode, TargetState};
pub use wakeup::WakeupEventKind;
