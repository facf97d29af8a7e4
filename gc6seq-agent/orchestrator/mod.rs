pub mod cycler;

pub use cycler::{CycleConfig, CycleRunner, CycleSummary};
