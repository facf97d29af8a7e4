pub mod cycle;

pub use cycle::{CycleMetric, CycleMetricExporter};
