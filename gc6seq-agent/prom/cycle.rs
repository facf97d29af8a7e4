use prometheus::{Gauge, IntCounterVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::named_enum;
use crate::sequencer::{CycleStatistics, Phase, ResultCode};

named_enum! {
    pub enum CycleMetric {
        EntryTime => "gc6seq_entry_time_ms",
        ExitTime => "gc6seq_exit_time_ms",
        LinkDownTime => "gc6seq_link_down_ms",
        LinkUpTime => "gc6seq_link_up_ms",
        EntryStatus => "gc6seq_entry_status",
        ExitStatus => "gc6seq_exit_status",
        WakeStatus => "gc6seq_wake_status",
    }
}

impl CycleMetric {
    fn help(&self) -> &'static str {
        match self {
            CycleMetric::EntryTime => "Time for the EC to acknowledge power-down, in ms",
            CycleMetric::ExitTime => "Time from wakeup to EC power-on, in ms",
            CycleMetric::LinkDownTime => "Time for the upstream link to go down, in ms",
            CycleMetric::LinkUpTime => "Time for the upstream link to retrain, in ms",
            CycleMetric::EntryStatus => "Raw EC FSM status byte after entry",
            CycleMetric::ExitStatus => "Raw EC FSM status byte after exit",
            CycleMetric::WakeStatus => "Raw EC wake status byte after exit",
        }
    }

    fn value(&self, stats: &CycleStatistics) -> f64 {
        match self {
            CycleMetric::EntryTime => stats.entry_time_ms as f64,
            CycleMetric::ExitTime => stats.exit_time_ms as f64,
            CycleMetric::LinkDownTime => stats.link_down_ms as f64,
            CycleMetric::LinkUpTime => stats.link_up_ms as f64,
            CycleMetric::EntryStatus => f64::from(stats.entry_status),
            CycleMetric::ExitStatus => f64::from(stats.exit_status),
            CycleMetric::WakeStatus => f64::from(stats.wake_status),
        }
    }
}

/// Prometheus view of the most recent power cycle
pub struct CycleMetricExporter {
    registry: Arc<Registry>,
    gauges: HashMap<CycleMetric, Gauge>,
    results: IntCounterVec,
}

impl CycleMetricExporter {
    pub fn new(target: &str) -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let mut gauges = HashMap::new();
        for metric in CycleMetric::all() {
            let opts = Opts::new(metric.name(), metric.help()).const_label("target", target);
            let gauge = Gauge::with_opts(opts)?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(metric, gauge);
        }

        let results = IntCounterVec::new(
            Opts::new("gc6seq_phase_results_total", "Entry and exit outcomes by result code")
                .const_label("target", target),
            &["phase", "result"],
        )?;
        registry.register(Box::new(results.clone()))?;

        Ok(Self {
            registry,
            gauges,
            results,
        })
    }

    /// Publish the statistics of one completed (or failed) cycle
    pub fn record(&self, stats: &CycleStatistics) {
        for (metric, gauge) in &self.gauges {
            gauge.set(metric.value(stats));
        }
        for phase in Phase::all() {
            let result = stats.result(phase);
            if result != ResultCode::NotRun {
                self.results
                    .with_label_values(&[phase.name(), result.name()])
                    .inc();
            }
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}
