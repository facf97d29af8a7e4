// Repeated enter/exit cycling of one GPU
// Runs on a blocking thread; cancellation is checked only between cycles

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::bus::SmbusTransport;
use crate::companion::CompanionConfigPreserver;
use crate::error::Result;
use crate::link::LinkTopology;
use crate::prom::CycleMetricExporter;
use crate::sequencer::{CycleStatistics, PowerSequencer, PowerState, TargetState};

/// What one cycling run does
#[derive(Debug, Clone)]
pub struct CycleConfig {
    pub target: TargetState,
    /// Number of cycles; 0 runs until cancelled
    pub cycles: u64,
    /// Time spent in the low-power state before exit
    pub dwell: Duration,
    /// Pause at full power between cycles
    pub interval: Duration,
    pub stop_on_failure: bool,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            target: TargetState::Gc6,
            cycles: 1,
            dwell: Duration::from_millis(100),
            interval: Duration::from_millis(100),
            stop_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleSummary {
    pub completed: u64,
    pub failed: u64,
    pub last: CycleStatistics,
}

pub struct CycleRunner<B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    sequencer: Arc<Mutex<PowerSequencer<B, L, C>>>,
    config: CycleConfig,
    exporter: Option<Arc<CycleMetricExporter>>,
}

impl<B, L, C> CycleRunner<B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    pub fn new(sequencer: PowerSequencer<B, L, C>, config: CycleConfig) -> Self {
        Self {
            sequencer: Arc::new(Mutex::new(sequencer)),
            config,
            exporter: None,
        }
    }

    pub fn with_exporter(mut self, exporter: Arc<CycleMetricExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn sequencer(&self) -> Arc<Mutex<PowerSequencer<B, L, C>>> {
        Arc::clone(&self.sequencer)
    }

    /// One full enter/dwell/exit cycle
    pub fn run_cycle(&self) -> Result<CycleStatistics> {
        let mut seq = self.sequencer.lock();

        let mut result = seq.enter(self.config.target);
        if result.is_ok() {
            thread::sleep(self.config.dwell);
            result = seq.exit();
        }

        let stats = seq.stats().clone();
        if let Some(exporter) = &self.exporter {
            exporter.record(&stats);
        }

        if let Err(e) = result {
            if seq.state() == PowerState::Transitioning {
                match seq.resync_state() {
                    Ok(state) => tracing::warn!("GPU left in {} after failed cycle", state),
                    Err(re) => tracing::error!("Could not resynchronise power state: {}", re),
                }
            }
            return Err(e);
        }
        Ok(stats)
    }

    /// Cycle until the configured count is reached or `cancel` fires
    pub fn run_blocking(&self, cancel: &CancellationToken) -> CycleSummary {
        let mut summary = CycleSummary::default();
        let mut iteration = 0u64;

        while self.config.cycles == 0 || iteration < self.config.cycles {
            if cancel.is_cancelled() {
                tracing::warn!("Cycling cancelled after {} cycles", iteration);
                break;
            }
            iteration += 1;

            match self.run_cycle() {
                Ok(stats) => {
                    summary.completed += 1;
                    tracing::info!(
                        "Cycle {}: entry {} ms, exit {} ms",
                        iteration,
                        stats.entry_time_ms,
                        stats.exit_time_ms
                    );
                    summary.last = stats;
                }
                Err(e) => {
                    summary.failed += 1;
                    summary.last = self.sequencer.lock().stats().clone();
                    tracing::error!("Cycle {} failed: {}", iteration, e);
                    if self.config.stop_on_failure {
                        break;
                    }
                }
            }

            thread::sleep(self.config.interval);
        }

        summary
    }
}

impl<B, L, C> CycleRunner<B, L, C>
where
    B: SmbusTransport + Send + 'static,
    L: LinkTopology + Send + 'static,
    C: CompanionConfigPreserver + Send + 'static,
{
    /// Run the cycling loop on tokio's blocking pool
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<CycleSummary> {
        tracing::warn!("Starting power cycling of {}", self.config.target);
        tokio::task::spawn_blocking(move || self.run_blocking(&cancel))
    }
}
