//! Fatal-path capture of EC power-sequencer state
//!
//! When an entry or exit fails, the EC keeps the position of its
//! power-sequencer program in a small debug block. Reading it right after
//! the failure is usually the only way to tell a rail fault from a
//! firmware hang.

use std::time::Duration;

use gc6seq_raw::map::{DebugSnapshot, EcErrorCode};
use gc6seq_raw::RegisterLayout;

use crate::common::bus::SmbusTransport;
use crate::common::poll::as_millis;
use crate::ec::EcProtocol;
use crate::sequencer::{Phase, ResultCode};

/// Everything captured after a failed phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalReport {
    pub phase: Phase,
    pub result: ResultCode,
    pub elapsed: Duration,
    pub detail: Option<String>,
    pub status: Option<u8>,
    pub error_code: Option<EcErrorCode>,
    pub snapshot: Option<DebugSnapshot>,
}

/// Read the EC's post-mortem state and log it.
///
/// Every read is best effort: a bus that is itself the cause of the failure
/// must not hide the rest of the report.
pub fn capture<B: SmbusTransport>(
    ec: &mut EcProtocol<B>,
    phase: Phase,
    result: ResultCode,
    elapsed: Duration,
    detail: Option<String>,
) -> FatalReport {
    let snapshot = ec
        .read_debug_block()
        .map_err(|e| tracing::warn!("Could not read EC debug block: {}", e))
        .ok();
    let error_code = ec
        .read_error_code()
        .map_err(|e| tracing::warn!("Could not read EC error code: {}", e))
        .ok();
    let status = ec
        .read_fsm_status()
        .map(|s| s.to_reg_value())
        .map_err(|e| tracing::warn!("Could not read EC status: {}", e))
        .ok();

    let report = FatalReport {
        phase,
        result,
        elapsed,
        detail,
        status,
        error_code,
        snapshot,
    };
    log_report(&report);
    report
}

pub fn log_report(report: &FatalReport) {
    tracing::error!(
        "GPU power {} failed with {} after {} ms{}",
        report.phase,
        report.result,
        as_millis(report.elapsed),
        report
            .detail
            .as_deref()
            .map(|d| format!(": {d}"))
            .unwrap_or_default()
    );

    match report.status {
        Some(status) => tracing::error!("  EC status at failure: 0x{:02x}", status),
        None => tracing::error!("  EC status at failure: unavailable"),
    }

    if let Some(code) = report.error_code {
        tracing::error!("  EC error code: {:?}", code);
    }

    if let Some(snap) = &report.snapshot {
        tracing::error!("  state machine index: {}", snap.fsm_index);
        tracing::error!("  power sequencer PC: 0x{:04x}", snap.program_counter);
        tracing::error!("  last instruction: 0x{:02x}", snap.last_instruction);
        tracing::error!(
            "  EC entry/exit counters: {} ms / {} ms",
            snap.entry_time_ms,
            snap.exit_time_ms
        );
        tracing::error!("  debug block: {}", snap);
    }
}
