use serde::Serialize;

use gc6seq_raw::map::DebugSnapshot;

use crate::sequencer::{Phase, ResultCode};

/// Measurements of the most recent entry/exit pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleStatistics {
    pub entry_time_ms: u64,
    pub exit_time_ms: u64,
    pub link_down_ms: u64,
    pub link_up_ms: u64,
    /// Raw FSM status byte read after entry
    pub entry_status: u8,
    /// Raw FSM status byte read during exit
    pub exit_status: u8,
    pub wake_status: u8,
    pub entry_result: ResultCode,
    pub exit_result: ResultCode,
    pub i2c_bypass_mismatch: bool,
    pub i2c_check_mismatch: bool,
    #[serde(skip)]
    pub debug_snapshot: Option<DebugSnapshot>,
}

impl CycleStatistics {
    /// Clear the exit half, keeping the entry measurements
    pub fn reset_exit(&mut self) {
        let entry = CycleStatistics {
            entry_time_ms: self.entry_time_ms,
            link_down_ms: self.link_down_ms,
            entry_status: self.entry_status,
            entry_result: self.entry_result,
            ..Default::default()
        };
        *self = entry;
    }

    /// Most recent EC power-status byte
    pub fn last_status(&self) -> u8 {
        if self.exit_result == ResultCode::NotRun {
            self.entry_status
        } else {
            self.exit_status
        }
    }

    pub fn result(&self, phase: Phase) -> ResultCode {
        match phase {
            Phase::Entry => self.entry_result,
            Phase::Exit => self.exit_result,
        }
    }

    pub fn time_ms(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Entry => self.entry_time_ms,
            Phase::Exit => self.exit_time_ms,
        }
    }

    pub(crate) fn set_result(&mut self, phase: Phase, code: ResultCode) {
        match phase {
            Phase::Entry => self.entry_result = code,
            Phase::Exit => self.exit_result = code,
        }
    }

    pub(crate) fn set_time_ms(&mut self, phase: Phase, ms: u64) {
        match phase {
            Phase::Entry => self.entry_time_ms = ms,
            Phase::Exit => self.exit_time_ms = ms,
        }
    }
}
