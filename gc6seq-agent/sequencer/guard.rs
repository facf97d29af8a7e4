use std::ops::{Deref, DerefMut};
use std::time::Instant;

use crate::common::bus::SmbusTransport;
use crate::common::poll::as_millis;
use crate::companion::CompanionConfigPreserver;
use crate::diag;
use crate::error::Gc6Error;
use crate::link::LinkTopology;
use crate::sequencer::{Phase, PowerSequencer, ResultCode};

/// Scoped fatal-path capture around one entry or exit.
///
/// The sequence runs through the guard. Unless [`disarm`](Self::disarm) is
/// called, dropping the guard reads the EC debug block, logs it, and stores
/// the snapshot and result code into the sequencer's statistics. The status
/// byte read here goes to the report only; the statistics keep the last byte
/// the sequence itself observed.
pub struct FatalGuard<'a, B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    seq: &'a mut PowerSequencer<B, L, C>,
    phase: Phase,
    started: Instant,
    armed: bool,
    code: Option<ResultCode>,
    detail: Option<String>,
}

impl<'a, B, L, C> FatalGuard<'a, B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    pub fn arm(seq: &'a mut PowerSequencer<B, L, C>, phase: Phase) -> Self {
        Self {
            seq,
            phase,
            started: Instant::now(),
            armed: true,
            code: None,
            detail: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// The phase completed; nothing to capture
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Remember the error the phase failed with
    pub fn record(&mut self, err: &Gc6Error) {
        self.code = Some(err.result_code());
        self.detail = Some(err.to_string());
    }
}

impl<B, L, C> Deref for FatalGuard<'_, B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    type Target = PowerSequencer<B, L, C>;

    fn deref(&self) -> &Self::Target {
        self.seq
    }
}

impl<B, L, C> DerefMut for FatalGuard<'_, B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.seq
    }
}

impl<B, L, C> Drop for FatalGuard<'_, B, L, C>
where
    B: SmbusTransport,
    L: LinkTopology,
    C: CompanionConfigPreserver,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let phase = self.phase;
        let elapsed = self.started.elapsed();
        let code = self.code.unwrap_or(ResultCode::SoftwareError);
        let report = diag::capture(&mut self.seq.ec, phase, code, elapsed, self.detail.take());

        let stats = &mut self.seq.stats;
        stats.set_result(phase, code);
        if stats.time_ms(phase) == 0 {
            stats.set_time_ms(phase, as_millis(elapsed));
        }
        stats.debug_snapshot = report.snapshot;
    }
}
