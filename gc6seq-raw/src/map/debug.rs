//! Power-sequencer debug block
//!
//! 16 bytes at [`addr::DEBUG_BASE`](super::addr::DEBUG_BASE). The contents
//! are volatile: the EC overwrites them on the next event it processes.
//!
//! | Offset | Field                         |
//! |--------|-------------------------------|
//! | 0x0    | master FSM state index        |
//! | 0x1-2  | power-sequencer PC (LE)       |
//! | 0x3    | last executed instruction     |
//! | 0x4-5  | EC-side entry time, ms (LE)   |
//! | 0x6-7  | EC-side exit time, ms (LE)    |
//! | 0x8-F  | raw, firmware specific        |

use std::fmt;

use crate::register::LayoutError;

/// Size of the debug block in bytes
pub const DEBUG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugSnapshot {
    pub fsm_index: u8,
    pub program_counter: u16,
    pub last_instruction: u8,
    pub entry_time_ms: u16,
    pub exit_time_ms: u16,
    pub raw: [u8; DEBUG_LEN],
}

impl DebugSnapshot {
    pub fn decode(block: &[u8]) -> Result<Self, LayoutError> {
        let raw: [u8; DEBUG_LEN] = block
            .get(..DEBUG_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(LayoutError::ShortBlock {
                expected: DEBUG_LEN,
                actual: block.len(),
            })?;

        Ok(Self {
            fsm_index: raw[0],
            program_counter: u16::from_le_bytes([raw[1], raw[2]]),
            last_instruction: raw[3],
            entry_time_ms: u16::from_le_bytes([raw[4], raw[5]]),
            exit_time_ms: u16::from_le_bytes([raw[6], raw[7]]),
            raw,
        })
    }
}

impl fmt::Display for DebugSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fsm={} pc=0x{:04X} insn=0x{:02X} entry={}ms exit={}ms raw=",
            self.fsm_index,
            self.program_counter,
            self.last_instruction,
            self.entry_time_ms,
            self.exit_time_ms
        )?;
        for b in &self.raw {
            write!(f, "{b:02X}")?;
        }
        Ok(())
    }
}
