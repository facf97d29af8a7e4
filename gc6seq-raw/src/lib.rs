//! # gc6seq-raw
//!
//! Register definitions for the embedded controller (EC) that sequences a
//! discrete GPU into and out of its deep power states (GC6, GC6M, RTD3,
//! D3Cold).
//!
//! This crate provides the bit-exact register map the EC firmware exposes
//! through its index/data window, typed layouts for the single-byte control
//! and status registers, decoders for the identity and debug blocks, and the
//! Linux `i2c-dev` SMBus primitives used to reach the EC.
//!
//! ## Usage
//!
//! ```ignore
//! use gc6seq_raw::map::{fsm, FsmEvent};
//! use gc6seq_raw::RegisterLayout;
//!
//! // Request "prepare to power down" with the trigger bit set
//! let ctrl = fsm::FsmEventControl::trigger(FsmEvent::PreparePowerDown);
//! ctrl.validate()?;
//!
//! let byte = ctrl.to_reg_value(); // 0x81
//! ```

pub mod map;
pub mod register;
pub mod smbus;

// Re-export for convenience
pub use map::{FsmEvent, FsmMode};
pub use register::{LayoutError, Register, RegisterLayout};
pub use smbus::{Result, SmbusError};
