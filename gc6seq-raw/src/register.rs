//! Generic register abstractions for type-safe EC register programming

use thiserror::Error;

/// Errors produced while decoding raw register contents
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("Vendor signature mismatch: expected 0x{expected:04X}, found 0x{found:04X}")]
    VendorMismatch { expected: u16, found: u16 },

    #[error("Invalid {field} value 0x{value:02X}")]
    InvalidField { field: &'static str, value: u8 },

    #[error("Block too short: expected {expected} bytes, got {actual}")]
    ShortBlock { expected: usize, actual: usize },
}

/// Trait for register layouts that can be converted to/from raw EC register bytes
///
/// Every EC control and status register is a single byte behind the
/// index/data window, so layouts round-trip through `u8`.
///
/// # Example
///
/// ```ignore
/// use gc6seq_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     code: u8,
///     trigger: bool,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn to_reg_value(&self) -> u8 {
///         (self.code & 0x7F) | if self.trigger { 0x80 } else { 0 }
///     }
///
///     fn from_reg_value(value: u8) -> Self {
///         Self {
///             code: value & 0x7F,
///             trigger: value & 0x80 != 0,
///         }
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Convert this register layout to a raw register byte
    fn to_reg_value(&self) -> u8;

    /// Parse a raw register byte into this register layout
    fn from_reg_value(value: u8) -> Self;

    /// Validate that the register values are within acceptable ranges
    ///
    /// Returns `Ok(())` if valid, or an error message if invalid.
    fn validate(&self) -> Result<(), &'static str> {
        Ok(())
    }
}

/// An EC register with address and typed layout
///
/// # Example
///
/// ```ignore
/// use gc6seq_raw::register::Register;
/// use gc6seq_raw::map::{addr, fsm::FsmModeControl};
///
/// let reg = Register::new(addr::FSM_MODE, FsmModeControl::commit(FsmMode::Rtd3));
/// let value = reg.to_reg_value();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Register<T: RegisterLayout> {
    /// 16-bit address inside the EC register file
    pub address: u16,
    /// Typed register layout
    pub layout: T,
}

impl<T: RegisterLayout> Register<T> {
    /// Create a new register with the given address and layout
    pub fn new(address: u16, layout: T) -> Self {
        Self { address, layout }
    }

    /// Create a register with default layout
    pub fn with_address(address: u16) -> Self
    where
        T: Default,
    {
        Self {
            address,
            layout: T::default(),
        }
    }

    /// Validate the register layout
    pub fn validate(&self) -> Result<(), &'static str> {
        self.layout.validate()
    }

    /// Get the raw byte for this register
    pub fn to_reg_value(&self) -> u8 {
        self.layout.to_reg_value()
    }

    /// Update the layout from a raw byte
    pub fn from_reg_value(&mut self, value: u8) {
        self.layout = T::from_reg_value(value);
    }
}
