use std::io;
use thiserror::Error;

use crate::common::bus::BusError;
use crate::sequencer::ResultCode;

#[derive(Error, Debug)]
pub enum Gc6Error {
    #[error("Bus transaction failed: {0}")]
    Bus(#[from] BusError),

    #[error("SMBus adapter error: {0}")]
    Smbus(#[from] gc6seq_raw::SmbusError),

    #[error("Timed out waiting for {what} after {budget_ms} ms")]
    Timeout { what: String, budget_ms: u64 },

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Unsupported EC firmware version {major}.{minor}")]
    UnsupportedFirmware { major: u8, minor: u8 },

    #[error("Software error: {0}")]
    SoftwareError(String),

    #[error("Link operation failed: {0}")]
    Link(String),

    #[error("Companion configuration space operation failed: {0}")]
    Companion(String),

    #[error("PCI operation failed: {0}")]
    PciError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Register decode error: {0}")]
    Layout(#[from] gc6seq_raw::LayoutError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Gc6Error {
    /// Result code recorded into cycle statistics for this failure
    pub fn result_code(&self) -> ResultCode {
        match self {
            Gc6Error::Bus(_) | Gc6Error::Smbus(_) => ResultCode::BusError,
            Gc6Error::Timeout { .. } => ResultCode::Timeout,
            Gc6Error::DeviceNotFound(_) => ResultCode::DeviceNotFound,
            Gc6Error::UnsupportedFirmware { .. } => ResultCode::UnsupportedFirmware,
            Gc6Error::Link(_) | Gc6Error::PciError(_) => ResultCode::LinkError,
            Gc6Error::Companion(_) => ResultCode::CompanionError,
            _ => ResultCode::SoftwareError,
        }
    }
}

pub type Result<T> = std::result::Result<T, Gc6Error>;
