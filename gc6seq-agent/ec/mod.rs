pub mod protocol;

pub use protocol::{EcProtocol, RegisterValue, BUS_RETRY_ATTEMPTS, TRIGGER_POLL};
