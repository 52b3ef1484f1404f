//! Library crate for modbus-scan-rs exposing reusable modules.
pub mod codec;
pub mod scanner;
pub mod server;
pub mod transport;
pub mod types;
pub mod worker;
