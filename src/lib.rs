//! golem-driver library
//!
//! Multi-tile MMIO test-pattern driver: chunked input writes, start
//! registers, status polling and chunked output reads over an asynchronous
//! memory transport, plus a simulated bus of compute-array tiles to run it
//! against.

pub mod config;
pub mod device;
pub mod driver;
pub mod testing;
pub mod transport;
