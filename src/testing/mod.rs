//! Test infrastructure for the driver.
//!
//! - [`RecordingTransport`]: scriptable transport for exercising the driver
//!   protocol request by request
//! - [`Simulation`]: full runs against the simulated bus and test arrays
//!
//! # Usage
//!
//! ```
//! use golem_driver::config::Config;
//! use golem_driver::testing::Simulation;
//!
//! let config = Config::from_toml_str(&Config::sample_config(), "sample").unwrap();
//! let mut sim = Simulation::from_config(&config).unwrap();
//! assert!(sim.run(10_000).is_pass());
//! sim.verify().unwrap();
//! ```

pub mod recording;
pub mod simulation;

pub use recording::{IssuedRequest, RecordingTransport, RequestKind};
pub use simulation::{expected_output, RunOutcome, Simulation};
