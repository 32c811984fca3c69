//! vigil operator wiring
//!
//! Command-line configuration, CRD generation and the controller futures
//! the `vigil` binary drives.

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod crds;

pub use config::OperatorConfig;
