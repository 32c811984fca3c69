//! Scan scheduler for vigil
//!
//! Turns each ClusterScan into one CronJob per requested Plugin, sets up
//! the ServiceAccount plugin pods run as, and reports the outcome of the
//! latest runs in the scan's status.

#![deny(missing_docs)]

pub mod apply;
pub mod client;
pub mod controller;
mod error;
pub mod rbac;
pub mod runs;
pub mod template;

pub use client::{KubeScanClient, ScanKubeClient};
pub use controller::{
    effective_plugins, error_policy, reconcile, Context, ContextBuilder, ScanConfig,
};
pub use error::ScanError;
