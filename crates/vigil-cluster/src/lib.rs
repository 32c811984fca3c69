//! Cluster reconciler for vigil
//!
//! Drives the Ready, Discovered and Scanned conditions of each Cluster:
//! resolves credentials, connects, discovers capacity and folds the status
//! of the ClusterScans targeting the cluster into a scan summary.

#![deny(missing_docs)]

pub mod controller;
mod error;
pub mod scan_status;

pub use controller::{
    error_policy, reconcile, scans_for_cluster, ClusterConnector, ClusterKubeClient, Context,
    ContextBuilder, KubeClusterClient, KubeClusterConnector, RequeueIntervals,
};
pub use error::Error;
pub use scan_status::{summarize, ScanState, ScanSummary};
