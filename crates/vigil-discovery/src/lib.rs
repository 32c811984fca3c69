//! Cluster discovery for vigil
//!
//! Queries a member cluster for its version, nodes and node metrics and
//! folds them into a [`ClusterSnapshot`]. The arithmetic lives in
//! [`quantity`] and [`resources`]; label heuristics live in [`provider`].

#![deny(missing_docs)]

mod discoverer;
mod error;
pub mod provider;
pub mod resources;

pub use vigil_common::quantity;

pub use discoverer::{
    discover, snapshot, version, ClusterApi, ClusterSnapshot, KubeClusterApi, NodeMetrics,
};
pub use error::DiscoveryError;
