//! Resource aggregation for nodes and clusters
//!
//! Cluster-wide figures are percentage-of-sum: available and usage are
//! summed across nodes and the percentage is recomputed from the sums. This
//! weights large nodes correctly, unlike an average of per-node percentages.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::debug;
use vigil_common::crd::{NodeInfo, Resources};

use crate::quantity::{format_binary, format_decimal, parse_milli};

/// Resource kinds tracked in Cluster status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// CPU cores
    Cpu,
    /// Memory bytes
    Memory,
}

impl ResourceKind {
    /// Every tracked kind
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Cpu, ResourceKind::Memory];

    /// Key used in Kubernetes resource lists and in status maps
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
        }
    }

    /// Canonical quantity string for a milli-unit value of this kind
    pub fn format(self, milli: i64) -> String {
        match self {
            Self::Cpu => format_decimal(milli),
            Self::Memory => format_binary(milli),
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integer percentage of `available` used, rounded half up.
///
/// Returns 0 when nothing is available.
pub fn usage_percentage(available_milli: i64, usage_milli: i64) -> i32 {
    if available_milli <= 0 {
        return 0;
    }
    let available = i128::from(available_milli);
    let usage = i128::from(usage_milli.max(0));
    let pct = (usage * 200 + available) / (2 * available);
    i32::try_from(pct).unwrap_or(i32::MAX)
}

/// Build the status entry for one resource kind
pub fn compute_usage(kind: ResourceKind, available_milli: i64, usage_milli: i64) -> Resources {
    Resources {
        available: kind.format(available_milli),
        usage: kind.format(usage_milli),
        usage_percentage: usage_percentage(available_milli, usage_milli),
    }
}

/// Per-kind usage of a single node.
///
/// Kinds whose allocatable quantity is missing or unparsable are omitted.
/// Missing or unparsable usage counts as zero.
pub fn node_resources(
    node_name: &str,
    allocatable: &BTreeMap<String, Quantity>,
    usage: &BTreeMap<String, Quantity>,
    kinds: &[ResourceKind],
) -> BTreeMap<String, Resources> {
    let mut out = BTreeMap::new();
    for kind in kinds {
        let Some(available) = allocatable.get(kind.as_str()) else {
            continue;
        };
        let available = match parse_milli(&available.0) {
            Ok(v) => v,
            Err(e) => {
                debug!(node = %node_name, kind = %kind, error = %e, "Skipping unparsable allocatable");
                continue;
            }
        };
        let used = usage
            .get(kind.as_str())
            .map(|q| {
                parse_milli(&q.0).unwrap_or_else(|e| {
                    debug!(node = %node_name, kind = %kind, error = %e, "Treating unparsable usage as zero");
                    0
                })
            })
            .unwrap_or(0);
        out.insert(kind.as_str().to_string(), compute_usage(*kind, available, used));
    }
    out
}

/// Cluster-wide usage per kind, as percentage-of-sum across the nodes
/// reporting that kind. Kinds no node reports are omitted.
pub fn average_across_nodes(
    nodes: &[NodeInfo],
    kinds: &[ResourceKind],
) -> BTreeMap<String, Resources> {
    let mut out = BTreeMap::new();
    for kind in kinds {
        let mut total_available: i64 = 0;
        let mut total_usage: i64 = 0;
        let mut reported = false;

        for node in nodes {
            let Some(res) = node.resources.get(kind.as_str()) else {
                continue;
            };
            let Ok(available) = parse_milli(&res.available) else {
                continue;
            };
            reported = true;
            total_available = total_available.saturating_add(available);
            total_usage = total_usage.saturating_add(parse_milli(&res.usage).unwrap_or(0));
        }

        if reported {
            out.insert(
                kind.as_str().to_string(),
                compute_usage(*kind, total_available, total_usage),
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn node(name: &str, cpu: (&str, &str)) -> NodeInfo {
        let allocatable = BTreeMap::from([("cpu".to_string(), q(cpu.0))]);
        let usage = BTreeMap::from([("cpu".to_string(), q(cpu.1))]);
        NodeInfo {
            name: name.to_string(),
            resources: node_resources(name, &allocatable, &usage, &[ResourceKind::Cpu]),
            ..Default::default()
        }
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(usage_percentage(1000, 250), 25);
        assert_eq!(usage_percentage(3000, 1000), 33);
        assert_eq!(usage_percentage(3000, 2000), 67);
        assert_eq!(usage_percentage(200, 1), 1);
        assert_eq!(usage_percentage(1000, 0), 0);
    }

    #[test]
    fn percentage_is_zero_without_capacity() {
        assert_eq!(usage_percentage(0, 0), 0);
        assert_eq!(usage_percentage(0, 500), 0);
    }

    #[test]
    fn percentage_exact_on_large_memory_values() {
        let available = parse_milli("4Pi").unwrap();
        let usage = available / 2;
        assert_eq!(usage_percentage(available, usage), 50);
    }

    #[test]
    fn compute_usage_formats_per_kind() {
        let cpu = compute_usage(ResourceKind::Cpu, 4000, 1500);
        assert_eq!(cpu.available, "4");
        assert_eq!(cpu.usage, "1500m");
        assert_eq!(cpu.usage_percentage, 38);

        let gib = 1024 * 1024 * 1024 * 1000;
        let memory = compute_usage(ResourceKind::Memory, 8 * gib, 2 * gib);
        assert_eq!(memory.available, "8Gi");
        assert_eq!(memory.usage, "2Gi");
        assert_eq!(memory.usage_percentage, 25);
    }

    #[test]
    fn node_without_metrics_has_zero_usage() {
        let allocatable = BTreeMap::from([
            ("cpu".to_string(), q("2")),
            ("memory".to_string(), q("4Gi")),
        ]);
        let res = node_resources("n1", &allocatable, &BTreeMap::new(), &ResourceKind::ALL);
        assert_eq!(res["cpu"].usage, "0");
        assert_eq!(res["memory"].usage_percentage, 0);
    }

    #[test]
    fn unparsable_allocatable_skips_kind() {
        let allocatable = BTreeMap::from([
            ("cpu".to_string(), q("lots")),
            ("memory".to_string(), q("4Gi")),
        ]);
        let res = node_resources("n1", &allocatable, &BTreeMap::new(), &ResourceKind::ALL);
        assert!(!res.contains_key("cpu"));
        assert!(res.contains_key("memory"));
    }

    #[test]
    fn cluster_percentage_is_percentage_of_sum() {
        // small node fully used, large node idle
        let nodes = vec![node("small", ("1", "1")), node("large", ("9", "0"))];

        let cluster = average_across_nodes(&nodes, &[ResourceKind::Cpu]);
        let cpu = &cluster["cpu"];
        assert_eq!(cpu.available, "10");
        assert_eq!(cpu.usage, "1");
        assert_eq!(cpu.usage_percentage, 10);

        let mean_of_percentages = nodes
            .iter()
            .map(|n| n.resources["cpu"].usage_percentage)
            .sum::<i32>()
            / nodes.len() as i32;
        assert_eq!(mean_of_percentages, 50);
        assert_ne!(cpu.usage_percentage, mean_of_percentages);
    }

    #[test]
    fn kinds_without_reports_are_omitted() {
        let nodes = vec![node("a", ("2", "500m"))];
        let cluster = average_across_nodes(&nodes, &ResourceKind::ALL);
        assert!(cluster.contains_key("cpu"));
        assert!(!cluster.contains_key("memory"));
        assert!(average_across_nodes(&[], &ResourceKind::ALL).is_empty());
    }
}
