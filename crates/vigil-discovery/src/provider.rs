//! Cloud provider and region inference from node labels

use std::collections::{BTreeMap, BTreeSet};

/// Well-known region label
pub const REGION_LABEL: &str = "topology.kubernetes.io/region";

/// Deprecated region label still set by older node images
pub const LEGACY_REGION_LABEL: &str = "failure-domain.beta.kubernetes.io/region";

/// Label-key prefixes identifying managed offerings, in priority order.
///
/// Append to extend; the first prefix matched on any node wins.
pub const PROVIDER_LABEL_PREFIXES: &[(&str, &str)] = &[
    ("eks.amazonaws.com/", "aws"),
    ("cloud.google.com/gke-", "gcp"),
    ("kubernetes.azure.com/", "azure"),
    ("doks.digitalocean.com/", "digitalocean"),
    ("lke.linode.com/", "linode"),
    ("oci.oraclecloud.com/", "oci"),
];

/// Provider tag for the first table entry matched by any node label key
pub fn infer_provider<'a, I>(label_sets: I) -> Option<String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    let label_sets: Vec<_> = label_sets.into_iter().collect();
    PROVIDER_LABEL_PREFIXES
        .iter()
        .find(|(prefix, _)| {
            label_sets
                .iter()
                .any(|labels| labels.keys().any(|k| k.starts_with(prefix)))
        })
        .map(|(_, provider)| provider.to_string())
}

/// The region shared by every labeled node.
///
/// Returns `None` when no node carries a region label or when labeled nodes
/// disagree; a multi-region cluster has no single region.
pub fn infer_region<'a, I>(label_sets: I) -> Option<String>
where
    I: IntoIterator<Item = &'a BTreeMap<String, String>>,
{
    let regions: BTreeSet<&str> = label_sets
        .into_iter()
        .filter_map(|labels| {
            labels
                .get(REGION_LABEL)
                .or_else(|| labels.get(LEGACY_REGION_LABEL))
        })
        .map(String::as_str)
        .filter(|r| !r.is_empty())
        .collect();

    match regions.len() {
        1 => regions.into_iter().next().map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    mod provider {
        use super::*;

        #[test]
        fn eks_label_is_aws() {
            let nodes = [labels(&[("eks.amazonaws.com/nodegroup", "workers")])];
            assert_eq!(infer_provider(&nodes).as_deref(), Some("aws"));
        }

        #[test]
        fn gke_label_is_gcp() {
            let nodes = [labels(&[("cloud.google.com/gke-nodepool", "default-pool")])];
            assert_eq!(infer_provider(&nodes).as_deref(), Some("gcp"));
        }

        #[test]
        fn unrecognized_labels_yield_none() {
            let nodes = [labels(&[("kubernetes.io/hostname", "kind-control-plane")])];
            assert_eq!(infer_provider(&nodes), None);
            assert_eq!(infer_provider(std::iter::empty()), None);
        }

        #[test]
        fn result_is_independent_of_label_and_node_order() {
            let a = labels(&[
                ("zzz/other", "x"),
                ("eks.amazonaws.com/capacityType", "ON_DEMAND"),
            ]);
            let b = labels(&[("kubernetes.io/os", "linux")]);
            assert_eq!(infer_provider([&a, &b]).as_deref(), Some("aws"));
            assert_eq!(infer_provider([&b, &a]).as_deref(), Some("aws"));
        }

        #[test]
        fn table_priority_breaks_ties() {
            let gke = labels(&[("cloud.google.com/gke-os-distribution", "cos")]);
            let eks = labels(&[("eks.amazonaws.com/nodegroup", "ng")]);
            assert_eq!(infer_provider([&gke, &eks]).as_deref(), Some("aws"));
        }
    }

    mod region {
        use super::*;

        #[test]
        fn common_region_is_returned() {
            let nodes = [
                labels(&[(REGION_LABEL, "us-east-1")]),
                labels(&[(REGION_LABEL, "us-east-1")]),
                labels(&[]),
            ];
            assert_eq!(infer_region(&nodes).as_deref(), Some("us-east-1"));
        }

        #[test]
        fn conflicting_regions_are_unknown() {
            let nodes = [
                labels(&[(REGION_LABEL, "us-east-1")]),
                labels(&[(REGION_LABEL, "eu-west-1")]),
            ];
            assert_eq!(infer_region(&nodes), None);
        }

        #[test]
        fn missing_label_is_unknown() {
            let nodes = [labels(&[("kubernetes.io/os", "linux")])];
            assert_eq!(infer_region(&nodes), None);
        }

        #[test]
        fn empty_values_are_ignored() {
            let nodes = [
                labels(&[(REGION_LABEL, "")]),
                labels(&[(REGION_LABEL, "westeurope")]),
            ];
            assert_eq!(infer_region(&nodes).as_deref(), Some("westeurope"));
        }

        #[test]
        fn legacy_label_is_honoured() {
            let nodes = [labels(&[(LEGACY_REGION_LABEL, "us-central1")])];
            assert_eq!(infer_region(&nodes).as_deref(), Some("us-central1"));
        }
    }
}
