//! Controller runner - builds controller futures for each reconciler
//!
//! Each `build_*` function returns boxed futures the caller drives to
//! completion. Construction stays separate from execution so the watch
//! mappings can be tested without a cluster.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::batch::v1::CronJob;
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{predicates, watcher, Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};

use vigil_common::crd::{Cluster, ClusterScan};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The Cluster a ClusterScan targets, in the scan's namespace
pub fn scan_target(scan: &ClusterScan) -> Option<ObjectRef<Cluster>> {
    let namespace = scan.namespace()?;
    Some(ObjectRef::new(&scan.spec.cluster_ref.name).within(&namespace))
}

/// Build the Cluster controller future
///
/// Only spec changes trigger a pass, so the controller's own status writes
/// do not loop. ClusterScan changes re-trigger the targeted Cluster so its
/// Scanned condition follows scan outcomes.
pub fn build_cluster_controllers(
    client: Client,
    ctx: Arc<vigil_cluster::Context>,
) -> Vec<ControllerFuture> {
    let clusters: Api<Cluster> = Api::all(client.clone());
    let scans: Api<ClusterScan> = Api::all(client);
    let config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    let (reader, writer) = reflector::store();
    let cluster_stream = watcher(clusters, config.clone())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    tracing::info!("- Cluster controller");

    vec![Box::pin(
        Controller::for_stream(cluster_stream, reader)
            .watches(scans, config, |scan| scan_target(&scan))
            .shutdown_on_signal()
            .run(vigil_cluster::reconcile, vigil_cluster::error_policy, ctx)
            .for_each(log_reconcile_result("Cluster")),
    )]
}

/// Build the ClusterScan controller future
///
/// Owned CronJobs re-trigger their scan so run tracking follows schedules.
pub fn build_scan_controllers(
    client: Client,
    ctx: Arc<vigil_scan::Context>,
) -> Vec<ControllerFuture> {
    let scans: Api<ClusterScan> = Api::all(client.clone());
    let cron_jobs: Api<CronJob> = Api::all(client);
    let config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    tracing::info!("- ClusterScan controller");

    vec![Box::pin(
        Controller::new(scans, config.clone())
            .owns(cron_jobs, config)
            .shutdown_on_signal()
            .run(vigil_scan::reconcile, vigil_scan::error_policy, ctx)
            .for_each(log_reconcile_result("ClusterScan")),
    )]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::crd::{ClusterReference, ClusterScanSpec};

    fn scan(namespace: Option<&str>) -> ClusterScan {
        let mut scan = ClusterScan::new(
            "nightly",
            ClusterScanSpec {
                cluster_ref: ClusterReference {
                    name: "prod".to_string(),
                },
                schedule: "0 2 * * *".to_string(),
                suspend: None,
                successful_scans_history_limit: None,
                failed_scans_history_limit: None,
                plugins: None,
            },
        );
        scan.metadata.namespace = namespace.map(str::to_string);
        scan
    }

    #[test]
    fn scan_maps_to_its_cluster_in_the_same_namespace() {
        let target = scan_target(&scan(Some("fleet"))).unwrap();
        assert_eq!(target, ObjectRef::new("prod").within("fleet"));
    }

    #[test]
    fn scan_without_namespace_maps_to_nothing() {
        assert!(scan_target(&scan(None)).is_none());
    }
}
