//! Operator configuration
//!
//! Every setting is a flag with a `VIGIL_*` environment fallback, so the
//! same binary runs from a Deployment manifest or a shell.

use std::time::Duration;

use clap::Args;
use vigil_cluster::RequeueIntervals;
use vigil_common::telemetry::LogFormat;
use vigil_scan::ScanConfig;

/// Settings shared by both controllers
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Image of the worker container added to every scan pod
    #[arg(long, env = "VIGIL_WORKER_IMAGE", default_value = "ghcr.io/vigil-dev/worker:latest")]
    pub worker_image: String,

    /// Image of the init container that loads custom checks
    #[arg(long, env = "VIGIL_CUSTOM_CHECKS_IMAGE", default_value = "busybox:1.36")]
    pub custom_checks_image: String,

    /// ServiceAccount plugin pods run as
    #[arg(long, env = "VIGIL_PLUGIN_SERVICE_ACCOUNT", default_value = "vigil-plugin")]
    pub plugin_service_account: String,

    /// Pre-existing ClusterRoleBinding plugin ServiceAccounts are added to
    #[arg(long, env = "VIGIL_PLUGIN_CLUSTER_ROLE_BINDING", default_value = "vigil-plugin")]
    pub plugin_cluster_role_binding: String,

    /// Plugins run by ClusterScans that request none (comma separated)
    #[arg(long, env = "VIGIL_DEFAULT_PLUGINS", value_delimiter = ',')]
    pub default_plugins: Vec<String>,

    /// Namespace of the default plugins
    #[arg(long, env = "VIGIL_DEFAULT_PLUGIN_NAMESPACE", default_value = "vigil-system")]
    pub default_plugin_namespace: String,

    /// ConfigMap holding custom checks
    #[arg(long, env = "VIGIL_CUSTOM_CHECKS_CONFIGMAP", default_value = "vigil-custom-checks")]
    pub custom_checks_config_map: String,

    /// Seconds between Cluster reconciliations
    #[arg(long, env = "VIGIL_CLUSTER_REQUEUE_SECS", default_value_t = 300)]
    pub cluster_requeue_secs: u64,

    /// Seconds until the next pass after minting a cloud token
    #[arg(long, env = "VIGIL_TOKEN_REFRESH_SECS", default_value_t = 600)]
    pub token_refresh_secs: u64,

    /// Seconds between checks while a cloud cluster is not ready
    #[arg(long, env = "VIGIL_CLOUD_NOT_READY_SECS", default_value_t = 60)]
    pub cloud_not_ready_secs: u64,

    /// Seconds between ClusterScan status syncs
    #[arg(long, env = "VIGIL_SCAN_SYNC_SECS", default_value_t = 120)]
    pub scan_sync_secs: u64,

    /// Log format: json or text
    #[arg(long, env = "VIGIL_LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Install or update the CRDs on startup
    #[arg(long, env = "VIGIL_INSTALL_CRDS")]
    pub install_crds: bool,
}

impl OperatorConfig {
    /// Requeue intervals for the Cluster controller
    pub fn intervals(&self) -> RequeueIntervals {
        RequeueIntervals {
            cluster: Duration::from_secs(self.cluster_requeue_secs),
            token_refresh: Duration::from_secs(self.token_refresh_secs),
            cloud_not_ready: Duration::from_secs(self.cloud_not_ready_secs),
        }
    }

    /// Settings for the ClusterScan controller
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            worker_image: self.worker_image.clone(),
            custom_checks_image: self.custom_checks_image.clone(),
            service_account: self.plugin_service_account.clone(),
            cluster_role_binding: self.plugin_cluster_role_binding.clone(),
            default_plugins: self
                .default_plugins
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            default_plugin_namespace: self.default_plugin_namespace.clone(),
            custom_checks_config_map: self.custom_checks_config_map.clone(),
            status_sync_interval: Duration::from_secs(self.scan_sync_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    fn parse(args: &[&str]) -> OperatorConfig {
        let argv = std::iter::once("vigil").chain(args.iter().copied());
        TestCli::parse_from(argv).config
    }

    #[test]
    fn defaults_match_controller_defaults() {
        let config = parse(&[]);
        assert_eq!(config.intervals(), RequeueIntervals::default());

        let scan = config.scan_config();
        assert_eq!(scan.status_sync_interval, Duration::from_secs(120));
        assert_eq!(scan.service_account, "vigil-plugin");
        assert!(scan.default_plugins.is_empty());
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.install_crds);
    }

    #[test]
    fn default_plugins_split_on_commas() {
        let config = parse(&["--default-plugins", "popeye, trivy,,kube-bench"]);
        assert_eq!(
            config.scan_config().default_plugins,
            vec!["popeye", "trivy", "kube-bench"]
        );
    }

    #[test]
    fn intervals_and_log_format_are_configurable() {
        let config = parse(&[
            "--cluster-requeue-secs",
            "30",
            "--cloud-not-ready-secs",
            "5",
            "--log-format",
            "text",
        ]);
        assert_eq!(config.intervals().cluster, Duration::from_secs(30));
        assert_eq!(config.intervals().cloud_not_ready, Duration::from_secs(5));
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[rstest]
    #[case::flag(&["--install-crds"], true)]
    #[case::absent(&[], false)]
    fn install_crds_is_opt_in(#[case] args: &[&str], #[case] expected: bool) {
        assert_eq!(parse(args).install_crds, expected);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let argv = ["vigil", "--log-format", "xml"];
        assert!(TestCli::try_parse_from(argv).is_err());
    }
}
