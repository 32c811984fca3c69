//! CronJob templating
//!
//! One CronJob per (cluster, plugin). The pod runs up to three containers
//! sharing a results volume:
//!
//! - `checks-loader` (init, only with custom checks) copies the check files
//!   from a ConfigMap into an emptyDir the plugin reads;
//! - `plugin` runs the Plugin image and writes its findings plus a done or
//!   error marker file into the results directory;
//! - `worker` waits for a marker file and reports the results.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    KeyToPath, ObjectFieldSelector, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use vigil_common::crd::{Cluster, ClusterScan, Plugin, PluginReference};
use vigil_common::kube_utils::{bounded_name, managed_labels};
use vigil_common::{CLUSTER_LABEL, CLUSTER_SCAN_LABEL, KUBECONFIG_SECRET_KEY, PLUGIN_LABEL};

/// Longest CronJob name; the controller appends an 11 character suffix to Job names
pub const MAX_CRON_JOB_NAME: usize = 52;

/// Worker container name
pub const WORKER_CONTAINER: &str = "worker";
/// Plugin container name
pub const PLUGIN_CONTAINER: &str = "plugin";
/// Custom checks init container name
pub const CHECKS_LOADER_CONTAINER: &str = "checks-loader";

const RESULTS_VOLUME: &str = "results";
const KUBECONFIG_VOLUME: &str = "kubeconfig";
const CHECKS_SOURCE_VOLUME: &str = "custom-checks-source";
const CHECKS_VOLUME: &str = "custom-checks";

/// Directory shared by all containers for findings and marker files
pub const RESULTS_DIR: &str = "/tmp/vigil/results";
/// Marker written by the plugin on success
pub const DONE_FILE: &str = "/tmp/vigil/results/done";
/// Marker written by the plugin on failure
pub const ERROR_FILE: &str = "/tmp/vigil/results/error";
/// Directory holding the mounted kubeconfig
pub const KUBECONFIG_DIR: &str = "/etc/vigil/kubeconfig";
/// Path of the kubeconfig file inside [`KUBECONFIG_DIR`]
pub const KUBECONFIG_PATH: &str = "/etc/vigil/kubeconfig/config";
/// Directory the plugin reads custom checks from
pub const CUSTOM_CHECKS_DIR: &str = "/etc/vigil/checks";
const CHECKS_SOURCE_DIR: &str = "/etc/vigil/checks-source";

/// File mode for projected Secret and ConfigMap files (0644)
const DEFAULT_MODE: i32 = 420;

/// Operator-wide inputs to every CronJob
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateSettings {
    /// Worker image
    pub worker_image: String,
    /// Image of the custom checks init container
    pub custom_checks_image: String,
    /// ServiceAccount the pods run as
    pub service_account: String,
    /// ConfigMap holding custom checks
    pub custom_checks_config_map: String,
}

/// Everything needed to render one plugin's CronJob
pub struct JobTemplate<'a> {
    /// Owning scan
    pub scan: &'a ClusterScan,
    /// Target cluster
    pub cluster: &'a Cluster,
    /// Plugin definition
    pub plugin: &'a Plugin,
    /// The scan's reference to the plugin, carrying extra env
    pub reference: &'a PluginReference,
    /// Kubeconfig Secret in the scan's namespace; None scans the local cluster
    pub kubeconfig_secret: Option<&'a str>,
    /// Operator-wide settings
    pub settings: &'a TemplateSettings,
}

/// Deterministic CronJob name for a (cluster, plugin) pair
pub fn cron_job_name(cluster: &str, plugin: &str) -> String {
    bounded_name(&format!("{}-{}", cluster, plugin), MAX_CRON_JOB_NAME)
}

/// Labels identifying the CronJob, its Jobs and their pods
pub fn job_labels(scan: &str, cluster: &str, plugin: &str) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.insert(CLUSTER_SCAN_LABEL.to_string(), scan.to_string());
    labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
    labels.insert(PLUGIN_LABEL.to_string(), plugin.to_string());
    labels
}

/// Label selector for everything belonging to `scan`
pub fn scan_selector(scan: &str) -> String {
    format!("{}={}", CLUSTER_SCAN_LABEL, scan)
}

fn literal(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}

fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: path.to_string(),
            }),
            ..Default::default()
        }),
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn common_env() -> Vec<EnvVar> {
    vec![
        literal("RESULTS_DIR", RESULTS_DIR),
        literal("DONE_FILE", DONE_FILE),
        literal("ERROR_FILE", ERROR_FILE),
    ]
}

impl JobTemplate<'_> {
    fn custom_checks(&self) -> bool {
        self.plugin.spec.mount_custom_checks
    }

    fn worker(&self) -> Container {
        let mut env = common_env();
        env.extend([
            literal("VIGIL_CLUSTER_NAME", self.cluster.name_any()),
            literal("VIGIL_CLUSTER_UID", self.cluster.uid().unwrap_or_default()),
            literal("VIGIL_CLUSTER_SCAN", self.scan.name_any()),
            literal("VIGIL_PLUGIN_NAME", self.plugin.name_any()),
            literal("VIGIL_PLUGIN_TYPE", self.plugin.spec.plugin_type.to_string()),
            field_ref("POD_NAMESPACE", "metadata.namespace"),
            field_ref("POD_NAME", "metadata.name"),
            field_ref("POD_UID", "metadata.uid"),
            field_ref(
                "JOB_NAME",
                "metadata.labels['batch.kubernetes.io/job-name']",
            ),
            field_ref(
                "JOB_UID",
                "metadata.labels['batch.kubernetes.io/controller-uid']",
            ),
        ]);

        Container {
            name: WORKER_CONTAINER.to_string(),
            image: Some(self.settings.worker_image.clone()),
            env: Some(env),
            volume_mounts: Some(vec![mount(RESULTS_VOLUME, RESULTS_DIR, false)]),
            ..Default::default()
        }
    }

    fn plugin(&self) -> Container {
        let spec = &self.plugin.spec;
        let mut env = common_env();
        let mut mounts = vec![mount(RESULTS_VOLUME, RESULTS_DIR, false)];

        if self.kubeconfig_secret.is_some() {
            env.push(literal("KUBECONFIG", KUBECONFIG_PATH));
            mounts.push(mount(KUBECONFIG_VOLUME, KUBECONFIG_DIR, true));
        }
        if self.custom_checks() {
            env.push(literal("CUSTOM_CHECKS_DIR", CUSTOM_CHECKS_DIR));
            mounts.push(mount(CHECKS_VOLUME, CUSTOM_CHECKS_DIR, true));
        }
        env.extend(spec.env.iter().map(EnvVar::from));
        env.extend(self.reference.env.iter().map(EnvVar::from));

        Container {
            name: PLUGIN_CONTAINER.to_string(),
            image: Some(spec.image.clone()),
            command: (!spec.command.is_empty()).then(|| spec.command.clone()),
            args: (!spec.args.is_empty()).then(|| spec.args.clone()),
            env: Some(env),
            resources: spec.resources.as_ref().map(Into::into),
            security_context: spec.security_context.as_ref().map(Into::into),
            image_pull_policy: spec.image_pull_policy.clone(),
            volume_mounts: Some(mounts),
            ..Default::default()
        }
    }

    fn checks_loader(&self) -> Container {
        let mut env = common_env();
        env.push(literal("CUSTOM_CHECKS_DIR", CUSTOM_CHECKS_DIR));

        Container {
            name: CHECKS_LOADER_CONTAINER.to_string(),
            image: Some(self.settings.custom_checks_image.clone()),
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cp -rL {}/. {}/", CHECKS_SOURCE_DIR, CUSTOM_CHECKS_DIR),
            ]),
            env: Some(env),
            volume_mounts: Some(vec![
                mount(RESULTS_VOLUME, RESULTS_DIR, false),
                mount(CHECKS_SOURCE_VOLUME, CHECKS_SOURCE_DIR, true),
                mount(CHECKS_VOLUME, CUSTOM_CHECKS_DIR, false),
            ]),
            ..Default::default()
        }
    }

    fn volumes(&self) -> Vec<Volume> {
        let mut volumes = vec![empty_dir(RESULTS_VOLUME)];

        if let Some(secret) = self.kubeconfig_secret {
            volumes.push(Volume {
                name: KUBECONFIG_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret.to_string()),
                    items: Some(vec![KeyToPath {
                        key: KUBECONFIG_SECRET_KEY.to_string(),
                        path: "config".to_string(),
                        mode: None,
                    }]),
                    default_mode: Some(DEFAULT_MODE),
                    optional: None,
                }),
                ..Default::default()
            });
        }

        if self.custom_checks() {
            volumes.push(Volume {
                name: CHECKS_SOURCE_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: self.settings.custom_checks_config_map.clone(),
                    default_mode: Some(DEFAULT_MODE),
                    ..Default::default()
                }),
                ..Default::default()
            });
            volumes.push(empty_dir(CHECKS_VOLUME));
        }

        volumes
    }

    /// Render the desired CronJob
    pub fn render(&self) -> CronJob {
        let cluster = self.cluster.name_any();
        let plugin = self.plugin.name_any();
        let labels = job_labels(&self.scan.name_any(), &cluster, &plugin);
        let scan_spec = &self.scan.spec;

        let init_containers = self.custom_checks().then(|| vec![self.checks_loader()]);

        let pod = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                service_account_name: Some(self.settings.service_account.clone()),
                init_containers,
                containers: vec![self.worker(), self.plugin()],
                volumes: Some(self.volumes()),
                ..Default::default()
            }),
        };

        CronJob {
            metadata: ObjectMeta {
                name: Some(cron_job_name(&cluster, &plugin)),
                namespace: self.scan.namespace(),
                labels: Some(labels.clone()),
                owner_references: self.scan.controller_owner_ref(&()).map(|o| vec![o]),
                ..Default::default()
            },
            spec: Some(CronJobSpec {
                schedule: scan_spec.schedule.clone(),
                concurrency_policy: Some("Forbid".to_string()),
                suspend: Some(scan_spec.is_suspended()),
                successful_jobs_history_limit: scan_spec.successful_scans_history_limit,
                failed_jobs_history_limit: scan_spec.failed_scans_history_limit,
                job_template: JobTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(JobSpec {
                        backoff_limit: Some(0),
                        template: pod,
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use vigil_common::crd::{
        ClusterReference, ClusterScanSpec, ClusterSpec, EnvVar as PluginEnv, PluginSpec,
        PluginType,
    };

    pub(crate) fn settings() -> TemplateSettings {
        TemplateSettings {
            worker_image: "ghcr.io/vigil/worker:v1".to_string(),
            custom_checks_image: "busybox:1.36".to_string(),
            service_account: "vigil-plugin".to_string(),
            custom_checks_config_map: "vigil-custom-checks".to_string(),
        }
    }

    pub(crate) fn scan(plugins: Option<Vec<PluginReference>>) -> ClusterScan {
        let mut scan = ClusterScan::new(
            "nightly",
            ClusterScanSpec {
                cluster_ref: ClusterReference {
                    name: "prod".to_string(),
                },
                schedule: "0 2 * * *".to_string(),
                suspend: None,
                successful_scans_history_limit: Some(3),
                failed_scans_history_limit: Some(1),
                plugins,
            },
        );
        scan.metadata.namespace = Some("fleet".to_string());
        scan.metadata.uid = Some("uid-nightly".to_string());
        scan.metadata.generation = Some(1);
        scan
    }

    pub(crate) fn cluster() -> Cluster {
        let mut cluster = Cluster::new("prod", ClusterSpec::default());
        cluster.metadata.namespace = Some("fleet".to_string());
        cluster.metadata.uid = Some("uid-prod".to_string());
        cluster
    }

    pub(crate) fn plugin(name: &str, custom_checks: bool) -> Plugin {
        let mut plugin = Plugin::new(
            name,
            PluginSpec {
                image: format!("ghcr.io/vigil/{}:v1", name),
                plugin_type: PluginType::Misconfiguration,
                args: vec!["--out".to_string(), RESULTS_DIR.to_string()],
                env: vec![PluginEnv::new("LOG_LEVEL", "info")],
                mount_custom_checks: custom_checks,
                ..Default::default()
            },
        );
        plugin.metadata.namespace = Some("fleet".to_string());
        plugin
    }

    fn render(plugin: &Plugin, kubeconfig: Option<&str>) -> CronJob {
        let scan = scan(None);
        let cluster = cluster();
        let settings = settings();
        let reference = PluginReference {
            name: plugin.name_any(),
            namespace: None,
            env: vec![PluginEnv::new("EXTRA", "1")],
        };
        JobTemplate {
            scan: &scan,
            cluster: &cluster,
            plugin,
            reference: &reference,
            kubeconfig_secret: kubeconfig,
            settings: &settings,
        }
        .render()
    }

    fn pod(cron_job: &CronJob) -> &PodSpec {
        cron_job
            .spec
            .as_ref()
            .and_then(|s| s.job_template.spec.as_ref())
            .and_then(|j| j.template.spec.as_ref())
            .expect("pod spec")
    }

    fn container<'a>(pod: &'a PodSpec, name: &str) -> &'a Container {
        pod.containers
            .iter()
            .find(|c| c.name == name)
            .expect("container")
    }

    fn env_names(container: &Container) -> Vec<&str> {
        container
            .env
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|e| e.name.as_str())
            .collect()
    }

    mod naming {
        use super::*;

        #[test]
        fn short_names_are_cluster_dash_plugin() {
            assert_eq!(cron_job_name("prod", "popeye"), "prod-popeye");
        }

        #[test]
        fn long_names_are_bounded_and_distinct() {
            let a = cron_job_name(&"c".repeat(40), "plugin-alpha");
            let b = cron_job_name(&"c".repeat(40), "plugin-bravo");
            assert!(a.len() <= MAX_CRON_JOB_NAME);
            assert!(b.len() <= MAX_CRON_JOB_NAME);
            assert_ne!(a, b);
        }
    }

    mod remote_cluster {
        use super::*;

        #[test]
        fn cron_job_carries_schedule_policy_and_owner() {
            let cj = render(&plugin("popeye", false), Some("prod-kubeconfig"));
            let spec = cj.spec.as_ref().unwrap();

            assert_eq!(cj.metadata.name.as_deref(), Some("prod-popeye"));
            assert_eq!(spec.schedule, "0 2 * * *");
            assert_eq!(spec.concurrency_policy.as_deref(), Some("Forbid"));
            assert_eq!(spec.suspend, Some(false));
            assert_eq!(spec.successful_jobs_history_limit, Some(3));
            assert_eq!(spec.failed_jobs_history_limit, Some(1));

            let owner = &cj.metadata.owner_references.as_ref().unwrap()[0];
            assert_eq!(owner.uid, "uid-nightly");
            assert_eq!(owner.controller, Some(true));

            let labels = cj.metadata.labels.as_ref().unwrap();
            assert_eq!(labels.get(CLUSTER_SCAN_LABEL).map(String::as_str), Some("nightly"));
            assert_eq!(labels.get(PLUGIN_LABEL).map(String::as_str), Some("popeye"));
        }

        #[test]
        fn plugin_gets_kubeconfig_and_both_containers_share_results() {
            let cj = render(&plugin("popeye", false), Some("prod-kubeconfig"));
            let pod = pod(&cj);

            assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
            assert_eq!(pod.service_account_name.as_deref(), Some("vigil-plugin"));
            assert!(pod.init_containers.is_none());

            let plugin = container(pod, PLUGIN_CONTAINER);
            let names = env_names(plugin);
            assert!(names.contains(&"KUBECONFIG"));
            assert!(!names.contains(&"CUSTOM_CHECKS_DIR"));
            assert_eq!(names.last(), Some(&"EXTRA"));

            for c in &pod.containers {
                let names = env_names(c);
                for common in ["RESULTS_DIR", "DONE_FILE", "ERROR_FILE"] {
                    assert!(names.contains(&common), "{} missing {}", c.name, common);
                }
            }

            let volume = pod
                .volumes
                .as_ref()
                .unwrap()
                .iter()
                .find(|v| v.name == KUBECONFIG_VOLUME)
                .unwrap();
            let secret = volume.secret.as_ref().unwrap();
            assert_eq!(secret.secret_name.as_deref(), Some("prod-kubeconfig"));
            assert_eq!(secret.items.as_ref().unwrap()[0].key, KUBECONFIG_SECRET_KEY);
        }

        #[test]
        fn worker_identifies_cluster_plugin_and_job() {
            let cj = render(&plugin("trivy", false), Some("prod-kubeconfig"));
            let worker = container(pod(&cj), WORKER_CONTAINER);

            assert_eq!(worker.image.as_deref(), Some("ghcr.io/vigil/worker:v1"));
            let env = worker.env.as_ref().unwrap();
            let value = |name: &str| {
                env.iter()
                    .find(|e| e.name == name)
                    .and_then(|e| e.value.clone())
            };
            assert_eq!(value("VIGIL_CLUSTER_NAME").as_deref(), Some("prod"));
            assert_eq!(value("VIGIL_CLUSTER_UID").as_deref(), Some("uid-prod"));
            assert_eq!(value("VIGIL_PLUGIN_TYPE").as_deref(), Some("misconfiguration"));

            let job_uid = env.iter().find(|e| e.name == "JOB_UID").unwrap();
            let field = job_uid
                .value_from
                .as_ref()
                .and_then(|v| v.field_ref.as_ref())
                .unwrap();
            assert_eq!(field.api_version.as_deref(), Some("v1"));
            assert!(field.field_path.contains("controller-uid"));
        }
    }

    mod local_cluster {
        use super::*;

        #[test]
        fn no_kubeconfig_volume_or_variable() {
            let cj = render(&plugin("popeye", false), None);
            let pod = pod(&cj);

            assert!(!env_names(container(pod, PLUGIN_CONTAINER)).contains(&"KUBECONFIG"));
            let volumes: Vec<_> = pod
                .volumes
                .as_ref()
                .unwrap()
                .iter()
                .map(|v| v.name.as_str())
                .collect();
            assert_eq!(volumes, vec![RESULTS_VOLUME]);
        }
    }

    mod custom_checks {
        use super::*;

        #[test]
        fn init_container_fills_a_shared_read_only_volume() {
            let cj = render(&plugin("popeye", true), None);
            let pod = pod(&cj);

            let init = &pod.init_containers.as_ref().unwrap()[0];
            assert_eq!(init.name, CHECKS_LOADER_CONTAINER);
            assert_eq!(init.image.as_deref(), Some("busybox:1.36"));

            let plugin = container(pod, PLUGIN_CONTAINER);
            assert!(env_names(plugin).contains(&"CUSTOM_CHECKS_DIR"));
            let checks_mount = plugin
                .volume_mounts
                .as_ref()
                .unwrap()
                .iter()
                .find(|m| m.name == CHECKS_VOLUME)
                .unwrap();
            assert_eq!(checks_mount.read_only, Some(true));

            let source = pod
                .volumes
                .as_ref()
                .unwrap()
                .iter()
                .find(|v| v.name == CHECKS_SOURCE_VOLUME)
                .and_then(|v| v.config_map.as_ref())
                .unwrap();
            assert_eq!(source.name, "vigil-custom-checks");
        }
    }
}
