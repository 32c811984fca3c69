//! ClusterScan controller implementation
//!
//! A pass resolves the target Cluster and its kubeconfig Secret, makes sure
//! plugin pods have a ServiceAccount bound to the shared ClusterRoleBinding,
//! fetches every requested Plugin, then converges one CronJob per plugin and
//! removes CronJobs for plugins no longer requested. Run outcomes are read
//! back from the Jobs those CronJobs spawned.
//!
//! Every write is skipped when the live object already matches, so a pass
//! over an unchanged scan performs no writes and emits no Events.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::CronJob;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use vigil_common::conditions::set_condition;
use vigil_common::crd::{
    Cluster, ClusterScan, ClusterScanStatus, Condition, ConditionStatus, Plugin,
    PluginReference, CONDITION_READY,
};
use vigil_common::events::{
    actions, event_type_for, reasons, EventPublisher, KubeEventPublisher,
};
use vigil_common::KUBECONFIG_SECRET_KEY;
use vigil_credentials::kubeconfig_secret_ref;

use crate::apply::{apply_cron_job, ApplyOutcome};
use crate::client::{KubeScanClient, ScanKubeClient};
use crate::error::ScanError;
use crate::rbac::{ensure_binding_subject, ensure_service_account, service_account_subject};
use crate::runs::update_run_status;
use crate::template::{cron_job_name, scan_selector, JobTemplate, TemplateSettings};

/// Name the controller reports Events under
pub const CONTROLLER_NAME: &str = "vigil-scan-controller";

/// Condition reason: every plugin has a converged CronJob
pub const REASON_PLUGINS_CONFIGURED: &str = "PluginsConfigured";

/// Operator-wide settings for the scan scheduler
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanConfig {
    /// Worker image
    pub worker_image: String,
    /// Image of the custom checks init container
    pub custom_checks_image: String,
    /// ServiceAccount plugin pods run as, created in each scan namespace
    pub service_account: String,
    /// Pre-existing ClusterRoleBinding the ServiceAccounts are added to
    pub cluster_role_binding: String,
    /// Plugins used when a scan requests none
    pub default_plugins: Vec<String>,
    /// Namespace of the default plugins
    pub default_plugin_namespace: String,
    /// ConfigMap holding custom checks
    pub custom_checks_config_map: String,
    /// Delay between passes, bounding how stale run tracking can be
    pub status_sync_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            worker_image: "ghcr.io/vigil-dev/worker:latest".to_string(),
            custom_checks_image: "busybox:1.36".to_string(),
            service_account: "vigil-plugin".to_string(),
            cluster_role_binding: "vigil-plugin".to_string(),
            default_plugins: Vec::new(),
            default_plugin_namespace: "vigil-system".to_string(),
            custom_checks_config_map: "vigil-custom-checks".to_string(),
            status_sync_interval: Duration::from_secs(120),
        }
    }
}

impl ScanConfig {
    fn template_settings(&self) -> TemplateSettings {
        TemplateSettings {
            worker_image: self.worker_image.clone(),
            custom_checks_image: self.custom_checks_image.clone(),
            service_account: self.service_account.clone(),
            custom_checks_config_map: self.custom_checks_config_map.clone(),
        }
    }
}

/// Shared context for the ClusterScan controller
pub struct Context {
    /// Kubernetes operations
    pub kube: Arc<dyn ScanKubeClient>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Scheduler settings
    pub config: ScanConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context from explicit collaborators
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn ScanKubeClient>,
        events: Arc<dyn EventPublisher>,
        config: ScanConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn ScanKubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ScanConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            events: None,
            config: ScanConfig::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn ScanKubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set scheduler settings
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeScanClient::new(self.client.clone()))),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client, CONTROLLER_NAME))),
            config: self.config,
        }
    }
}

/// Plugins a scan runs: its own references, or the configured defaults
pub fn effective_plugins(scan: &ClusterScan, config: &ScanConfig) -> Vec<PluginReference> {
    match &scan.spec.plugins {
        Some(plugins) if !plugins.is_empty() => plugins.clone(),
        _ => config
            .default_plugins
            .iter()
            .map(|name| PluginReference {
                name: name.clone(),
                namespace: Some(config.default_plugin_namespace.clone()),
                env: Vec::new(),
            })
            .collect(),
    }
}

struct Pass<'a> {
    scan: &'a ClusterScan,
    ctx: &'a Context,
    namespace: String,
}

impl Pass<'_> {
    async fn event(&self, reason: &str, action: &str, note: String) {
        self.ctx
            .events
            .publish(
                &self.scan.object_ref(&()),
                EventType::Normal,
                reason,
                action,
                Some(note),
            )
            .await;
    }

    async fn cluster(&self) -> Result<Cluster, ScanError> {
        let name = &self.scan.spec.cluster_ref.name;
        let cluster = self
            .ctx
            .kube
            .get_cluster(&self.namespace, name)
            .await
            .map_err(|e| ScanError::ClusterFetch {
                cluster: name.clone(),
                message: e.to_string(),
            })?
            .ok_or_else(|| ScanError::ClusterFetch {
                cluster: name.clone(),
                message: "not found".to_string(),
            })?;

        if !cluster.is_ready() {
            return Err(ScanError::ClusterNotReady(name.clone()));
        }
        Ok(cluster)
    }

    /// Name of the kubeconfig Secret to mount, None for the local cluster
    async fn kubeconfig_secret(&self, cluster: &Cluster) -> Result<Option<String>, ScanError> {
        let Some(secret_ref) =
            kubeconfig_secret_ref(cluster).map_err(|e| ScanError::Kubeconfig(e.to_string()))?
        else {
            return Ok(None);
        };

        let namespace = secret_ref.namespace_or(&self.namespace);
        if namespace != self.namespace {
            return Err(ScanError::Kubeconfig(format!(
                "secret {}/{} must be in namespace {} to be mounted",
                namespace, secret_ref.name, self.namespace
            )));
        }

        let secret = self
            .ctx
            .kube
            .get_secret(namespace, &secret_ref.name)
            .await
            .map_err(|e| ScanError::Kubeconfig(e.to_string()))?
            .ok_or_else(|| {
                ScanError::Kubeconfig(format!("secret {}/{} not found", namespace, secret_ref.name))
            })?;

        let has_key = secret
            .data
            .as_ref()
            .is_some_and(|d| d.contains_key(KUBECONFIG_SECRET_KEY));
        if !has_key {
            return Err(ScanError::Kubeconfig(format!(
                "secret {}/{} is missing key {}",
                namespace, secret_ref.name, KUBECONFIG_SECRET_KEY
            )));
        }
        Ok(Some(secret_ref.name))
    }

    async fn rbac(&self) -> Result<(), ScanError> {
        let config = &self.ctx.config;
        ensure_service_account(self.ctx.kube.as_ref(), self.scan, &config.service_account)
            .await?;

        let subject = service_account_subject(&self.namespace, &config.service_account);
        if ensure_binding_subject(self.ctx.kube.as_ref(), &config.cluster_role_binding, subject)
            .await?
        {
            self.event(
                reasons::RBAC_BOUND,
                actions::BIND,
                format!(
                    "Added {}/{} to ClusterRoleBinding {}",
                    self.namespace, config.service_account, config.cluster_role_binding
                ),
            )
            .await;
        }
        Ok(())
    }

    /// Fetch every plugin before touching any CronJob
    async fn plugins(
        &self,
        references: Vec<PluginReference>,
    ) -> Result<Vec<(PluginReference, Plugin)>, ScanError> {
        // CronJob names and status entries are keyed by plugin name alone
        let mut seen = BTreeSet::new();
        if let Some(duplicate) = references.iter().find(|r| !seen.insert(r.name.as_str())) {
            return Err(ScanError::PluginFetch {
                plugin: duplicate.name.clone(),
                message: "requested more than once, plugin names must be unique within a scan"
                    .to_string(),
            });
        }

        let mut plugins = Vec::with_capacity(references.len());
        for reference in references {
            let namespace = reference
                .namespace
                .clone()
                .unwrap_or_else(|| self.namespace.clone());
            let qualified = format!("{}/{}", namespace, reference.name);
            let plugin = self
                .ctx
                .kube
                .get_plugin(&namespace, &reference.name)
                .await
                .map_err(|e| ScanError::PluginFetch {
                    plugin: qualified.clone(),
                    message: e.to_string(),
                })?
                .ok_or_else(|| ScanError::PluginFetch {
                    plugin: qualified,
                    message: "not found".to_string(),
                })?;
            plugins.push((reference, plugin));
        }
        Ok(plugins)
    }

    async fn converge(&self, desired: CronJob) -> Result<(), ScanError> {
        let name = desired.name_any();
        let apply_error = |source| ScanError::JobApply {
            name: name.clone(),
            source,
        };

        let Some(mut existing) = self
            .ctx
            .kube
            .get_cron_job(&self.namespace, &name)
            .await
            .map_err(apply_error)?
        else {
            self.ctx
                .kube
                .create_cron_job(&self.namespace, &desired)
                .await
                .map_err(apply_error)?;
            info!(cron_job = %name, "Created plugin CronJob");
            self.event(
                reasons::CRON_JOB_CREATED,
                actions::SCHEDULE,
                format!("Created CronJob {}", name),
            )
            .await;
            return Ok(());
        };

        let outcome = apply_cron_job(&mut existing, &desired);
        let reason = match outcome {
            ApplyOutcome::Unchanged => {
                debug!(cron_job = %name, "CronJob up to date");
                return Ok(());
            }
            ApplyOutcome::Updated => reasons::CRON_JOB_UPDATED,
            ApplyOutcome::Replaced => reasons::CRON_JOB_REPLACED,
        };

        self.ctx
            .kube
            .replace_cron_job(&self.namespace, &name, &existing)
            .await
            .map_err(apply_error)?;
        info!(cron_job = %name, ?outcome, "Updated plugin CronJob");
        self.event(reason, actions::SCHEDULE, format!("Updated CronJob {}", name))
            .await;
        Ok(())
    }

    /// Delete CronJobs this scan controls that are no longer desired
    async fn remove_orphans(&self, desired: &BTreeSet<String>) -> Result<(), ScanError> {
        let selector = scan_selector(&self.scan.name_any());
        let cron_jobs = self
            .ctx
            .kube
            .list_cron_jobs(&self.namespace, &selector)
            .await
            .map_err(|source| ScanError::JobApply {
                name: selector.clone(),
                source,
            })?;

        let uid = self.scan.uid();
        for cron_job in cron_jobs {
            let name = cron_job.name_any();
            let controlled = cron_job
                .owner_references()
                .iter()
                .any(|o| o.controller == Some(true) && Some(&o.uid) == uid.as_ref());
            if !controlled || desired.contains(&name) {
                continue;
            }

            self.ctx
                .kube
                .delete_cron_job(&self.namespace, &name)
                .await
                .map_err(|source| ScanError::JobApply {
                    name: name.clone(),
                    source,
                })?;
            info!(cron_job = %name, "Deleted CronJob of removed plugin");
            self.event(
                reasons::CRON_JOB_DELETED,
                actions::SCHEDULE,
                format!("Deleted CronJob {}", name),
            )
            .await;
        }
        Ok(())
    }

    /// Run every step, filling `status`. Returns the configured plugin names.
    async fn run(&self, status: &mut ClusterScanStatus) -> Result<Vec<String>, ScanError> {
        let cluster = self.cluster().await?;
        status.cluster_namespaced_name = Some(format!(
            "{}/{}",
            self.namespace,
            cluster.name_any()
        ));

        let kubeconfig = self.kubeconfig_secret(&cluster).await?;
        self.rbac().await?;

        let plugins = self
            .plugins(effective_plugins(self.scan, &self.ctx.config))
            .await?;

        let settings = self.ctx.config.template_settings();
        let mut names = Vec::with_capacity(plugins.len());
        let mut cron_jobs = BTreeSet::new();
        for (reference, plugin) in &plugins {
            let desired = JobTemplate {
                scan: self.scan,
                cluster: &cluster,
                plugin,
                reference,
                kubeconfig_secret: kubeconfig.as_deref(),
                settings: &settings,
            }
            .render();
            self.converge(desired).await?;
            names.push(plugin.name_any());
            cron_jobs.insert(cron_job_name(&cluster.name_any(), &plugin.name_any()));
        }
        self.remove_orphans(&cron_jobs).await?;

        let jobs = self
            .ctx
            .kube
            .list_jobs(&self.namespace, &scan_selector(&self.scan.name_any()))
            .await
            .map_err(ScanError::Status)?;
        update_run_status(status, &names, &jobs);

        Ok(names)
    }
}

async fn write_status(
    scan: &ClusterScan,
    ctx: &Context,
    status: &ClusterScanStatus,
    transition: Option<&Condition>,
) -> Result<(), ScanError> {
    if scan.status.as_ref() == Some(status) {
        debug!("status unchanged, skipping write");
        return Ok(());
    }

    ctx.kube
        .patch_status(
            &scan.namespace().unwrap_or_default(),
            &scan.name_any(),
            status,
        )
        .await
        .map_err(ScanError::Status)?;

    if let Some(condition) = transition {
        ctx.events
            .publish(
                &scan.object_ref(&()),
                event_type_for(condition.status),
                &condition.reason,
                actions::RECONCILE,
                Some(condition.message.clone()),
            )
            .await;
    }
    Ok(())
}

/// Reconcile a ClusterScan resource
///
/// A failing step sets Ready=False with the step's reason and returns the
/// error; the runtime's error policy decides when to retry.
#[instrument(skip(scan, ctx), fields(scan = %scan.name_any()))]
pub async fn reconcile(scan: Arc<ClusterScan>, ctx: Arc<Context>) -> Result<Action, ScanError> {
    info!("reconciling cluster scan");

    let pass = Pass {
        scan: &scan,
        ctx: &ctx,
        namespace: scan.namespace().unwrap_or_default(),
    };
    let mut status = scan.status.clone().unwrap_or_default();

    let (condition, result) = match pass.run(&mut status).await {
        Ok(names) => {
            status.plugin_names = Some(names.join(","));
            status.suspend = scan.spec.is_suspended();
            status.observed_generation = scan.metadata.generation;
            let condition = Condition::new(
                CONDITION_READY,
                ConditionStatus::True,
                REASON_PLUGINS_CONFIGURED,
                format!("Scheduled plugins: {}", names.join(", ")),
            );
            (condition, Ok(()))
        }
        Err(e) => {
            warn!(error = %e, reason = e.reason(), "cluster scan not configured");
            let condition = Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                e.reason(),
                e.to_string(),
            );
            (condition, Err(e))
        }
    };

    let change = set_condition(&mut status.conditions, condition.clone());
    let transition = change.emits_event().then_some(&condition);
    write_status(&scan, &ctx, &status, transition).await?;

    result?;
    Ok(Action::requeue(ctx.config.status_sync_interval))
}

/// Error policy for the controller
///
/// Conflicts mean another writer raced this pass, most often on the shared
/// ClusterRoleBinding; retry almost immediately against fresh objects.
pub fn error_policy(scan: Arc<ClusterScan>, error: &ScanError, _ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(scan = %scan.name_any(), "write conflict, retrying");
        return Action::requeue(Duration::from_secs(1));
    }

    error!(
        ?error,
        scan = %scan.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}
