//! Cluster controller implementation
//!
//! Each pass walks the same sequence from the top: resolve credentials,
//! connect and read the server version (Ready), list nodes and metrics
//! (Discovered), then summarize the ClusterScans targeting the cluster
//! (Scanned). A failing step records its condition and stops the pass; the
//! conditions of later steps keep their previous values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use kube::api::{Api, ListParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use vigil_common::conditions::set_condition;
use vigil_common::crd::{
    Cluster, ClusterScan, ClusterStatus, Condition, ConditionStatus, CONDITION_DISCOVERED,
    CONDITION_READY,
};
use vigil_common::events::{actions, event_type_for, EventPublisher, KubeEventPublisher};
use vigil_common::kube_utils::{
    client_from_kubeconfig, patch_resource_status, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT,
};
use vigil_credentials::eks::HttpEksApi;
use vigil_credentials::secrets::KubeSecretStore;
use vigil_credentials::{CredentialResolver, Credentials, Resolution};
use vigil_discovery::{ClusterApi, KubeClusterApi};

use crate::error::Error;
use crate::scan_status::summarize;

/// Name the controller reports Events under
pub const CONTROLLER_NAME: &str = "vigil-cluster-controller";

/// Condition reason: the API server answered
pub const REASON_CONNECTED: &str = "ClusterConnected";
/// Condition reason: a client could not be built from the credentials
pub const REASON_NOT_CONNECTED: &str = "ClusterNotConnected";
/// Condition reason: nodes and metrics were collected
pub const REASON_DISCOVERED: &str = "ClusterDiscovered";

/// Kubernetes API operations on Cluster and ClusterScan objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterKubeClient: Send + Sync {
    /// Replace the status of a Cluster
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ClusterStatus,
    ) -> Result<(), vigil_common::Error>;

    /// List ClusterScans in a namespace
    async fn list_cluster_scans(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterScan>, vigil_common::Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterKubeClient for KubeClusterClient {
    async fn patch_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ClusterStatus,
    ) -> Result<(), vigil_common::Error> {
        patch_resource_status::<Cluster>(&self.client, name, namespace, status).await?;
        Ok(())
    }

    async fn list_cluster_scans(
        &self,
        namespace: &str,
    ) -> Result<Vec<ClusterScan>, vigil_common::Error> {
        let api: Api<ClusterScan> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

/// Builds a [`ClusterApi`] for a member cluster from resolved credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Connect using `credentials`
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ClusterApi>, vigil_common::Error>;
}

/// Connector using the controller's own client for ambient credentials and
/// a fresh client per kubeconfig otherwise
pub struct KubeClusterConnector {
    ambient: Client,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl KubeClusterConnector {
    /// Create a connector with default timeouts
    pub fn new(ambient: Client) -> Self {
        Self {
            ambient,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

#[async_trait]
impl ClusterConnector for KubeClusterConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
    ) -> Result<Arc<dyn ClusterApi>, vigil_common::Error> {
        let client = match credentials {
            Credentials::Ambient => self.ambient.clone(),
            Credentials::Kubeconfig { document, .. } => {
                client_from_kubeconfig(document, self.connect_timeout, self.read_timeout).await?
            }
        };
        Ok(Arc::new(KubeClusterApi::new(client)))
    }
}

/// Requeue intervals for successful and not-ready passes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequeueIntervals {
    /// After a successful pass
    pub cluster: Duration,
    /// After a pass that minted a short-lived token; must beat its expiry
    pub token_refresh: Duration,
    /// While the cloud provider reports the cluster is not serving
    pub cloud_not_ready: Duration,
}

impl Default for RequeueIntervals {
    fn default() -> Self {
        Self {
            cluster: Duration::from_secs(300),
            token_refresh: Duration::from_secs(600),
            cloud_not_ready: Duration::from_secs(60),
        }
    }
}

/// Shared context for the Cluster controller
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .intervals(intervals)
///     .build()?;
/// ```
pub struct Context {
    /// Cluster and ClusterScan operations
    pub kube: Arc<dyn ClusterKubeClient>,
    /// Member cluster connector
    pub connector: Arc<dyn ClusterConnector>,
    /// Credential resolver
    pub resolver: Arc<CredentialResolver>,
    /// Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Requeue intervals
    pub intervals: RequeueIntervals,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context from explicit collaborators
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn ClusterKubeClient>,
        connector: Arc<dyn ClusterConnector>,
        resolver: Arc<CredentialResolver>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            kube,
            connector,
            resolver,
            events,
            intervals: RequeueIntervals::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn ClusterKubeClient>>,
    connector: Option<Arc<dyn ClusterConnector>>,
    resolver: Option<Arc<CredentialResolver>>,
    events: Option<Arc<dyn EventPublisher>>,
    intervals: RequeueIntervals,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            connector: None,
            resolver: None,
            events: None,
            intervals: RequeueIntervals::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn ClusterKubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the member cluster connector
    pub fn connector(mut self, connector: Arc<dyn ClusterConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Override the credential resolver
    pub fn resolver(mut self, resolver: Arc<CredentialResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set requeue intervals
    pub fn intervals(mut self, intervals: RequeueIntervals) -> Self {
        self.intervals = intervals;
        self
    }

    /// Build the Context
    ///
    /// Fails only if the default HTTP client for cloud APIs cannot be built.
    pub fn build(self) -> Result<Context, Error> {
        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(CredentialResolver::new(
                Arc::new(KubeSecretStore::new(self.client.clone())),
                Arc::new(HttpEksApi::new()?),
            )),
        };

        Ok(Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClusterClient::new(self.client.clone()))),
            connector: self
                .connector
                .unwrap_or_else(|| Arc::new(KubeClusterConnector::new(self.client.clone()))),
            resolver,
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client, CONTROLLER_NAME))),
            intervals: self.intervals,
        })
    }
}

/// ClusterScans that reference the Cluster named `cluster_name`
pub fn scans_for_cluster<'a>(
    scans: &'a [ClusterScan],
    cluster_name: &'a str,
) -> impl Iterator<Item = &'a ClusterScan> + 'a {
    scans
        .iter()
        .filter(move |s| s.spec.cluster_ref.name == cluster_name)
}

/// Pending status write for one reconciliation pass.
///
/// Conditions go through [`set_condition`]; only transitions are announced
/// as Events, and only after the write succeeded.
struct StatusUpdate<'a> {
    cluster: &'a Cluster,
    status: ClusterStatus,
    transitions: Vec<Condition>,
    modified: bool,
}

impl<'a> StatusUpdate<'a> {
    fn new(cluster: &'a Cluster) -> Self {
        Self {
            cluster,
            status: cluster.status.clone().unwrap_or_default(),
            transitions: Vec::new(),
            modified: false,
        }
    }

    fn condition(&mut self, condition: Condition) {
        let change = set_condition(&mut self.status.conditions, condition.clone());
        self.modified |= change.is_modified();
        if change.emits_event() {
            self.transitions.push(condition);
        }
    }

    fn fail(&mut self, type_: &str, reason: &str, message: impl Into<String>) {
        self.condition(Condition::new(type_, ConditionStatus::False, reason, message));
    }

    fn status_mut(&mut self) -> &mut ClusterStatus {
        self.modified = true;
        &mut self.status
    }

    async fn write(self, ctx: &Context) -> Result<(), Error> {
        if !self.modified {
            debug!("status unchanged, skipping write");
            return Ok(());
        }

        let name = self.cluster.name_any();
        let namespace = self.cluster.namespace().unwrap_or_default();
        ctx.kube.patch_status(&name, &namespace, &self.status).await?;

        let object_ref = self.cluster.object_ref(&());
        for condition in self.transitions {
            ctx.events
                .publish(
                    &object_ref,
                    event_type_for(condition.status),
                    &condition.reason,
                    actions::RECONCILE,
                    Some(condition.message),
                )
                .await;
        }
        Ok(())
    }
}

/// Reconcile a Cluster resource
///
/// Returns the delay until the next pass: short while the cloud provider
/// reports the cluster is not serving, the token refresh interval after a
/// kubeconfig was minted, the regular interval otherwise.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    info!("reconciling cluster");

    let mut update = StatusUpdate::new(&cluster);

    let credentials = match ctx.resolver.resolve(&cluster).await {
        Ok(Resolution::Ready(credentials)) => credentials,
        Ok(Resolution::NotReady { status }) => {
            info!(provider_status = %status, "cloud cluster not ready, re-checking later");
            return Ok(Action::requeue(ctx.intervals.cloud_not_ready));
        }
        Err(e) => {
            warn!(error = %e, "failed to resolve credentials");
            update.fail(CONDITION_READY, e.reason(), e.to_string());
            update.write(&ctx).await?;
            return Err(e.into());
        }
    };
    let minted = matches!(
        credentials,
        Credentials::Kubeconfig {
            expires_at: Some(_),
            ..
        }
    );

    let api = match ctx.connector.connect(&credentials).await {
        Ok(api) => api,
        Err(e) => {
            warn!(error = %e, "failed to build cluster client");
            update.fail(CONDITION_READY, REASON_NOT_CONNECTED, e.to_string());
            update.write(&ctx).await?;
            return Err(Error::Connect(e));
        }
    };

    let version = match vigil_discovery::version(api.as_ref()).await {
        Ok(version) => version,
        Err(e) => {
            warn!(error = %e, "failed to read server version");
            update.fail(CONDITION_READY, e.reason(), e.to_string());
            update.write(&ctx).await?;
            return Err(e.into());
        }
    };
    update.condition(Condition::new(
        CONDITION_READY,
        ConditionStatus::True,
        REASON_CONNECTED,
        format!("Connected to Kubernetes {}", version),
    ));

    let snapshot = match vigil_discovery::snapshot(api.as_ref(), version).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, step = e.step(), "discovery failed");
            update.fail(CONDITION_DISCOVERED, e.reason(), e.to_string());
            update.write(&ctx).await?;
            return Err(e.into());
        }
    };

    let scans = match ctx.kube.list_cluster_scans(&namespace).await {
        Ok(scans) => scans,
        Err(e) => {
            warn!(error = %e, namespace = %namespace, "failed to list cluster scans");
            update.write(&ctx).await?;
            return Err(e.into());
        }
    };
    let summary = summarize(scans_for_cluster(&scans, &name));
    update.condition(summary.condition());

    let node_count = snapshot.nodes.len();
    {
        let status = update.status_mut();
        status.kubernetes_version = Some(snapshot.kubernetes_version);
        status.provider = snapshot.provider;
        status.region = snapshot.region;
        status.total_nodes = Some(i32::try_from(node_count).unwrap_or(i32::MAX));
        status.nodes = snapshot.nodes;
        status.resources = snapshot.resources;
        status.total_issues = summary.total_issues;
        status.last_scans = summary.last_scans;
        status.observed_generation = cluster.metadata.generation;
        status.last_reconciliation_time = Some(Utc::now());
    }
    update.condition(Condition::new(
        CONDITION_DISCOVERED,
        ConditionStatus::True,
        REASON_DISCOVERED,
        format!("Discovered {} nodes", node_count),
    ));
    update.write(&ctx).await?;

    let requeue = if minted {
        ctx.intervals.token_refresh
    } else {
        ctx.intervals.cluster
    };
    debug!(nodes = node_count, requeue_secs = requeue.as_secs(), "cluster reconciled");
    Ok(Action::requeue(requeue))
}

/// Error policy for the controller
///
/// Conflicts mean another writer raced this pass; retry almost immediately
/// against the fresh object. Anything else backs off for a few seconds.
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_conflict() {
        debug!(cluster = %cluster.name_any(), "status conflict, retrying");
        return Action::requeue(Duration::from_secs(1));
    }

    error!(
        ?error,
        cluster = %cluster.name_any(),
        "reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}
