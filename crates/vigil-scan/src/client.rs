//! Kubernetes operations used by the scan scheduler
//!
//! [`ScanKubeClient`] is the single seam between the scheduler and the API
//! server so reconciliation can be exercised without a cluster.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

use vigil_common::crd::{Cluster, ClusterScan, ClusterScanStatus, Plugin};
use vigil_common::kube_utils::patch_resource_status;

/// Trait abstracting Kubernetes client operations for ClusterScans
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ScanKubeClient: Send + Sync {
    /// Get a Cluster
    async fn get_cluster(&self, namespace: &str, name: &str)
        -> Result<Option<Cluster>, kube::Error>;

    /// Get a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;

    /// Get a Plugin
    async fn get_plugin(&self, namespace: &str, name: &str) -> Result<Option<Plugin>, kube::Error>;

    /// Get a ServiceAccount
    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, kube::Error>;

    /// Create a ServiceAccount
    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error>;

    /// Replace a ServiceAccount at the resourceVersion it was read at
    async fn replace_service_account(
        &self,
        namespace: &str,
        name: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error>;

    /// Get a ClusterRoleBinding
    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, kube::Error>;

    /// Replace a ClusterRoleBinding at the resourceVersion it was read at
    async fn replace_cluster_role_binding(
        &self,
        name: &str,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, kube::Error>;

    /// Get a CronJob
    async fn get_cron_job(&self, namespace: &str, name: &str)
        -> Result<Option<CronJob>, kube::Error>;

    /// Create a CronJob
    async fn create_cron_job(&self, namespace: &str, cron_job: &CronJob)
        -> Result<CronJob, kube::Error>;

    /// Replace a CronJob at the resourceVersion it was read at
    async fn replace_cron_job(
        &self,
        namespace: &str,
        name: &str,
        cron_job: &CronJob,
    ) -> Result<CronJob, kube::Error>;

    /// Delete a CronJob and, in the background, its Jobs
    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error>;

    /// List CronJobs matching a label selector
    async fn list_cron_jobs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<CronJob>, kube::Error>;

    /// List Jobs matching a label selector
    async fn list_jobs(&self, namespace: &str, label_selector: &str)
        -> Result<Vec<Job>, kube::Error>;

    /// Replace the status of a ClusterScan
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterScanStatus,
    ) -> Result<(), kube::Error>;
}

/// Real Kubernetes client implementation
pub struct KubeScanClient {
    client: Client,
}

impl KubeScanClient {
    /// Create a new client wrapper
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ScanKubeClient for KubeScanClient {
    async fn get_cluster(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Cluster>, kube::Error> {
        self.namespaced::<Cluster>(namespace).get_opt(name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        self.namespaced::<Secret>(namespace).get_opt(name).await
    }

    async fn get_plugin(&self, namespace: &str, name: &str) -> Result<Option<Plugin>, kube::Error> {
        self.namespaced::<Plugin>(namespace).get_opt(name).await
    }

    async fn get_service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceAccount>, kube::Error> {
        self.namespaced::<ServiceAccount>(namespace)
            .get_opt(name)
            .await
    }

    async fn create_service_account(
        &self,
        namespace: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        self.namespaced::<ServiceAccount>(namespace)
            .create(&PostParams::default(), service_account)
            .await
    }

    async fn replace_service_account(
        &self,
        namespace: &str,
        name: &str,
        service_account: &ServiceAccount,
    ) -> Result<ServiceAccount, kube::Error> {
        self.namespaced::<ServiceAccount>(namespace)
            .replace(name, &PostParams::default(), service_account)
            .await
    }

    async fn get_cluster_role_binding(
        &self,
        name: &str,
    ) -> Result<Option<ClusterRoleBinding>, kube::Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.get_opt(name).await
    }

    async fn replace_cluster_role_binding(
        &self,
        name: &str,
        binding: &ClusterRoleBinding,
    ) -> Result<ClusterRoleBinding, kube::Error> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.replace(name, &PostParams::default(), binding).await
    }

    async fn get_cron_job(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<CronJob>, kube::Error> {
        self.namespaced::<CronJob>(namespace).get_opt(name).await
    }

    async fn create_cron_job(
        &self,
        namespace: &str,
        cron_job: &CronJob,
    ) -> Result<CronJob, kube::Error> {
        self.namespaced::<CronJob>(namespace)
            .create(&PostParams::default(), cron_job)
            .await
    }

    async fn replace_cron_job(
        &self,
        namespace: &str,
        name: &str,
        cron_job: &CronJob,
    ) -> Result<CronJob, kube::Error> {
        self.namespaced::<CronJob>(namespace)
            .replace(name, &PostParams::default(), cron_job)
            .await
    }

    async fn delete_cron_job(&self, namespace: &str, name: &str) -> Result<(), kube::Error> {
        self.namespaced::<CronJob>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }

    async fn list_cron_jobs(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<CronJob>, kube::Error> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.namespaced::<CronJob>(namespace).list(&params).await?.items)
    }

    async fn list_jobs(&self, namespace: &str, label_selector: &str) -> Result<Vec<Job>, kube::Error> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.namespaced::<Job>(namespace).list(&params).await?.items)
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterScanStatus,
    ) -> Result<(), kube::Error> {
        patch_resource_status::<ClusterScan>(&self.client, name, namespace, status).await
    }
}
