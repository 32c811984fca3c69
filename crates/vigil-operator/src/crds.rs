//! CRD generation and installation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use vigil_common::crd::{Cluster, ClusterScan, Plugin};
use vigil_common::FIELD_MANAGER;

/// Every CRD the operator serves
pub fn all() -> Vec<CustomResourceDefinition> {
    vec![Cluster::crd(), ClusterScan::crd(), Plugin::crd()]
}

/// All CRDs as a multi-document YAML stream
pub fn render() -> Result<String, serde_yaml::Error> {
    let documents = all()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}

/// Install or update the CRDs using server-side apply
pub async fn install(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", name, e))?;
    }
    Ok(())
}
