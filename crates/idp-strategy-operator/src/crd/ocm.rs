//! Open Cluster Management resources used to select clusters and deliver configuration to them.

use k8s_openapi::{
    NamespaceResourceScope,
    apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta},
};
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// A cluster registered with the hub. Cluster scoped; its name is also the name of the hub
/// namespace holding everything addressed to the cluster.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    #[serde(default)]
    pub managed_cluster_client_configs: Vec<ClientConfig>,

    #[serde(default)]
    pub hub_accepts_client: bool,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// URL of the managed cluster's API server.
    #[serde(default)]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

impl ManagedCluster {
    /// API server URL the cluster registered with, if any.
    pub fn api_server_url(&self) -> Option<&str> {
        self.spec
            .managed_cluster_client_configs
            .first()
            .map(|config| config.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

/// Selects a set of managed clusters. The scheduling result is published in
/// [`PlacementDecision`]s labelled with the placement's name.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1beta1",
    kind = "Placement",
    plural = "placements",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PlacementSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_sets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_of_clusters: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<ClusterPredicate>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPredicate {
    #[serde(default)]
    pub required_cluster_selector: ClusterSelector,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_selector: Option<ClusterClaimSelector>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterClaimSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// Scheduling result of a [`Placement`].
///
/// The object has no `spec`, so it implements the resource traits by hand instead of going
/// through the `CustomResource` derive.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct PlacementDecision {
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PlacementDecisionStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementDecisionStatus {
    #[serde(default)]
    pub decisions: Vec<ClusterDecision>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDecision {
    pub cluster_name: String,

    #[serde(default)]
    pub reason: String,
}

impl PlacementDecision {
    /// Names of the clusters selected by this decision, in decision order.
    pub fn cluster_names(&self) -> impl Iterator<Item = &str> {
        self.status
            .iter()
            .flat_map(|status| status.decisions.iter())
            .map(|decision| decision.cluster_name.as_str())
    }

    pub fn contains_cluster(&self, cluster_name: &str) -> bool {
        self.cluster_names().any(|name| name == cluster_name)
    }
}

impl k8s_openapi::Resource for PlacementDecision {
    type Scope = NamespaceResourceScope;

    const API_VERSION: &'static str = "cluster.open-cluster-management.io/v1beta1";
    const GROUP: &'static str = "cluster.open-cluster-management.io";
    const KIND: &'static str = "PlacementDecision";
    const URL_PATH_SEGMENT: &'static str = "placementdecisions";
    const VERSION: &'static str = "v1beta1";
}

impl k8s_openapi::Metadata for PlacementDecision {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Delivers a list of manifests to the managed cluster owning the ManifestWork's namespace.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize)]
#[kube(
    group = "work.open-cluster-management.io",
    version = "v1",
    kind = "ManifestWork",
    plural = "manifestworks",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ManifestWorkSpec {
    #[serde(default)]
    pub workload: ManifestsTemplate,

    /// Settings such as `deleteOption` or `manifestConfigs`, carried through untouched.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestsTemplate {
    #[serde(default)]
    pub manifests: Vec<serde_json::Value>,
}
