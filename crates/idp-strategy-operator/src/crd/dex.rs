//! OAuth client registrations served by the Dex authentication proxy.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// An OAuth client registered with the Dex instance of an AuthRealm.
///
/// One is created per managed cluster and identity provider, named `<cluster>-<idp>`.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize)]
#[kube(
    group = "auth.identitatem.io",
    version = "v1alpha1",
    kind = "DexClient",
    plural = "dexclients",
    schema = "disabled",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DexClientSpec {
    #[serde(rename = "clientID", default)]
    pub client_id: String,

    /// Generated once and never rotated, so that clusters keep their configured secret.
    #[serde(default)]
    pub client_secret: String,

    #[serde(rename = "redirectURIs", default)]
    pub redirect_uris: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub public: bool,
}

/// Name of the DexClient registered for `cluster_name` and `idp_name`.
pub fn dex_client_name(cluster_name: &str, idp_name: &str) -> String {
    format!("{cluster_name}-{idp_name}")
}
