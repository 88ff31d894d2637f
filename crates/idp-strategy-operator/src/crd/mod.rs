//! Custom resources owned by this operator and typed views of the external resources it reads
//! and writes.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::crd::openshift::{IdentityProvider, OAuth};

pub mod dex;
pub mod install;
pub mod ocm;
pub mod openshift;

pub const GROUP: &str = "identityconfig.identitatem.io";

/// Kind of the owner reference linking a [`Strategy`] to its [`AuthRealm`].
pub const AUTHREALM_KIND: &str = "AuthRealm";

/// Reference to an object in the same namespace.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
pub struct LocalObjectReference {
    #[serde(default)]
    pub name: String,
}

impl LocalObjectReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// How an [`AuthRealm`] is applied to the clusters selected by its placement.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Display,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StrategyType {
    /// Configure the OAuth server of each cluster directly through ManifestWorks.
    Backplane,

    /// Configure clusters through the governance (policy) framework.
    Grc,
}

/// A Strategy applies the identity providers of its owning AuthRealm to managed clusters.
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "identityconfig.identitatem.io",
    version = "v1alpha1",
    kind = "Strategy",
    plural = "strategies",
    status = "StrategyStatus",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    /// Strategy to use for applying the AuthRealm to the managed clusters.
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,

    /// The Placement generated for this strategy. Set by the operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_ref: Option<LocalObjectReference>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Strategy {
    /// Name of the AuthRealm owning this strategy, taken from its owner references.
    pub fn authrealm_name(&self) -> Option<&str> {
        self.owner_references()
            .iter()
            .find(|owner| owner.kind == AUTHREALM_KIND)
            .map(|owner| owner.name.as_str())
    }

    /// Name of the Placement generated for this strategy from the AuthRealm placement `base`.
    pub fn placement_name(&self, base: &str) -> String {
        format!("{base}-{}", self.spec.strategy_type)
    }

    pub fn placement_ref_name(&self) -> Option<&str> {
        self.spec
            .placement_ref
            .as_ref()
            .map(|placement| placement.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// The authentication proxy implementation serving an [`AuthRealm`].
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProxyType {
    #[default]
    Dex,
}

/// An AuthRealm groups identity providers and the clusters they are offered to.
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "identityconfig.identitatem.io",
    version = "v1alpha1",
    kind = "AuthRealm",
    plural = "authrealms",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AuthRealmSpec {
    #[serde(rename = "type", default)]
    pub auth_proxy_type: AuthProxyType,

    /// Sub-domain of the route exposing the authentication proxy on the hub.
    #[serde(default)]
    pub route_sub_domain: String,

    /// The Placement selecting the clusters this realm is offered to.
    #[serde(default)]
    pub placement_ref: LocalObjectReference,

    /// Secret holding the certificates of the authentication proxy route.
    #[serde(default)]
    pub certificates_secret_ref: LocalObjectReference,

    #[serde(default)]
    pub identity_providers: Vec<IdentityProvider>,
}

impl AuthRealm {
    /// Name shared by the client secret and the ClusterOAuth generated for `idp_name`.
    pub fn cluster_oauth_name(&self, idp_name: &str) -> String {
        format!("{idp_name}-{}", self.name_any())
    }
}

/// OAuth identity provider registration of one managed cluster.
///
/// Lives in the cluster's namespace on the hub; all ClusterOAuths of a namespace are merged into
/// the OAuth configuration shipped to the cluster.
#[derive(Clone, CustomResource, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "identityconfig.identitatem.io",
    version = "v1alpha1",
    kind = "ClusterOAuth",
    plural = "clusteroauths",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterOAuthSpec {
    #[schemars(schema_with = "raw_object_schema")]
    pub oauth: OAuth,
}

/// Schema for embedded objects whose structure is owned by another API.
pub fn raw_object_schema(_: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;

    use super::*;

    #[test]
    fn strategy_deserializes_with_owner() {
        let strategy: Strategy = serde_yaml::from_str(indoc! {"
            apiVersion: identityconfig.identitatem.io/v1alpha1
            kind: Strategy
            metadata:
              name: realm-backplane
              namespace: realm-ns
              ownerReferences:
                - apiVersion: identityconfig.identitatem.io/v1alpha1
                  kind: AuthRealm
                  name: realm
                  uid: 5a0a93cb-4d5c-4a5f-9e58-6f0b3e9f2a11
            spec:
              type: backplane
        "})
        .expect("test input is a valid Strategy");

        assert_eq!(strategy.spec.strategy_type, StrategyType::Backplane);
        assert_eq!(strategy.authrealm_name(), Some("realm"));
        assert_eq!(strategy.placement_ref_name(), None);
        assert_eq!(strategy.placement_name("realm-placement"), "realm-placement-backplane");
    }

    #[rstest]
    #[case("backplane", StrategyType::Backplane)]
    #[case("grc", StrategyType::Grc)]
    fn strategy_type_round_trips_through_strings(
        #[case] input: &str,
        #[case] expected: StrategyType,
    ) {
        assert_eq!(input.parse::<StrategyType>().unwrap(), expected);
        assert_eq!(expected.to_string(), input);
    }

    #[test]
    fn unknown_strategy_type_is_rejected() {
        let result = serde_yaml::from_str::<StrategySpec>("type: federated");
        assert!(result.is_err());
    }

    #[test]
    fn authrealm_names_derived_objects() {
        let authrealm: AuthRealm = serde_yaml::from_str(indoc! {"
            apiVersion: identityconfig.identitatem.io/v1alpha1
            kind: AuthRealm
            metadata:
              name: realm
              namespace: realm-ns
            spec:
              type: dex
              routeSubDomain: testdomain
              placementRef:
                name: realm-placement
              identityProviders:
                - name: github
                  mappingMethod: add
                  type: GitHub
                  github:
                    clientID: abc
                    clientSecret:
                      name: github-secret
        "})
        .expect("test input is a valid AuthRealm");

        assert_eq!(authrealm.spec.identity_providers[0].name, "github");
        assert_eq!(authrealm.cluster_oauth_name("github"), "github-realm");
        assert_eq!(authrealm.spec.placement_ref.name, "realm-placement");
    }

    #[test]
    fn owned_crds_are_namespaced() {
        for crd in install::owned_crds() {
            assert_eq!(crd.spec.scope, "Namespaced");
            assert_eq!(crd.spec.group, GROUP);
        }
    }
}
