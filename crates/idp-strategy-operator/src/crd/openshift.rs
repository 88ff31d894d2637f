//! OpenShift configuration resources (`config.openshift.io/v1`).
//!
//! Only the fields this operator reads or writes are modelled.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the cluster wide singleton configuration objects (OAuth, Infrastructure).
pub const CLUSTER_CONFIG_NAME: &str = "cluster";

/// Namespace holding secrets referenced by the cluster OAuth configuration.
pub const OPENSHIFT_CONFIG_NAMESPACE: &str = "openshift-config";

#[derive(Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "OAuth",
    plural = "oauths",
    schema = "disabled",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_providers: Vec<IdentityProvider>,
}

#[derive(Clone, CustomResource, Debug, Default, Deserialize, PartialEq, Serialize)]
#[kube(
    group = "config.openshift.io",
    version = "v1",
    kind = "Infrastructure",
    plural = "infrastructures",
    schema = "disabled",
    status = "InfrastructureStatus"
)]
pub struct InfrastructureSpec {}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfrastructureStatus {
    /// URL of the cluster's API server, e.g. `https://api.hub.example.com:6443`.
    #[serde(rename = "apiServerURL", default)]
    pub api_server_url: Option<String>,

    #[serde(default)]
    pub infrastructure_name: Option<String>,
}

impl Infrastructure {
    pub fn api_server_url(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.api_server_url.as_deref())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
pub enum IdentityProviderType {
    BasicAuth,
    GitHub,
    GitLab,
    Google,
    HTPasswd,
    Keystone,
    #[serde(rename = "LDAP")]
    Ldap,
    #[serde(rename = "OpenID")]
    OpenId,
    RequestHeader,
}

/// An identity provider as understood by the OpenShift OAuth server.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProvider {
    pub name: String,

    /// How identities from this provider are mapped to users, e.g. `claim` or `add`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_method: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<IdentityProviderType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitHubIdentityProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitlab: Option<GitLabIdentityProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google: Option<GoogleIdentityProvider>,

    #[serde(rename = "openID", default, skip_serializing_if = "Option::is_none")]
    pub open_id: Option<OpenIdIdentityProvider>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ldap: Option<LdapIdentityProvider>,
}

impl IdentityProvider {
    /// Names of the secrets in `openshift-config` this provider depends on.
    pub fn secret_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(github) = &self.github {
            names.push(github.client_secret.name.as_str());
        }
        if let Some(gitlab) = &self.gitlab {
            names.push(gitlab.client_secret.name.as_str());
        }
        if let Some(google) = &self.google {
            names.push(google.client_secret.name.as_str());
        }
        if let Some(open_id) = &self.open_id {
            names.push(open_id.client_secret.name.as_str());
        }
        if let Some(bind_password) = self.ldap.as_ref().and_then(|ldap| ldap.bind_password.as_ref()) {
            names.push(bind_password.name.as_str());
        }
        names.retain(|name| !name.is_empty());
        names
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
pub struct SecretNameReference {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, JsonSchema, PartialEq, Serialize)]
pub struct ConfigMapNameReference {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubIdentityProvider {
    #[serde(rename = "clientID")]
    pub client_id: String,

    pub client_secret: SecretNameReference,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ConfigMapNameReference>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitLabIdentityProvider {
    #[serde(rename = "clientID")]
    pub client_id: String,

    pub client_secret: SecretNameReference,

    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ConfigMapNameReference>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleIdentityProvider {
    #[serde(rename = "clientID")]
    pub client_id: String,

    pub client_secret: SecretNameReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_domain: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenIdIdentityProvider {
    #[serde(rename = "clientID")]
    pub client_id: String,

    pub client_secret: SecretNameReference,

    pub issuer: String,

    #[serde(default)]
    pub claims: OpenIdClaims,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ConfigMapNameReference>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenIdClaims {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_username: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapIdentityProvider {
    pub url: String,

    #[serde(rename = "bindDN", default, skip_serializing_if = "Option::is_none")]
    pub bind_dn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_password: Option<SecretNameReference>,

    #[serde(default)]
    pub insecure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ConfigMapNameReference>,

    #[serde(default)]
    pub attributes: LdapAttributeMapping,
}

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapAttributeMapping {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_username: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email: Vec<String>,
}
