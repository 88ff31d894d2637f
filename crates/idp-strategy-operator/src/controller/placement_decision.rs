//! Turns the clusters selected for a [`Strategy`] into OAuth client registrations.
//!
//! For the `backplane` strategy every decided cluster gets, per identity provider of the
//! AuthRealm:
//!
//! * a [`DexClient`] in the authentication proxy namespace (named after the AuthRealm),
//! * a Secret in the cluster namespace carrying the client secret,
//! * a [`ClusterOAuth`] in the cluster namespace pointing the cluster's OAuth server at the proxy.
//!
//! Registrations of clusters which are no longer decided are deleted, as is the backplane
//! ManifestWork of every cluster outside of the decision.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use k8s_openapi::{
    ByteString,
    api::core::v1::{Namespace, Secret},
};
use kube::{
    ResourceExt,
    api::{ListParams, ObjectMeta},
    core::DynamicObject,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info};

use crate::{
    client::{self, Client},
    cluster_resources::{self, ClusterResources},
    controller::Ctx,
    crd::{
        AuthRealm, ClusterOAuth, ClusterOAuthSpec, Strategy, StrategyType,
        dex::{DexClient, DexClientSpec, dex_client_name},
        ocm::{ManagedCluster, ManifestWork, Placement, PlacementDecision},
        openshift::{
            CLUSTER_CONFIG_NAME, IdentityProvider, IdentityProviderType, Infrastructure, OAuth,
            OAuthSpec, OpenIdClaims, OpenIdIdentityProvider, SecretNameReference,
        },
    },
    labels::{
        CLUSTER_KEY, IDP_KEY, LabelValueError, PLACEMENT_KEY, authrealm_labels, is_managed,
        validate_label_value,
    },
    logging::controller::ReconcilerError,
    manifest::BACKPLANE_MANIFEST_WORK_NAME,
    utils::{
        random::{CLIENT_SECRET_LEN, random_string},
        url::{self, issuer_url, redirect_uri},
    },
};

pub const CONTROLLER_NAME: &str = "placement-decision";

/// Delay before checking again whether the authentication proxy namespace exists.
pub const PROXY_NAMESPACE_REQUEUE: Duration = Duration::from_secs(10);

/// Key of the client secret in the generated Secrets.
pub const CLIENT_SECRET_KEY: &str = "clientSecret";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to get {placement}"))]
    GetPlacement {
        source: client::Error,
        placement: ObjectRef<Placement>,
    },

    #[snafu(display("{placement} does not exist"))]
    PlacementNotFound { placement: ObjectRef<Placement> },

    #[snafu(display("failed to list strategies"))]
    ListStrategies { source: client::Error },

    #[snafu(display("no Strategy references {placement}"))]
    StrategyNotFound { placement: ObjectRef<Placement> },

    #[snafu(display("{strategy} is not owned by an AuthRealm"))]
    MissingAuthRealmOwner { strategy: ObjectRef<Strategy> },

    #[snafu(display("failed to get {authrealm}"))]
    GetAuthRealm {
        source: client::Error,
        authrealm: ObjectRef<AuthRealm>,
    },

    #[snafu(display("{authrealm} does not exist"))]
    AuthRealmNotFound { authrealm: ObjectRef<AuthRealm> },

    #[snafu(display("strategy type {strategy_type} is not supported yet"))]
    UnsupportedStrategyType { strategy_type: StrategyType },

    #[snafu(display("failed to check whether the proxy namespace {namespace:?} exists"))]
    GetProxyNamespace {
        source: client::Error,
        namespace: String,
    },

    #[snafu(display("{authrealm} cannot label its derived resources"))]
    InvalidOwnerLabels {
        source: LabelValueError,
        authrealm: ObjectRef<AuthRealm>,
    },

    #[snafu(display("failed to label the registrations of {cluster}"))]
    InvalidRegistrationLabels {
        source: LabelValueError,
        cluster: ObjectRef<ManagedCluster>,
    },

    #[snafu(display("failed to get the hub Infrastructure"))]
    GetHubInfrastructure { source: client::Error },

    #[snafu(display("the hub Infrastructure does not report an API server URL"))]
    MissingHubApiServerUrl,

    #[snafu(display("failed to derive the issuer URL of {authrealm}"))]
    DeriveIssuerUrl {
        source: url::Error,
        authrealm: ObjectRef<AuthRealm>,
    },

    #[snafu(display("failed to get {cluster}"))]
    GetManagedCluster {
        source: client::Error,
        cluster: ObjectRef<ManagedCluster>,
    },

    #[snafu(display("failed to derive the redirect URI of {cluster}"))]
    DeriveRedirectUri {
        source: url::Error,
        cluster: ObjectRef<ManagedCluster>,
    },

    #[snafu(display("failed to get {dex_client}"))]
    GetDexClient {
        source: client::Error,
        dex_client: ObjectRef<DexClient>,
    },

    #[snafu(display("failed to sync DexClients"))]
    SyncDexClients { source: cluster_resources::Error },

    #[snafu(display("failed to sync client secrets"))]
    SyncClientSecrets { source: cluster_resources::Error },

    #[snafu(display("failed to sync ClusterOAuths"))]
    SyncClusterOAuths { source: cluster_resources::Error },

    #[snafu(display("failed to list managed clusters"))]
    ListManagedClusters { source: client::Error },

    #[snafu(display("failed to get {manifest_work}"))]
    GetManifestWork {
        source: client::Error,
        manifest_work: ObjectRef<ManifestWork>,
    },

    #[snafu(display("failed to delete {manifest_work}"))]
    DeleteManifestWork {
        source: client::Error,
        manifest_work: ObjectRef<ManifestWork>,
    },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::ObjectHasNoNamespace => None,
            Error::GetPlacement { placement, .. } => Some(placement.clone().erase()),
            Error::PlacementNotFound { placement } => Some(placement.clone().erase()),
            Error::ListStrategies { .. } => None,
            Error::StrategyNotFound { placement } => Some(placement.clone().erase()),
            Error::MissingAuthRealmOwner { strategy } => Some(strategy.clone().erase()),
            Error::GetAuthRealm { authrealm, .. } => Some(authrealm.clone().erase()),
            Error::AuthRealmNotFound { authrealm } => Some(authrealm.clone().erase()),
            Error::UnsupportedStrategyType { .. } => None,
            Error::GetProxyNamespace { .. } => None,
            Error::InvalidOwnerLabels { authrealm, .. } => Some(authrealm.clone().erase()),
            Error::InvalidRegistrationLabels { cluster, .. } => Some(cluster.clone().erase()),
            Error::GetHubInfrastructure { .. } => None,
            Error::MissingHubApiServerUrl => None,
            Error::DeriveIssuerUrl { authrealm, .. } => Some(authrealm.clone().erase()),
            Error::GetManagedCluster { cluster, .. } => Some(cluster.clone().erase()),
            Error::DeriveRedirectUri { cluster, .. } => Some(cluster.clone().erase()),
            Error::GetDexClient { dex_client, .. } => Some(dex_client.clone().erase()),
            Error::SyncDexClients { .. } => None,
            Error::SyncClientSecrets { .. } => None,
            Error::SyncClusterOAuths { .. } => None,
            Error::ListManagedClusters { .. } => None,
            Error::GetManifestWork { manifest_work, .. } => Some(manifest_work.clone().erase()),
            Error::DeleteManifestWork { manifest_work, .. } => {
                Some(manifest_work.clone().erase())
            }
        }
    }
}

pub async fn reconcile(decision: Arc<PlacementDecision>, ctx: Arc<Ctx>) -> Result<Action> {
    info!("Starting reconcile");
    let client = &ctx.client;
    let namespace = decision.namespace().context(ObjectHasNoNamespaceSnafu)?;

    let placement_name = placement_name(&decision);
    let placement_ref = ObjectRef::<Placement>::new(placement_name).within(&namespace);
    client
        .get_opt::<Placement>(placement_name, &namespace)
        .await
        .with_context(|_| GetPlacementSnafu {
            placement: placement_ref.clone(),
        })?
        .with_context(|| PlacementNotFoundSnafu {
            placement: placement_ref.clone(),
        })?;

    let strategies = client
        .list::<Strategy>(&namespace, &ListParams::default())
        .await
        .context(ListStrategiesSnafu)?;
    let strategy = find_strategy(&strategies, placement_name).with_context(|| {
        StrategyNotFoundSnafu {
            placement: placement_ref,
        }
    })?;

    let authrealm_name = strategy
        .authrealm_name()
        .with_context(|| MissingAuthRealmOwnerSnafu {
            strategy: ObjectRef::from_obj(strategy),
        })?;
    let authrealm_ref = ObjectRef::<AuthRealm>::new(authrealm_name).within(&namespace);
    let authrealm = client
        .get_opt::<AuthRealm>(authrealm_name, &namespace)
        .await
        .with_context(|_| GetAuthRealmSnafu {
            authrealm: authrealm_ref.clone(),
        })?
        .with_context(|| AuthRealmNotFoundSnafu {
            authrealm: authrealm_ref,
        })?;

    match strategy.spec.strategy_type {
        StrategyType::Backplane => reconcile_backplane(&decision, &authrealm, client).await,
        strategy_type => UnsupportedStrategyTypeSnafu { strategy_type }.fail(),
    }
}

async fn reconcile_backplane(
    decision: &PlacementDecision,
    authrealm: &AuthRealm,
    client: &Client,
) -> Result<Action> {
    let proxy_namespace = authrealm.name_any();
    let proxy_namespace_exists = client
        .resource_exists::<Namespace>(&proxy_namespace, &())
        .await
        .with_context(|_| GetProxyNamespaceSnafu {
            namespace: proxy_namespace.clone(),
        })?;
    if let Some(action) = wait_for_proxy_namespace(proxy_namespace_exists) {
        info!(
            namespace = %proxy_namespace,
            "Authentication proxy namespace does not exist yet, requeueing"
        );
        return Ok(action);
    }

    let authrealm_namespace = authrealm.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let owner_labels = authrealm_labels(&authrealm.name_any(), &authrealm_namespace)
        .with_context(|_| InvalidOwnerLabelsSnafu {
            authrealm: ObjectRef::from_obj(authrealm),
        })?;

    let hub_api_server_url = hub_api_server_url(client).await?;
    let issuer = issuer_url(&authrealm.spec.route_sub_domain, &hub_api_server_url).with_context(
        |_| DeriveIssuerUrlSnafu {
            authrealm: ObjectRef::from_obj(authrealm),
        },
    )?;

    let mut dex_clients = Vec::new();
    let mut client_secrets = Vec::new();
    let mut cluster_oauths = Vec::new();
    for cluster_name in decision.cluster_names() {
        let cluster_ref = ObjectRef::<ManagedCluster>::new(cluster_name);
        let managed_cluster = client
            .get_opt::<ManagedCluster>(cluster_name, &())
            .await
            .with_context(|_| GetManagedClusterSnafu {
                cluster: cluster_ref.clone(),
            })?;
        let api_server_url = managed_cluster
            .as_ref()
            .and_then(ManagedCluster::api_server_url)
            .unwrap_or(&hub_api_server_url);

        for idp in &authrealm.spec.identity_providers {
            let redirect_uri =
                redirect_uri(api_server_url, &idp.name).with_context(|_| {
                    DeriveRedirectUriSnafu {
                        cluster: cluster_ref.clone(),
                    }
                })?;

            let name = dex_client_name(cluster_name, &idp.name);
            let existing = client
                .get_opt::<DexClient>(&name, &proxy_namespace)
                .await
                .with_context(|_| GetDexClientSnafu {
                    dex_client: ObjectRef::<DexClient>::new(&name).within(&proxy_namespace),
                })?;
            let client_secret = client_secret(existing.as_ref());

            let labels = cluster_idp_labels(&owner_labels, cluster_name, &idp.name)
                .with_context(|_| InvalidRegistrationLabelsSnafu {
                    cluster: cluster_ref.clone(),
                })?;
            dex_clients.push(build_dex_client(
                &proxy_namespace,
                cluster_name,
                &idp.name,
                &client_secret,
                redirect_uri,
                labels.clone(),
            ));
            client_secrets.push(build_client_secret(
                authrealm,
                cluster_name,
                &idp.name,
                &client_secret,
                labels.clone(),
            ));
            cluster_oauths.push(build_cluster_oauth(
                authrealm,
                cluster_name,
                idp,
                &issuer,
                labels,
            ));
        }
    }

    debug!(
        dex_clients = dex_clients.len(),
        proxy_namespace = %proxy_namespace,
        "Syncing OAuth client registrations"
    );
    ClusterResources::new(owner_labels.clone(), Some(&proxy_namespace), &dex_clients)
        .context(SyncDexClientsSnafu)?
        .update(client)
        .await
        .context(SyncDexClientsSnafu)?;
    ClusterResources::new(owner_labels.clone(), None, &client_secrets)
        .context(SyncClientSecretsSnafu)?
        .update(client)
        .await
        .context(SyncClientSecretsSnafu)?;
    ClusterResources::new(owner_labels, None, &cluster_oauths)
        .context(SyncClusterOAuthsSnafu)?
        .update(client)
        .await
        .context(SyncClusterOAuthsSnafu)?;

    delete_undecided_manifest_works(decision, client).await?;

    Ok(Action::await_change())
}

/// Deletes the backplane ManifestWork of every managed cluster outside of `decision`.
///
/// ManifestWorks not managed by this operator are left alone.
async fn delete_undecided_manifest_works(
    decision: &PlacementDecision,
    client: &Client,
) -> Result<()> {
    let managed_clusters = client
        .list::<ManagedCluster>(&(), &ListParams::default())
        .await
        .context(ListManagedClustersSnafu)?;

    let mut manifest_works = Vec::new();
    for cluster_name in undecided_clusters(decision, &managed_clusters) {
        let manifest_work = client
            .get_opt::<ManifestWork>(BACKPLANE_MANIFEST_WORK_NAME, &cluster_name)
            .await
            .with_context(|_| GetManifestWorkSnafu {
                manifest_work: ObjectRef::<ManifestWork>::new(BACKPLANE_MANIFEST_WORK_NAME)
                    .within(&cluster_name),
            })?;
        manifest_works.extend(manifest_work);
    }

    for manifest_work in manifest_works_to_delete(decision, &manifest_works) {
        let cluster_name = manifest_work.namespace().unwrap_or_default();
        info!(cluster = %cluster_name, "Deleting backplane ManifestWork of undecided cluster");
        client
            .delete(manifest_work)
            .await
            .with_context(|_| DeleteManifestWorkSnafu {
                manifest_work: ObjectRef::from_obj(manifest_work),
            })?;
    }

    Ok(())
}

/// The action to take instead of reconciling while the proxy namespace is missing.
pub fn wait_for_proxy_namespace(proxy_namespace_exists: bool) -> Option<Action> {
    (!proxy_namespace_exists).then(|| Action::requeue(PROXY_NAMESPACE_REQUEUE))
}

/// Names of the `managed_clusters` outside of `decision`.
pub fn undecided_clusters(
    decision: &PlacementDecision,
    managed_clusters: &[ManagedCluster],
) -> Vec<String> {
    managed_clusters
        .iter()
        .map(ResourceExt::name_any)
        .filter(|cluster_name| !decision.contains_cluster(cluster_name))
        .collect()
}

/// The backplane ManifestWorks among `manifest_works` to delete: those of clusters outside of
/// `decision` which this operator manages.
pub fn manifest_works_to_delete<'a>(
    decision: &PlacementDecision,
    manifest_works: &'a [ManifestWork],
) -> Vec<&'a ManifestWork> {
    manifest_works
        .iter()
        .filter(|mw| mw.metadata.name.as_deref() == Some(BACKPLANE_MANIFEST_WORK_NAME))
        .filter(|mw| {
            mw.metadata
                .namespace
                .as_deref()
                .is_some_and(|cluster_name| !decision.contains_cluster(cluster_name))
        })
        .filter(|mw| is_managed(mw.labels()))
        .collect()
}

async fn hub_api_server_url(client: &Client) -> Result<String> {
    let infrastructure = client
        .get_opt::<Infrastructure>(CLUSTER_CONFIG_NAME, &())
        .await
        .context(GetHubInfrastructureSnafu)?;

    infrastructure
        .as_ref()
        .and_then(Infrastructure::api_server_url)
        .map(str::to_owned)
        .context(MissingHubApiServerUrlSnafu)
}

/// Name of the Placement `decision` was made for.
///
/// The scheduler labels decisions with their Placement; unlabelled decisions are assumed to be
/// named like their Placement.
pub fn placement_name(decision: &PlacementDecision) -> &str {
    decision
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(PLACEMENT_KEY))
        .or(decision.metadata.name.as_ref())
        .map(String::as_str)
        .unwrap_or_default()
}

/// The strategy whose generated Placement is `placement_name`.
pub fn find_strategy<'a>(strategies: &'a [Strategy], placement_name: &str) -> Option<&'a Strategy> {
    strategies
        .iter()
        .find(|strategy| strategy.placement_ref_name() == Some(placement_name))
}

/// Client secret of a registration, reusing the secret of an `existing` DexClient.
pub fn client_secret(existing: Option<&DexClient>) -> String {
    existing
        .map(|dex_client| dex_client.spec.client_secret.clone())
        .filter(|secret| !secret.is_empty())
        .unwrap_or_else(|| random_string(CLIENT_SECRET_LEN))
}

/// Owner labels extended by the cluster and identity provider a registration belongs to.
pub fn cluster_idp_labels(
    owner_labels: &BTreeMap<String, String>,
    cluster_name: &str,
    idp_name: &str,
) -> Result<BTreeMap<String, String>, LabelValueError> {
    validate_label_value(cluster_name)?;
    validate_label_value(idp_name)?;

    let mut labels = owner_labels.clone();
    labels.insert(CLUSTER_KEY.to_owned(), cluster_name.to_owned());
    labels.insert(IDP_KEY.to_owned(), idp_name.to_owned());
    Ok(labels)
}

pub fn build_dex_client(
    proxy_namespace: &str,
    cluster_name: &str,
    idp_name: &str,
    client_secret: &str,
    redirect_uri: String,
    labels: BTreeMap<String, String>,
) -> DexClient {
    DexClient {
        metadata: ObjectMeta {
            name: Some(dex_client_name(cluster_name, idp_name)),
            namespace: Some(proxy_namespace.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: DexClientSpec {
            client_id: cluster_name.to_owned(),
            client_secret: client_secret.to_owned(),
            redirect_uris: vec![redirect_uri],
            public: false,
        },
    }
}

/// The Secret in the namespace of `cluster_name` the cluster's OAuth server reads the client
/// secret from.
pub fn build_client_secret(
    authrealm: &AuthRealm,
    cluster_name: &str,
    idp_name: &str,
    client_secret: &str,
    labels: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(authrealm.cluster_oauth_name(idp_name)),
            namespace: Some(cluster_name.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(
            CLIENT_SECRET_KEY.to_owned(),
            ByteString(client_secret.as_bytes().to_vec()),
        )])),
        type_: Some("Opaque".to_owned()),
        ..Secret::default()
    }
}

/// Registers the authentication proxy of `authrealm` as OpenID provider of `cluster_name`.
pub fn build_cluster_oauth(
    authrealm: &AuthRealm,
    cluster_name: &str,
    idp: &IdentityProvider,
    issuer: &str,
    labels: BTreeMap<String, String>,
) -> ClusterOAuth {
    let name = authrealm.cluster_oauth_name(&idp.name);
    let open_id = OpenIdIdentityProvider {
        client_id: cluster_name.to_owned(),
        client_secret: SecretNameReference { name: name.clone() },
        issuer: issuer.to_owned(),
        claims: OpenIdClaims {
            preferred_username: vec!["preferred_username".to_owned(), "email".to_owned()],
            name: vec!["name".to_owned()],
            email: vec!["email".to_owned()],
            groups: Vec::new(),
        },
        ..OpenIdIdentityProvider::default()
    };

    let mut cluster_oauth = ClusterOAuth::new(&name, ClusterOAuthSpec {
        oauth: OAuth::new(CLUSTER_CONFIG_NAME, OAuthSpec {
            identity_providers: vec![IdentityProvider {
                name: idp.name.clone(),
                mapping_method: idp.mapping_method.clone(),
                provider_type: Some(IdentityProviderType::OpenId),
                open_id: Some(open_id),
                ..IdentityProvider::default()
            }],
        }),
    });
    cluster_oauth.metadata.namespace = Some(cluster_name.to_owned());
    cluster_oauth.metadata.labels = Some(labels);
    cluster_oauth
}
