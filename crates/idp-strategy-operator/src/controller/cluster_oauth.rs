//! Aggregates the [`ClusterOAuth`]s of a managed cluster namespace into the backplane
//! ManifestWork.
//!
//! The ManifestWork ships a single OAuth configuration carrying the identity providers of every
//! ClusterOAuth in the namespace, preceded by the client secrets they reference.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Secret;
use kube::{
    ResourceExt,
    api::{ListParams, ObjectMeta},
    core::DynamicObject,
    runtime::{
        controller::Action,
        finalizer::{self, Event as Finalizer, finalizer},
        reflector::ObjectRef,
    },
};
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info};

use crate::{
    client::{self, Client},
    controller::Ctx,
    crd::{
        ClusterOAuth,
        ocm::ManifestWork,
        openshift::{CLUSTER_CONFIG_NAME, OAuth, OAuthSpec, OPENSHIFT_CONFIG_NAMESPACE},
    },
    labels::{is_managed, managed_by_labels},
    logging::controller::ReconcilerError,
    manifest::{
        self, BACKPLANE_MANIFEST_WORK_NAME, build_manifest_work, manifest_works_equal, to_manifest,
        update_manifest_work,
    },
};

pub const CONTROLLER_NAME: &str = "cluster-oauth";

/// Keeps deleted ClusterOAuths around until the ManifestWork no longer ships them.
pub const FINALIZER: &str = "identityconfig.identitatem.io/cluster-oauth";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to list ClusterOAuths in namespace {namespace:?}"))]
    ListClusterOAuths {
        source: client::Error,
        namespace: String,
    },

    #[snafu(display("failed to get {secret}"))]
    GetSecret {
        source: client::Error,
        secret: ObjectRef<Secret>,
    },

    #[snafu(display("failed to build the manifests for namespace {namespace:?}"))]
    BuildManifest {
        source: manifest::Error,
        namespace: String,
    },

    #[snafu(display("failed to get {manifest_work}"))]
    GetManifestWork {
        source: client::Error,
        manifest_work: ObjectRef<ManifestWork>,
    },

    #[snafu(display("failed to create {manifest_work}"))]
    CreateManifestWork {
        source: client::Error,
        manifest_work: ObjectRef<ManifestWork>,
    },

    #[snafu(display("failed to update {manifest_work}"))]
    UpdateManifestWork {
        source: client::Error,
        manifest_work: ObjectRef<ManifestWork>,
    },

    #[snafu(display("failed to delete {manifest_work}"))]
    DeleteManifestWork {
        source: client::Error,
        manifest_work: ObjectRef<ManifestWork>,
    },

    #[snafu(display("failed to run the ClusterOAuth finalizer"))]
    Finalizer {
        #[snafu(source(from(finalizer::Error<Error>, Box::new)))]
        source: Box<finalizer::Error<Error>>,
    },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        match self {
            Error::Finalizer { source } => match source.as_ref() {
                finalizer::Error::ApplyFailed(error) | finalizer::Error::CleanupFailed(error) => {
                    error.category()
                }
                _ => ErrorDiscriminants::from(self).into(),
            },
            _ => ErrorDiscriminants::from(self).into(),
        }
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::ObjectHasNoNamespace => None,
            Error::ListClusterOAuths { .. } => None,
            Error::GetSecret { secret, .. } => Some(secret.clone().erase()),
            Error::BuildManifest { .. } => None,
            Error::GetManifestWork { manifest_work, .. } => Some(manifest_work.clone().erase()),
            Error::CreateManifestWork { manifest_work, .. } => Some(manifest_work.clone().erase()),
            Error::UpdateManifestWork { manifest_work, .. } => Some(manifest_work.clone().erase()),
            Error::DeleteManifestWork { manifest_work, .. } => Some(manifest_work.clone().erase()),
            Error::Finalizer { source } => match source.as_ref() {
                finalizer::Error::ApplyFailed(error) | finalizer::Error::CleanupFailed(error) => {
                    error.secondary_object()
                }
                _ => None,
            },
        }
    }
}

pub async fn reconcile(cluster_oauth: Arc<ClusterOAuth>, ctx: Arc<Ctx>) -> Result<Action> {
    info!("Starting reconcile");
    let client = &ctx.client;
    let namespace = cluster_oauth.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let namespace = namespace.as_str();

    finalizer(
        &client.get_api::<ClusterOAuth>(namespace),
        FINALIZER,
        cluster_oauth,
        move |event| async move {
            match event {
                Finalizer::Apply(_) => sync_manifest_work(client, namespace, None).await,
                Finalizer::Cleanup(deleted) => {
                    debug!("Removing deleted ClusterOAuth from the ManifestWork");
                    sync_manifest_work(client, namespace, Some(&deleted.name_any())).await
                }
            }
        },
    )
    .await
    .context(FinalizerSnafu)
}

/// Brings the backplane ManifestWork of `namespace` in line with its ClusterOAuths, ignoring the
/// ClusterOAuth named `deleted`.
async fn sync_manifest_work(
    client: &Client,
    namespace: &str,
    deleted: Option<&str>,
) -> Result<Action> {
    let cluster_oauths = client
        .list::<ClusterOAuth>(namespace, &ListParams::default())
        .await
        .with_context(|_| ListClusterOAuthsSnafu { namespace })?;
    let cluster_oauths = active_cluster_oauths(&cluster_oauths, deleted);

    let manifest_work_ref =
        ObjectRef::<ManifestWork>::new(BACKPLANE_MANIFEST_WORK_NAME).within(namespace);
    let existing = client
        .get_opt::<ManifestWork>(BACKPLANE_MANIFEST_WORK_NAME, namespace)
        .await
        .with_context(|_| GetManifestWorkSnafu {
            manifest_work: manifest_work_ref.clone(),
        })?;

    if cluster_oauths.is_empty() {
        if let Some(existing) = existing.filter(|mw| is_managed(mw.labels())) {
            info!(namespace, "No ClusterOAuth left, deleting the ManifestWork");
            client
                .delete(&existing)
                .await
                .with_context(|_| DeleteManifestWorkSnafu {
                    manifest_work: manifest_work_ref,
                })?;
        }
        return Ok(Action::await_change());
    }

    let oauth = build_oauth(&cluster_oauths);
    let mut secrets = Vec::new();
    for secret_name in referenced_secret_names(&oauth) {
        let secret = client
            .get_opt::<Secret>(secret_name, namespace)
            .await
            .with_context(|_| GetSecretSnafu {
                secret: ObjectRef::<Secret>::new(secret_name).within(namespace),
            })?;
        match secret {
            Some(secret) => secrets.push(secret),
            None => debug!(secret = secret_name, "Referenced client secret does not exist yet"),
        }
    }
    let manifests =
        desired_manifests(&secrets, &oauth).with_context(|_| BuildManifestSnafu { namespace })?;

    let desired = build_manifest_work(
        BACKPLANE_MANIFEST_WORK_NAME,
        namespace,
        managed_by_labels(),
        manifests,
    );
    match existing {
        None => {
            info!(namespace, "Creating the ManifestWork");
            client
                .create(&desired)
                .await
                .with_context(|_| CreateManifestWorkSnafu {
                    manifest_work: manifest_work_ref,
                })?;
        }
        Some(existing) if !manifest_works_equal(Some(&existing), Some(&desired)) => {
            info!(namespace, "Updating the ManifestWork");
            let updated = update_manifest_work(
                &existing,
                managed_by_labels(),
                desired.spec.workload.manifests,
            );
            client
                .replace(&updated)
                .await
                .with_context(|_| UpdateManifestWorkSnafu {
                    manifest_work: manifest_work_ref,
                })?;
        }
        Some(_) => debug!(namespace, "ManifestWork is up to date"),
    }

    Ok(Action::await_change())
}

/// The ClusterOAuths still contributing to the ManifestWork, sorted by name.
///
/// ClusterOAuths being deleted and the one named `deleted` are left out.
pub fn active_cluster_oauths<'a>(
    cluster_oauths: &'a [ClusterOAuth],
    deleted: Option<&str>,
) -> Vec<&'a ClusterOAuth> {
    let mut active: Vec<&ClusterOAuth> = cluster_oauths
        .iter()
        .filter(|cluster_oauth| cluster_oauth.metadata.deletion_timestamp.is_none())
        .filter(|cluster_oauth| deleted != cluster_oauth.metadata.name.as_deref())
        .collect();
    active.sort_by_key(|cluster_oauth| cluster_oauth.name_any());
    active
}

/// Merges the identity providers of all `cluster_oauths` into the cluster OAuth configuration.
pub fn build_oauth(cluster_oauths: &[&ClusterOAuth]) -> OAuth {
    let identity_providers = cluster_oauths
        .iter()
        .flat_map(|cluster_oauth| cluster_oauth.spec.oauth.spec.identity_providers.iter())
        .cloned()
        .collect();

    OAuth::new(CLUSTER_CONFIG_NAME, OAuthSpec { identity_providers })
}

/// Names of the secrets referenced by `oauth`, without duplicates, in reference order.
pub fn referenced_secret_names(oauth: &OAuth) -> Vec<&str> {
    let mut names = Vec::new();
    for name in oauth
        .spec
        .identity_providers
        .iter()
        .flat_map(|idp| idp.secret_names())
    {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Copy of `secret` placed in `openshift-config`, where the cluster OAuth server reads it.
///
/// Only the name and the content are kept; server populated metadata stays behind.
pub fn openshift_config_secret(secret: &Secret) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: secret.metadata.name.clone(),
            namespace: Some(OPENSHIFT_CONFIG_NAMESPACE.to_owned()),
            ..ObjectMeta::default()
        },
        data: secret.data.clone(),
        string_data: secret.string_data.clone(),
        type_: secret.type_.clone(),
        ..Secret::default()
    }
}

/// Manifests shipped to the cluster: the `secrets` moved to `openshift-config`, followed by
/// `oauth`.
pub fn desired_manifests(secrets: &[Secret], oauth: &OAuth) -> Result<Vec<Value>, manifest::Error> {
    secrets
        .iter()
        .map(|secret| to_manifest(&openshift_config_secret(secret)))
        .chain(std::iter::once(to_manifest(oauth)))
        .collect()
}
