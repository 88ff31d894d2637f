use std::fmt::Debug;

use either::Either;
use k8s_openapi::{
    ClusterResourceScope, NamespaceResourceScope,
    apimachinery::pkg::apis::meta::v1::LabelSelector,
};
use kube::{
    Api, Resource, ResourceExt,
    api::{DeleteParams, ListParams, Patch, PatchParams, PostParams},
    client::Client as KubeClient,
    core::Status,
};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{OptionExt, ResultExt, Snafu};
use tracing::trace;

use crate::labels::{LabelSelectorExt, SelectorError};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create kubernetes client"))]
    CreateKubeClient { source: kube::Error },

    #[snafu(display("object is missing key {key:?}"))]
    MissingObjectKey { key: &'static str },

    #[snafu(display("failed to list resources"))]
    ListResources { source: kube::Error },

    #[snafu(display("failed to get resource"))]
    GetResource { source: kube::Error },

    #[snafu(display("failed to create resource"))]
    CreateResource { source: kube::Error },

    #[snafu(display("failed to replace resource"))]
    ReplaceResource { source: kube::Error },

    #[snafu(display("failed to apply patch"))]
    ApplyPatch { source: kube::Error },

    #[snafu(display("failed to patch status"))]
    PatchStatus { source: kube::Error },

    #[snafu(display("failed to delete resource"))]
    DeleteResource { source: kube::Error },

    #[snafu(display("failed to convert label selector"))]
    LabelSelector { source: SelectorError },
}

/// This `Client` can be used to access Kubernetes.
///
/// It wraps an underlying [`kube::client::Client`] and provides some common functionality. All
/// writes are done with the field manager passed to [`Client::new`].
#[derive(Clone)]
pub struct Client {
    client: KubeClient,
    field_manager: String,
    post_params: PostParams,
    delete_params: DeleteParams,
}

impl Client {
    pub fn new(client: KubeClient, field_manager: impl Into<String>) -> Self {
        let field_manager = field_manager.into();

        Self {
            client,
            post_params: PostParams {
                field_manager: Some(field_manager.clone()),
                ..PostParams::default()
            },
            delete_params: DeleteParams::default(),
            field_manager,
        }
    }

    /// Returns a [`kube::client::Client`] that can be freely used.
    /// It does not need to be cloned before first use.
    pub fn as_kube_client(&self) -> KubeClient {
        self.client.clone()
    }

    /// Retrieves a single instance of the requested resource type with the given name.
    ///
    /// Returns `None` if the resource does not exist.
    pub async fn get_opt<T>(&self, resource_name: &str, namespace: &T::Namespace) -> Result<Option<T>>
    where
        T: Clone + Debug + DeserializeOwned + GetApi,
        <T as Resource>::DynamicType: Default,
    {
        self.get_api(namespace)
            .get_opt(resource_name)
            .await
            .context(GetResourceSnafu)
    }

    /// Returns `Ok(true)` if the resource has been registered in Kubernetes, `Ok(false)` otherwise.
    pub async fn resource_exists<T>(&self, resource_name: &str, namespace: &T::Namespace) -> Result<bool>
    where
        T: Clone + Debug + DeserializeOwned + GetApi,
        <T as Resource>::DynamicType: Default,
    {
        Ok(self.get_opt::<T>(resource_name, namespace).await?.is_some())
    }

    /// Retrieves all instances of the requested resource type.
    pub async fn list<T>(&self, namespace: &T::Namespace, list_params: &ListParams) -> Result<Vec<T>>
    where
        T: Clone + Debug + DeserializeOwned + GetApi,
        <T as Resource>::DynamicType: Default,
    {
        Ok(self
            .get_api(namespace)
            .list(list_params)
            .await
            .context(ListResourcesSnafu)?
            .items)
    }

    /// Retrieves all instances of the requested resource type across all namespaces.
    pub async fn list_all<T>(&self, list_params: &ListParams) -> Result<Vec<T>>
    where
        T: Clone + Debug + DeserializeOwned + Resource,
        <T as Resource>::DynamicType: Default,
    {
        Ok(self
            .get_all_api::<T>()
            .list(list_params)
            .await
            .context(ListResourcesSnafu)?
            .items)
    }

    /// Lists resources matching the given label selector, either in one namespace or, when
    /// `namespace` is `None`, across all namespaces.
    pub async fn list_with_label_selector<T>(
        &self,
        namespace: Option<&T::Namespace>,
        selector: &LabelSelector,
    ) -> Result<Vec<T>>
    where
        T: Clone + Debug + DeserializeOwned + GetApi,
        <T as Resource>::DynamicType: Default,
    {
        let selector_string = selector.to_query_string().context(LabelSelectorSnafu)?;
        trace!("Listing for LabelSelector [{}]", selector_string);
        let list_params = ListParams::default().labels(&selector_string);

        match namespace {
            Some(namespace) => self.list(namespace, &list_params).await,
            None => self.list_all(&list_params).await,
        }
    }

    /// Creates a new resource.
    pub async fn create<T>(&self, resource: &T) -> Result<T>
    where
        T: Clone + Debug + DeserializeOwned + GetApi + Serialize,
        <T as Resource>::DynamicType: Default,
    {
        self.get_api(resource.get_namespace())
            .create(&self.post_params, resource)
            .await
            .context(CreateResourceSnafu)
    }

    /// Patches a resource using the server-side `APPLY` patch strategy.
    ///
    /// This will _create_ or _update_ the resource. Conflicting field owners are overridden.
    pub async fn apply_patch<T>(&self, resource: &T) -> Result<T>
    where
        T: Clone + Debug + DeserializeOwned + GetApi + Serialize,
        <T as Resource>::DynamicType: Default,
    {
        let name = resource.meta().name.as_deref().context(MissingObjectKeySnafu { key: "name" })?;

        self.get_api(resource.get_namespace())
            .patch(
                name,
                &PatchParams::apply(&self.field_manager).force(),
                &Patch::Apply(resource),
            )
            .await
            .context(ApplyPatchSnafu)
    }

    /// Replaces a resource.
    ///
    /// This will _update_ an existing resource. The `resourceVersion` carried by `resource` must
    /// still be current.
    pub async fn replace<T>(&self, resource: &T) -> Result<T>
    where
        T: Clone + Debug + DeserializeOwned + GetApi + Serialize,
        <T as Resource>::DynamicType: Default,
    {
        let name = resource.meta().name.as_deref().context(MissingObjectKeySnafu { key: "name" })?;

        self.get_api(resource.get_namespace())
            .replace(name, &self.post_params, resource)
            .await
            .context(ReplaceResourceSnafu)
    }

    /// Merges the given `status` into the status subresource of `resource`.
    pub async fn merge_patch_status<T, S>(&self, resource: &T, status: &S) -> Result<T>
    where
        T: Clone + Debug + DeserializeOwned + GetApi,
        <T as Resource>::DynamicType: Default,
        S: Debug + Serialize,
    {
        let name = resource.meta().name.as_deref().context(MissingObjectKeySnafu { key: "name" })?;
        let patch = serde_json::json!({ "status": status });

        self.get_api(resource.get_namespace())
            .patch_status(
                name,
                &PatchParams {
                    field_manager: Some(self.field_manager.clone()),
                    ..PatchParams::default()
                },
                &Patch::Merge(patch),
            )
            .await
            .context(PatchStatusSnafu)
    }

    /// Deletes a resource.
    ///
    /// Which of the two results this returns depends on the API. Some `delete` endpoints return
    /// the object and others return a `Status` object. A resource that is already gone is not an
    /// error.
    pub async fn delete<T>(&self, resource: &T) -> Result<Option<Either<T, Status>>>
    where
        T: Clone + Debug + DeserializeOwned + GetApi,
        <T as Resource>::DynamicType: Default,
    {
        let api: Api<T> = self.get_api(resource.get_namespace());
        match api.delete(&resource.name_any(), &self.delete_params).await {
            Ok(deleted) => Ok(Some(deleted)),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
            Err(source) => Err(Error::DeleteResource { source }),
        }
    }

    /// Returns an [`Api`] object which is either namespaced or not depending on the scope of `T`.
    pub fn get_api<T>(&self, namespace: &T::Namespace) -> Api<T>
    where
        T: GetApi,
        <T as Resource>::DynamicType: Default,
    {
        T::get_api(self.client.clone(), namespace)
    }

    pub fn get_all_api<T>(&self) -> Api<T>
    where
        T: Resource,
        <T as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

/// Gets an [`Api`] for a resource that is either namespaced or cluster-scoped.
///
/// Namespaced resources take a `&str` namespace, cluster-scoped resources take `&()`.
pub trait GetApi: Resource + Sized {
    /// The namespace type for `Self`'s scope.
    type Namespace: ?Sized;

    fn get_api(client: KubeClient, ns: &Self::Namespace) -> Api<Self>
    where
        Self::DynamicType: Default;

    fn get_namespace(&self) -> &Self::Namespace;
}

#[doc(hidden)]
pub trait GetApiImpl {
    type Resource: Resource;
    type Namespace: ?Sized;

    fn get_api(client: KubeClient, ns: &Self::Namespace) -> Api<Self::Resource>
    where
        <Self::Resource as Resource>::DynamicType: Default;

    fn get_namespace(res: &Self::Resource) -> &Self::Namespace;
}

impl<K> GetApiImpl for (K, NamespaceResourceScope)
where
    K: Resource<Scope = NamespaceResourceScope>,
{
    type Namespace = str;
    type Resource = K;

    fn get_api(client: KubeClient, ns: &str) -> Api<K>
    where
        K::DynamicType: Default,
    {
        Api::namespaced(client, ns)
    }

    fn get_namespace(res: &K) -> &str {
        res.meta().namespace.as_deref().unwrap_or_default()
    }
}

impl<K> GetApiImpl for (K, ClusterResourceScope)
where
    K: Resource<Scope = ClusterResourceScope>,
{
    type Namespace = ();
    type Resource = K;

    fn get_api(client: KubeClient, _ns: &()) -> Api<K>
    where
        K::DynamicType: Default,
    {
        Api::all(client)
    }

    fn get_namespace(_res: &K) -> &() {
        &()
    }
}

impl<K, Scope> GetApi for K
where
    K: Resource<Scope = Scope>,
    (K, Scope): GetApiImpl<Resource = K>,
{
    type Namespace = <(K, Scope) as GetApiImpl>::Namespace;

    fn get_api(client: KubeClient, ns: &Self::Namespace) -> Api<Self>
    where
        Self::DynamicType: Default,
    {
        <(K, Scope) as GetApiImpl>::get_api(client, ns)
    }

    fn get_namespace(&self) -> &Self::Namespace {
        <(K, Scope) as GetApiImpl>::get_namespace(self)
    }
}

/// Creates a [`Client`] from the default kubeconfig or in-cluster configuration.
pub async fn initialize_operator(field_manager: impl Into<String>) -> Result<Client> {
    let kube_client = KubeClient::try_default()
        .await
        .context(CreateKubeClientSnafu)?;

    Ok(Client::new(kube_client, field_manager))
}
