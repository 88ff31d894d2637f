//! A structure containing the resources derived from one owner.

use std::{
    collections::{BTreeMap, HashMap, hash_map::Values},
    fmt::{self, Debug, Display, Formatter},
};

use kube::{Resource, ResourceExt};
use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    client::{self, Client, GetApi},
    labels,
};

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("resource {resource} is missing the label {label:?}"))]
    MissingLabel { resource: String, label: String },

    #[snafu(display(
        "resource {resource} has label {label:?} set to {actual_content:?} instead of {expected_content:?}"
    ))]
    UnexpectedLabelContent {
        resource: String,
        label: String,
        expected_content: String,
        actual_content: String,
    },

    #[snafu(display("failed to apply {resource}"))]
    ApplyResource {
        source: client::Error,
        resource: String,
    },

    #[snafu(display("failed to list deployed resources"))]
    ListDeployedResources { source: client::Error },

    #[snafu(display("failed to delete orphaned {resource}"))]
    DeleteOrphanedResource {
        source: client::Error,
        resource: String,
    },
}

/// A structure containing the resources of one kind derived from one owner.
///
/// Updating applies every contained resource and deletes the deployed resources which carry the
/// owner labels but are no longer contained. With a namespace the orphan search is limited to that
/// namespace, without one it spans all namespaces, e.g. for resources placed in the namespaces
/// of managed clusters.
///
/// ```ignore
/// let mut dex_clients = ClusterResources::new(
///     authrealm_labels(&authrealm.name_any(), &namespace)?,
///     Some(&namespace),
///     &desired_dex_clients,
/// )?;
/// dex_clients.update(&client).await?;
/// ```
#[derive(Debug, Eq, PartialEq)]
pub struct ClusterResources<T> {
    owner_labels: BTreeMap<String, String>,
    namespace: Option<String>,
    resources: ResourceSet<T>,
}

impl<T> ClusterResources<T>
where
    T: Clone + Debug + DeserializeOwned + GetApi<Namespace = str> + Serialize,
    <T as Resource>::DynamicType: Default,
{
    /// Constructs new `ClusterResources`.
    ///
    /// # Arguments
    ///
    /// * `owner_labels` - Labels every resource of the owner carries, see
    ///   [`labels::authrealm_labels`]
    /// * `namespace` - Namespace to look for orphans in, `None` for all namespaces
    /// * `resources` - All resources the owner consists of; Deployed resources which are not
    ///   included in this list are considered orphaned and deleted when `update` is called.
    ///
    /// # Errors
    ///
    /// If the labels of the given resources do not contain the owner labels then an
    /// `Error::MissingLabel` or `Error::UnexpectedLabelContent` is returned.
    pub fn new(
        owner_labels: BTreeMap<String, String>,
        namespace: Option<&str>,
        resources: &[T],
    ) -> Result<Self> {
        for resource in resources {
            Self::check_labels(&owner_labels, resource)?;
        }

        Ok(ClusterResources {
            owner_labels,
            namespace: namespace.map(str::to_owned),
            resources: resources.into(),
        })
    }

    /// Checks that `resource` carries every owner label with the expected content.
    fn check_labels(owner_labels: &BTreeMap<String, String>, resource: &T) -> Result<()> {
        let labels = resource.labels();

        for (label, expected_content) in owner_labels {
            match labels.get(label) {
                Some(actual_content) if actual_content == expected_content => {}
                Some(actual_content) => {
                    return UnexpectedLabelContentSnafu {
                        resource: ResourceId::from(resource).to_string(),
                        label,
                        expected_content,
                        actual_content,
                    }
                    .fail();
                }
                None => {
                    return MissingLabelSnafu {
                        resource: ResourceId::from(resource).to_string(),
                        label,
                    }
                    .fail();
                }
            }
        }

        Ok(())
    }

    /// Updates the cluster according to the resources given in this structure.
    ///
    /// The given resources are applied and all orphaned resources, i.e. resources which carry
    /// the owner labels but are not contained in the given resources, are deleted.
    pub async fn update(&mut self, client: &Client) -> Result<()> {
        let mut applied = Vec::new();
        for resource in self.resources.iter() {
            let applied_resource = client
                .apply_patch(resource)
                .await
                .with_context(|_| ApplyResourceSnafu {
                    resource: ResourceId::from(resource).to_string(),
                })?;
            applied.push(applied_resource);
        }
        self.resources = applied.as_slice().into();

        self.delete_orphaned_resources(client).await
    }

    /// Deletes all deployed resources which are labelled as if they belong to the owner but are
    /// not contained in this structure.
    async fn delete_orphaned_resources(&self, client: &Client) -> Result<()> {
        let deployed_resources = self.list_deployed_resources(client).await?;

        let orphaned_resources = deployed_resources.subtract(&self.resources);

        if orphaned_resources.is_empty() {
            debug!("No orphaned {} found", T::plural(&Default::default()));
            return Ok(());
        }

        info!(
            "Deleting orphaned {}: {}",
            T::plural(&Default::default()),
            orphaned_resources
        );
        for resource in orphaned_resources.iter() {
            client
                .delete(resource)
                .await
                .with_context(|_| DeleteOrphanedResourceSnafu {
                    resource: ResourceId::from(resource).to_string(),
                })?;
        }

        Ok(())
    }

    /// Lists the deployed resources carrying all owner labels.
    async fn list_deployed_resources(&self, client: &Client) -> Result<ResourceSet<T>> {
        let label_selector = labels::selector_for(&self.owner_labels);

        let resources = client
            .list_with_label_selector::<T>(self.namespace.as_deref(), &label_selector)
            .await
            .context(ListDeployedResourcesSnafu)?;

        Ok(resources.as_slice().into())
    }
}

/// Set of resources keyed by their resource IDs
#[derive(Debug)]
struct ResourceSet<T>(HashMap<ResourceId, T>);

impl<T> Eq for ResourceSet<T> {}

impl<T> PartialEq for ResourceSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.keys().all(|id| other.0.contains_key(id))
    }
}

impl<T> From<&[T]> for ResourceSet<T>
where
    T: Clone + Resource,
{
    fn from(resources: &[T]) -> Self {
        Self(
            resources
                .iter()
                .map(|r| (ResourceId::from(r), r.to_owned()))
                .collect(),
        )
    }
}

impl<T> Display for ResourceSet<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let mut resource_id_strings = self.0.keys().map(ResourceId::to_string).collect::<Vec<_>>();
        resource_id_strings.sort();
        write!(f, "{}", resource_id_strings.join(", "))
    }
}

impl<T> ResourceSet<T>
where
    T: Clone + Resource,
{
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the set contains the given resource, false otherwise.
    fn contains(&self, resource: &T) -> bool {
        self.0.contains_key(&resource.into())
    }

    /// Returns the difference of this resource set and the given one.
    ///
    /// The resources are compared by their resource ID. The result contains the resources from
    /// this set.
    fn subtract(&self, other: &ResourceSet<T>) -> ResourceSet<T> {
        self.iter()
            .filter(|resource| !other.contains(resource))
            .cloned()
            .collect::<Vec<_>>()
            .as_slice()
            .into()
    }

    /// Returns an iterator over the resources contained in this set.
    fn iter(&self) -> Values<'_, ResourceId, T> {
        self.0.values()
    }
}

/// A resource ID solely consisting of namespace and name.
#[derive(Debug, Eq, Hash, PartialEq)]
struct ResourceId {
    namespace: Option<String>,
    name: String,
}

impl<T> From<&T> for ResourceId
where
    T: Resource,
{
    fn from(resource: &T) -> Self {
        Self {
            namespace: resource.namespace(),
            name: resource.name_any(),
        }
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(namespace) = &self.namespace {
            write!(f, ".{namespace}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Secret;
    use kube::core::ObjectMeta;

    use crate::crd::ocm::ManagedCluster;

    mod cluster_resources_tests {
        use super::{super::*, *};
        use crate::labels::{K8S_APP_INSTANCE_KEY, authrealm_labels};

        #[test]
        fn cluster_resources_can_be_created_from_labelled_resources() {
            let owner_labels = authrealm_labels("realm", "realm-ns").unwrap();
            let secret = create_secret("cluster1", "github-realm", owner_labels.clone());

            let cluster_resources =
                ClusterResources::new(owner_labels.clone(), None, &[secret.clone()])
                    .expect("no error");

            assert_eq!(
                ClusterResources {
                    owner_labels,
                    namespace: None,
                    resources: [secret].as_ref().into(),
                },
                cluster_resources
            );
        }

        #[test]
        fn error_is_returned_when_label_is_missing() {
            let owner_labels = authrealm_labels("realm", "realm-ns").unwrap();
            let mut labels = owner_labels.clone();
            labels.remove(K8S_APP_INSTANCE_KEY);
            let secret = create_secret("cluster1", "github-realm", labels);

            let result = ClusterResources::new(owner_labels, None, &[secret]);

            match result {
                Err(Error::MissingLabel { resource, label }) => {
                    assert_eq!("github-realm.cluster1", resource);
                    assert_eq!(K8S_APP_INSTANCE_KEY, label);
                }
                _ => panic!("Error::MissingLabel expected"),
            }
        }

        #[test]
        fn error_is_returned_when_label_content_is_wrong() {
            let owner_labels = authrealm_labels("realm", "realm-ns").unwrap();
            let secret = create_secret(
                "cluster1",
                "github-other",
                authrealm_labels("other", "realm-ns").unwrap(),
            );

            let result = ClusterResources::new(owner_labels, Some("cluster1"), &[secret]);

            match result {
                Err(Error::UnexpectedLabelContent {
                    label,
                    expected_content,
                    actual_content,
                    ..
                }) => {
                    assert_eq!(K8S_APP_INSTANCE_KEY, label);
                    assert_eq!("realm", expected_content);
                    assert_eq!("other", actual_content);
                }
                _ => panic!("Error::UnexpectedLabelContent expected"),
            }
        }
    }

    mod resourceset_tests {
        use std::collections::BTreeMap;

        use k8s_openapi::ByteString;

        use super::{super::*, *};

        #[test]
        fn resourcesets_are_equal_up_to_the_resource_ids() {
            let resource1a = Secret {
                data: None,
                ..create_secret("namespace", "resource1", BTreeMap::new())
            };
            let resource1b = Secret {
                data: Some(BTreeMap::from([(
                    "clientSecret".to_owned(),
                    ByteString(b"s3cr3t".to_vec()),
                )])),
                ..create_secret("namespace", "resource1", BTreeMap::new())
            };
            let resource2 = create_secret("namespace", "resource2", BTreeMap::new());

            let resourceset1a = ResourceSet::from([resource1a].as_ref());
            let resourceset1b = ResourceSet::from([resource1b].as_ref());
            let resourceset2 = ResourceSet::from([resource2].as_ref());

            assert_eq!(resourceset1a, resourceset1b);
            assert_ne!(resourceset1a, resourceset2);
        }

        #[test]
        fn resourceset_can_be_displayed() {
            let resource1 = create_secret("cluster1", "resource1", BTreeMap::new());
            let resource2 = create_secret("cluster2", "resource1", BTreeMap::new());

            let resourceset1 = ResourceSet::from(Vec::<Secret>::new().as_ref());
            let resourceset2 = ResourceSet::from([resource1.to_owned()].as_ref());
            let resourceset3 = ResourceSet::from([resource1, resource2].as_ref());

            assert_eq!("", resourceset1.to_string());
            assert_eq!("resource1.cluster1", resourceset2.to_string());
            assert_eq!(
                "resource1.cluster1, resource1.cluster2",
                resourceset3.to_string()
            );
        }

        #[test]
        fn resourceset_can_be_checked_for_emptiness() {
            let resource1 = create_secret("namespace", "resource1", BTreeMap::new());

            let resourceset1 = ResourceSet::from(Vec::<Secret>::new().as_ref());
            let resourceset2 = ResourceSet::from([resource1].as_ref());

            assert!(resourceset1.is_empty());
            assert!(!resourceset2.is_empty());
        }

        #[test]
        fn equally_named_resources_in_different_namespaces_are_distinct() {
            let resource1 = create_secret("cluster1", "github-realm", BTreeMap::new());
            let resource2 = create_secret("cluster2", "github-realm", BTreeMap::new());

            let resourceset = ResourceSet::from([resource1.to_owned()].as_ref());

            assert!(resourceset.contains(&resource1));
            assert!(!resourceset.contains(&resource2));
        }

        #[test]
        fn set_difference_of_two_resourcesets_can_be_built() {
            let resource1 = create_secret("namespace", "resource1", BTreeMap::new());
            let resource2 = create_secret("namespace", "resource2", BTreeMap::new());
            let resource3 = create_secret("namespace", "resource3", BTreeMap::new());

            let resourceset1 =
                ResourceSet::from([resource1.to_owned(), resource2.to_owned()].as_ref());
            let resourceset2 =
                ResourceSet::from([resource2.to_owned(), resource3.to_owned()].as_ref());

            let set_difference = resourceset1.subtract(&resourceset2);

            assert!(set_difference.contains(&resource1));
            assert!(!set_difference.contains(&resource2));
            assert!(!set_difference.contains(&resource3));
        }

        #[test]
        fn resourcesets_are_iterable() {
            let resource = create_secret("namespace", "resource", BTreeMap::new());

            let resourceset = ResourceSet::from([resource.to_owned()].as_ref());

            assert_eq!(Some(&resource), resourceset.iter().next());
        }
    }

    mod resourceid_tests {
        use std::collections::BTreeMap;

        use super::{super::*, *};

        #[test]
        fn display_namespaced_resourceid() {
            let resource = create_secret("namespace", "name", BTreeMap::new());

            assert_eq!("name.namespace", ResourceId::from(&resource).to_string());
        }

        #[test]
        fn display_non_namespaced_resourceid() {
            let resource = ManagedCluster {
                metadata: ObjectMeta {
                    name: Some("cluster1".into()),
                    ..Default::default()
                },
                spec: Default::default(),
            };

            assert_eq!("cluster1", ResourceId::from(&resource).to_string());
        }
    }

    fn create_secret(
        namespace: &str,
        name: &str,
        labels: std::collections::BTreeMap<String, String>,
    ) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
