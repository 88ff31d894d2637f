//! Building and comparing [`ManifestWork`]s.
//!
//! Manifests are compared the way the work agent applies them: by identity (name, namespace,
//! kind and apiVersion) and by the content carrying root attributes. Server populated fields
//! such as `metadata.resourceVersion` or `status` are ignored.

use std::collections::BTreeMap;

use kube::{Resource, api::ObjectMeta};
use serde::Serialize;
use serde_json::Value;
use snafu::{ResultExt, Snafu};

use crate::crd::ocm::{ManifestWork, ManifestWorkSpec, ManifestsTemplate};

/// Name of the ManifestWork carrying the OAuth configuration of a managed cluster.
pub const BACKPLANE_MANIFEST_WORK_NAME: &str = "idp-backplane";

/// Root attributes holding the content of the manifests this operator ships.
pub const ROOT_ATTRIBUTES: [&str; 8] = [
    "spec",
    "rules",
    "roleRef",
    "subjects",
    "secrets",
    "imagePullSecrets",
    "automountServiceAccountToken",
    "data",
];

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to serialize manifest {name:?}"))]
    SerializeManifest {
        source: serde_json::Error,
        name: String,
    },
}

/// Serializes `resource` into a manifest, making sure `apiVersion` and `kind` are set.
pub fn to_manifest<T>(resource: &T) -> Result<Value>
where
    T: Resource<DynamicType = ()> + Serialize,
{
    let mut manifest = serde_json::to_value(resource).with_context(|_| SerializeManifestSnafu {
        name: resource.meta().name.clone().unwrap_or_default(),
    })?;

    if let Value::Object(object) = &mut manifest {
        object
            .entry("apiVersion")
            .or_insert_with(|| Value::from(T::api_version(&()).into_owned()));
        object
            .entry("kind")
            .or_insert_with(|| Value::from(T::kind(&()).into_owned()));
    }

    Ok(manifest)
}

/// Builds a ManifestWork delivering `manifests` to the cluster owning `namespace`.
pub fn build_manifest_work(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    manifests: Vec<Value>,
) -> ManifestWork {
    ManifestWork {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            namespace: Some(namespace.to_owned()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: ManifestWorkSpec {
            workload: ManifestsTemplate { manifests },
            ..ManifestWorkSpec::default()
        },
    }
}

/// Returns `existing` delivering `manifests` instead, with `labels` added to its own.
///
/// Everything else, including finalizers of the work agent and the resource version, is kept so
/// the result can replace `existing`.
pub fn update_manifest_work(
    existing: &ManifestWork,
    labels: BTreeMap<String, String>,
    manifests: Vec<Value>,
) -> ManifestWork {
    let mut updated = existing.clone();
    updated.metadata.labels.get_or_insert_with(BTreeMap::new).extend(labels);
    updated.spec.workload.manifests = manifests;
    updated
}

/// Returns `true` if both ManifestWorks deliver equivalent manifests, regardless of their order.
///
/// Every manifest of `existing` has to be matched by a distinct manifest of `desired`.
pub fn manifest_works_equal(existing: Option<&ManifestWork>, desired: Option<&ManifestWork>) -> bool {
    let (existing, desired) = match (existing, desired) {
        (None, None) => return true,
        (Some(existing), Some(desired)) => (existing, desired),
        _ => return false,
    };

    let existing = &existing.spec.workload.manifests;
    let desired = &desired.spec.workload.manifests;
    if existing.len() != desired.len() {
        return false;
    }

    let mut used = vec![false; desired.len()];
    existing.iter().all(|manifest| {
        let found = desired
            .iter()
            .enumerate()
            .find(|(index, candidate)| !used[*index] && manifests_equal(manifest, candidate))
            .map(|(index, _)| index);

        match found {
            Some(index) => {
                used[index] = true;
                true
            }
            None => false,
        }
    })
}

/// Returns `true` if both manifests describe the same object with the same content.
///
/// A root attribute counts as different if it is present in only one of the manifests or if its
/// values differ.
pub fn manifests_equal(existing: &Value, desired: &Value) -> bool {
    let (Some(existing), Some(desired)) = (existing.as_object(), desired.as_object()) else {
        return false;
    };

    if identity(existing) != identity(desired) {
        return false;
    }

    ROOT_ATTRIBUTES
        .iter()
        .all(|attribute| existing.get(*attribute) == desired.get(*attribute))
}

/// Name, namespace, kind and apiVersion of a manifest. Missing fields count as empty.
fn identity<'a>(object: &'a serde_json::Map<String, Value>) -> [&'a str; 4] {
    let field = |value: Option<&'a Value>| value.and_then(Value::as_str).unwrap_or_default();
    let metadata = object.get("metadata");

    [
        field(metadata.and_then(|m| m.get("name"))),
        field(metadata.and_then(|m| m.get("namespace"))),
        field(object.get("kind")),
        field(object.get("apiVersion")),
    ]
}
