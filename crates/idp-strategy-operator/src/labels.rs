//! Label keys used on derived resources and conversion of [`LabelSelector`]s into the query
//! string format of the Kubernetes API.

use std::{collections::BTreeMap, sync::LazyLock};

use const_format::concatcp;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use regex::Regex;
use snafu::{Snafu, ensure};

use crate::OPERATOR_NAME;

const K8S_APP_KEY_PREFIX: &str = "app.kubernetes.io/";
const IDENTITATEM_KEY_PREFIX: &str = "identityconfig.identitatem.io/";

/// The well-known Kubernetes app name key. Always set to [`APP_NAME`].
pub const K8S_APP_NAME_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "name");

/// The well-known Kubernetes app instance key. Set to the name of the owning AuthRealm.
pub const K8S_APP_INSTANCE_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "instance");

/// The well-known Kubernetes app managed-by key. Always set to [`OPERATOR_NAME`].
pub const K8S_APP_MANAGED_BY_KEY: &str = concatcp!(K8S_APP_KEY_PREFIX, "managed-by");

/// Namespace of the owning AuthRealm, so equally named realms in different namespaces don't
/// claim each other's resources.
pub const AUTHREALM_NAMESPACE_KEY: &str = concatcp!(IDENTITATEM_KEY_PREFIX, "authrealm-namespace");

/// Managed cluster a DexClient was registered for.
pub const CLUSTER_KEY: &str = "cluster";

/// Identity provider a DexClient was registered for.
pub const IDP_KEY: &str = "idp";

/// Label OCM puts on a PlacementDecision pointing back to its Placement.
pub const PLACEMENT_KEY: &str = "cluster.open-cluster-management.io/placement";

/// Cluster label set by the governance addon when the policy controller is available.
pub const POLICY_CONTROLLER_FEATURE_KEY: &str =
    "feature.open-cluster-management.io/addon-policy-controller";

pub const APP_NAME: &str = "idp-strategy";

const LABEL_VALUE_MAX_LEN: usize = 63;

static LABEL_VALUE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9A-Z]([a-z0-9A-Z-_.]*[a-z0-9A-Z]+)?$")
        .expect("failed to compile label value regex")
});

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum LabelValueError {
    #[snafu(display(
        "label value {value:?} exceeds the maximum length - expected 63 characters or less, got {length}"
    ))]
    ValueTooLong { value: String, length: usize },

    #[snafu(display("label value {value:?} violates the Kubernetes label format"))]
    ValueInvalid { value: String },
}

/// Object names may be longer than a label value or contain characters labels reject, so every
/// name turned into a label value goes through here.
pub fn validate_label_value(value: &str) -> Result<(), LabelValueError> {
    ensure!(
        value.len() <= LABEL_VALUE_MAX_LEN,
        ValueTooLongSnafu {
            value,
            length: value.len()
        }
    );
    ensure!(
        value.is_empty() || LABEL_VALUE_REGEX.is_match(value),
        ValueInvalidSnafu { value }
    );
    Ok(())
}

/// Returns the labels identifying resources derived from the AuthRealm `name` in `namespace`.
pub fn authrealm_labels(
    name: &str,
    namespace: &str,
) -> Result<BTreeMap<String, String>, LabelValueError> {
    validate_label_value(name)?;
    validate_label_value(namespace)?;

    Ok(BTreeMap::from([
        (K8S_APP_NAME_KEY.to_owned(), APP_NAME.to_owned()),
        (K8S_APP_INSTANCE_KEY.to_owned(), name.to_owned()),
        (K8S_APP_MANAGED_BY_KEY.to_owned(), OPERATOR_NAME.to_owned()),
        (AUTHREALM_NAMESPACE_KEY.to_owned(), namespace.to_owned()),
    ]))
}

/// Returns the labels marking a resource as managed by this operator without tying it to an
/// AuthRealm.
pub fn managed_by_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_APP_NAME_KEY.to_owned(), APP_NAME.to_owned()),
        (K8S_APP_MANAGED_BY_KEY.to_owned(), OPERATOR_NAME.to_owned()),
    ])
}

/// Returns `true` if `labels` marks a resource as managed by this operator.
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.get(K8S_APP_MANAGED_BY_KEY).map(String::as_str) == Some(OPERATOR_NAME)
}

type Result<T, E = SelectorError> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Eq, Snafu)]
pub enum SelectorError {
    #[snafu(display("label selector with binary operator {operator:?} must have values"))]
    BinaryOperatorWithoutValues { operator: String },

    #[snafu(display("label selector with unary operator {operator:?} must not have values"))]
    UnaryOperatorWithValues { operator: String },

    #[snafu(display("label selector has an invalid operator {operator:?}"))]
    InvalidOperator { operator: String },
}

pub trait LabelSelectorExt {
    /// Converts the selector into the `labelSelector` query parameter format, e.g.
    /// `a=b,c in (d, e),!f`.
    fn to_query_string(&self) -> Result<String>;
}

impl LabelSelectorExt for LabelSelector {
    fn to_query_string(&self) -> Result<String> {
        let mut terms: Vec<String> = self
            .match_labels
            .iter()
            .flatten()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        for requirement in self.match_expressions.iter().flatten() {
            let values = requirement.values.as_deref().unwrap_or_default();
            let term = match requirement.operator.as_str() {
                operator @ ("In" | "NotIn") => {
                    if values.is_empty() {
                        return BinaryOperatorWithoutValuesSnafu { operator }.fail();
                    }
                    format!(
                        "{} {} ({})",
                        requirement.key,
                        operator.to_ascii_lowercase(),
                        values.join(", ")
                    )
                }
                operator @ ("Exists" | "DoesNotExist") => {
                    if !values.is_empty() {
                        return UnaryOperatorWithValuesSnafu { operator }.fail();
                    }
                    if operator == "Exists" {
                        requirement.key.clone()
                    } else {
                        format!("!{}", requirement.key)
                    }
                }
                operator => return InvalidOperatorSnafu { operator }.fail(),
            };
            terms.push(term);
        }

        Ok(terms.join(","))
    }
}

/// Returns a [`LabelSelector`] that matches exactly the given labels.
pub fn selector_for(labels: &BTreeMap<String, String>) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels.clone()),
        match_expressions: None,
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;
    use rstest::rstest;

    use super::*;

    fn requirement(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_owned(),
            operator: operator.to_owned(),
            values: (!values.is_empty())
                .then(|| values.iter().map(|value| (*value).to_owned()).collect()),
        }
    }

    #[test]
    fn query_string_contains_labels_and_expressions() {
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([
                ("cluster".to_owned(), "c1".to_owned()),
                ("idp".to_owned(), "github".to_owned()),
            ])),
            match_expressions: Some(vec![
                requirement(POLICY_CONTROLLER_FEATURE_KEY, "NotIn", &["available"]),
                requirement("vendor", "In", &["OpenShift", "Other"]),
                requirement("region", "Exists", &[]),
                requirement("legacy", "DoesNotExist", &[]),
            ]),
        };

        assert_eq!(
            selector.to_query_string().unwrap(),
            "cluster=c1,idp=github,\
             feature.open-cluster-management.io/addon-policy-controller notin (available),\
             vendor in (OpenShift, Other),region,!legacy"
        );
    }

    #[test]
    fn empty_selector_gives_empty_query_string() {
        assert_eq!(LabelSelector::default().to_query_string().unwrap(), "");
    }

    #[rstest]
    #[case::in_without_values(
        requirement("a", "In", &[]),
        SelectorError::BinaryOperatorWithoutValues { operator: "In".to_owned() }
    )]
    #[case::exists_with_values(
        requirement("a", "Exists", &["b"]),
        SelectorError::UnaryOperatorWithValues { operator: "Exists".to_owned() }
    )]
    #[case::unknown_operator(
        requirement("a", "Near", &["b"]),
        SelectorError::InvalidOperator { operator: "Near".to_owned() }
    )]
    fn invalid_selectors_are_rejected(
        #[case] invalid: LabelSelectorRequirement,
        #[case] expected: SelectorError,
    ) {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![invalid]),
        };

        assert_eq!(selector.to_query_string(), Err(expected));
    }

    #[test]
    fn authrealm_labels_are_managed() {
        let labels = authrealm_labels("realm", "ns").unwrap();

        assert!(is_managed(&labels));
        assert_eq!(labels.get(K8S_APP_INSTANCE_KEY).map(String::as_str), Some("realm"));
        assert_eq!(labels.get(AUTHREALM_NAMESPACE_KEY).map(String::as_str), Some("ns"));
        assert!(!is_managed(&BTreeMap::new()));
    }

    #[rstest]
    #[case::too_long(
        "r".repeat(64),
        LabelValueError::ValueTooLong { value: "r".repeat(64), length: 64 }
    )]
    #[case::trailing_dash(
        "realm-".to_owned(),
        LabelValueError::ValueInvalid { value: "realm-".to_owned() }
    )]
    #[case::space(
        "GitHub Login".to_owned(),
        LabelValueError::ValueInvalid { value: "GitHub Login".to_owned() }
    )]
    fn invalid_label_values_are_rejected(#[case] value: String, #[case] expected: LabelValueError) {
        assert_eq!(validate_label_value(&value), Err(expected));
    }

    #[test]
    fn long_authrealm_name_cannot_become_label() {
        let name = format!("{}.example", "realm".repeat(12));

        let result = authrealm_labels(&name, "realm-ns");

        assert_eq!(
            result,
            Err(LabelValueError::ValueTooLong {
                length: name.len(),
                value: name,
            })
        );
        assert!(authrealm_labels(&"r".repeat(63), "realm-ns").is_ok());
    }
}
