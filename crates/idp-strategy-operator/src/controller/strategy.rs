//! Generates the Placement selecting the clusters a [`Strategy`] applies to.
//!
//! The generated Placement narrows the AuthRealm's Placement down to the clusters the strategy
//! type can serve: clusters without the governance policy controller for `backplane`, clusters
//! with it for `grc`.

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    Condition, LabelSelector, LabelSelectorRequirement,
};
use kube::{
    Resource, ResourceExt,
    core::DynamicObject,
    runtime::{controller::Action, reflector::ObjectRef},
};
use snafu::{OptionExt, ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};
use tracing::{debug, info};

use crate::{
    client::{self, Client},
    controller::Ctx,
    crd::{
        AuthRealm, LocalObjectReference, Strategy, StrategyStatus, StrategyType,
        ocm::{ClusterPredicate, ClusterSelector, Placement, PlacementSpec},
    },
    labels::{LabelValueError, POLICY_CONTROLLER_FEATURE_KEY, authrealm_labels},
    logging::{controller::ReconcilerError, error_chain_message},
    status::condition::{
        ConditionStatus, PLACEMENT_CREATED, REASON_FAILED, REASON_SUCCEED, build_condition,
        set_condition,
    },
};

pub const CONTROLLER_NAME: &str = "strategy";

/// Value of [`POLICY_CONTROLLER_FEATURE_KEY`] on clusters running the policy controller.
pub const POLICY_CONTROLLER_AVAILABLE: &str = "available";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("{strategy} is not owned by an AuthRealm"))]
    MissingAuthRealmOwner { strategy: ObjectRef<Strategy> },

    #[snafu(display("failed to get {authrealm}"))]
    GetAuthRealm {
        source: client::Error,
        authrealm: ObjectRef<AuthRealm>,
    },

    #[snafu(display("{authrealm} does not exist"))]
    AuthRealmNotFound { authrealm: ObjectRef<AuthRealm> },

    #[snafu(display("{authrealm} does not reference a Placement"))]
    MissingPlacementRef { authrealm: ObjectRef<AuthRealm> },

    #[snafu(display("failed to get {placement}"))]
    GetPlacement {
        source: client::Error,
        placement: ObjectRef<Placement>,
    },

    #[snafu(display("{placement} does not exist"))]
    PlacementNotFound { placement: ObjectRef<Placement> },

    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef,

    #[snafu(display("{authrealm} cannot label its derived resources"))]
    InvalidOwnerLabels {
        source: LabelValueError,
        authrealm: ObjectRef<AuthRealm>,
    },

    #[snafu(display("failed to apply {placement}"))]
    ApplyPlacement {
        source: client::Error,
        placement: ObjectRef<Placement>,
    },

    #[snafu(display("failed to delete the previously generated {placement}"))]
    DeleteStalePlacement {
        source: client::Error,
        placement: ObjectRef<Placement>,
    },

    #[snafu(display("failed to set the placement reference of {strategy}"))]
    UpdateStrategy {
        source: client::Error,
        strategy: ObjectRef<Strategy>,
    },

    #[snafu(display("failed to update the status of {strategy}"))]
    UpdateStatus {
        source: client::Error,
        strategy: ObjectRef<Strategy>,
    },
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        match self {
            Error::ObjectHasNoNamespace => None,
            Error::MissingAuthRealmOwner { .. } => None,
            Error::GetAuthRealm { authrealm, .. } => Some(authrealm.clone().erase()),
            Error::AuthRealmNotFound { authrealm } => Some(authrealm.clone().erase()),
            Error::MissingPlacementRef { authrealm } => Some(authrealm.clone().erase()),
            Error::GetPlacement { placement, .. } => Some(placement.clone().erase()),
            Error::PlacementNotFound { placement } => Some(placement.clone().erase()),
            Error::ObjectMissingMetadataForOwnerRef => None,
            Error::InvalidOwnerLabels { authrealm, .. } => Some(authrealm.clone().erase()),
            Error::ApplyPlacement { placement, .. } => Some(placement.clone().erase()),
            Error::DeleteStalePlacement { placement, .. } => Some(placement.clone().erase()),
            Error::UpdateStrategy { .. } => None,
            Error::UpdateStatus { .. } => None,
        }
    }
}

pub async fn reconcile(strategy: Arc<Strategy>, ctx: Arc<Ctx>) -> Result<Action> {
    info!("Starting reconcile");
    let client = &ctx.client;

    let result = reconcile_placement(&strategy, client).await;

    let condition = match &result {
        Ok(placement_name) => build_condition(
            strategy.as_ref(),
            current_conditions(&strategy),
            PLACEMENT_CREATED,
            ConditionStatus::True,
            REASON_SUCCEED,
            format!("Placement {placement_name} created"),
        ),
        Err(error) => build_condition(
            strategy.as_ref(),
            current_conditions(&strategy),
            PLACEMENT_CREATED,
            ConditionStatus::False,
            REASON_FAILED,
            error_chain_message(error),
        ),
    };
    let mut conditions = current_conditions(&strategy).to_vec();
    set_condition(&mut conditions, condition);
    let status_result = client
        .merge_patch_status(strategy.as_ref(), &StrategyStatus { conditions })
        .await
        .with_context(|_| UpdateStatusSnafu {
            strategy: ObjectRef::from_obj(strategy.as_ref()),
        });

    // A reconcile failure is more relevant than a failed status update
    result?;
    status_result?;

    Ok(Action::await_change())
}

fn current_conditions(strategy: &Strategy) -> &[Condition] {
    strategy
        .status
        .as_ref()
        .map(|status| status.conditions.as_slice())
        .unwrap_or_default()
}

/// Applies the strategy's Placement and points the strategy at it. Returns the Placement name.
async fn reconcile_placement(strategy: &Strategy, client: &Client) -> Result<String> {
    let namespace = strategy.namespace().context(ObjectHasNoNamespaceSnafu)?;

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
            authrealm: authrealm_ref.clone(),
        })?;

    let placement_name = authrealm.spec.placement_ref.name.as_str();
    if placement_name.is_empty() {
        return MissingPlacementRefSnafu {
            authrealm: authrealm_ref,
        }
        .fail();
    }
    let placement_ref = ObjectRef::<Placement>::new(placement_name).within(&namespace);
    let authrealm_placement = client
        .get_opt::<Placement>(placement_name, &namespace)
        .await
        .with_context(|_| GetPlacementSnafu {
            placement: placement_ref.clone(),
        })?
        .with_context(|| PlacementNotFoundSnafu {
            placement: placement_ref,
        })?;

    let placement = build_strategy_placement(strategy, &authrealm, &authrealm_placement)?;
    let placement_name = placement.name_any();
    client
        .apply_patch(&placement)
        .await
        .with_context(|_| ApplyPlacementSnafu {
            placement: ObjectRef::from_obj(&placement),
        })?;

    if let Some(stale_name) = stale_placement_name(strategy, &placement_name) {
        delete_stale_placement(strategy, stale_name, &namespace, client).await?;
    }

    if strategy.placement_ref_name() != Some(placement_name.as_str()) {
        debug!(placement = %placement_name, "Setting placement reference");
        let mut strategy = strategy.clone();
        strategy.spec.placement_ref = Some(LocalObjectReference::new(&placement_name));
        client
            .replace(&strategy)
            .await
            .with_context(|_| UpdateStrategySnafu {
                strategy: ObjectRef::from_obj(&strategy),
            })?;
    }

    Ok(placement_name)
}

/// Deletes the Placement `name` if it was generated for `strategy`.
///
/// Its decisions would otherwise keep pointing at a strategy which no longer references it.
async fn delete_stale_placement(
    strategy: &Strategy,
    name: &str,
    namespace: &str,
    client: &Client,
) -> Result<()> {
    let placement_ref = ObjectRef::<Placement>::new(name).within(namespace);
    let stale = client
        .get_opt::<Placement>(name, namespace)
        .await
        .with_context(|_| GetPlacementSnafu {
            placement: placement_ref.clone(),
        })?;

    match stale {
        Some(stale) if controlled_by(&stale, strategy) => {
            info!(placement = name, "Deleting previously generated Placement");
            client
                .delete(&stale)
                .await
                .with_context(|_| DeleteStalePlacementSnafu {
                    placement: placement_ref,
                })?;
        }
        Some(_) => debug!(placement = name, "Referenced Placement is not ours, keeping it"),
        None => {}
    }

    Ok(())
}

/// Name of the Placement `strategy` still references if it differs from `placement_name`.
pub fn stale_placement_name<'a>(strategy: &'a Strategy, placement_name: &str) -> Option<&'a str> {
    strategy
        .placement_ref_name()
        .filter(|referenced| *referenced != placement_name)
}

/// Returns `true` if `strategy` is the controller of `placement`.
pub fn controlled_by(placement: &Placement, strategy: &Strategy) -> bool {
    let Some(uid) = strategy.metadata.uid.as_deref() else {
        return false;
    };

    placement
        .owner_references()
        .iter()
        .any(|owner| owner.controller == Some(true) && owner.uid == uid)
}

/// Builds the Placement of `strategy` from the Placement of its AuthRealm.
///
/// The policy controller predicate comes first, followed by every predicate of the AuthRealm's
/// Placement.
pub fn build_strategy_placement(
    strategy: &Strategy,
    authrealm: &AuthRealm,
    authrealm_placement: &Placement,
) -> Result<Placement> {
    let mut predicates = vec![policy_controller_predicate(strategy.spec.strategy_type)];
    predicates.extend(authrealm_placement.spec.predicates.iter().cloned());

    let mut placement = Placement::new(
        &strategy.placement_name(&authrealm_placement.name_any()),
        PlacementSpec {
            predicates,
            ..PlacementSpec::default()
        },
    );
    placement.metadata.namespace = strategy.namespace();
    placement.metadata.labels = Some(
        authrealm_labels(
            &authrealm.name_any(),
            &authrealm.namespace().unwrap_or_default(),
        )
        .with_context(|_| InvalidOwnerLabelsSnafu {
            authrealm: ObjectRef::from_obj(authrealm),
        })?,
    );
    placement.metadata.owner_references = Some(vec![
        strategy
            .controller_owner_ref(&())
            .context(ObjectMissingMetadataForOwnerRefSnafu)?,
    ]);

    Ok(placement)
}

/// Selects clusters by the availability of the governance policy controller.
pub fn policy_controller_predicate(strategy_type: StrategyType) -> ClusterPredicate {
    let operator = match strategy_type {
        StrategyType::Backplane => "NotIn",
        StrategyType::Grc => "In",
    };

    ClusterPredicate {
        required_cluster_selector: ClusterSelector {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: POLICY_CONTROLLER_FEATURE_KEY.to_owned(),
                    operator: operator.to_owned(),
                    values: Some(vec![POLICY_CONTROLLER_AVAILABLE.to_owned()]),
                }]),
                match_labels: None,
            }),
            claim_selector: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use indoc::{formatdoc, indoc};
    use rstest::rstest;

    use super::*;
    use crate::labels::{K8S_APP_INSTANCE_KEY, LabelSelectorExt};

    fn strategy(strategy_type: &str) -> Strategy {
        serde_yaml::from_str(&formatdoc! {"
            apiVersion: identityconfig.identitatem.io/v1alpha1
            kind: Strategy
            metadata:
              name: realm-{strategy_type}
              namespace: realm-ns
              uid: 0b1a7c6e-0f4b-4a47-8d5e-2a57f0a3c9d1
              ownerReferences:
                - apiVersion: identityconfig.identitatem.io/v1alpha1
                  kind: AuthRealm
                  name: realm
                  uid: 5a0a93cb-4d5c-4a5f-9e58-6f0b3e9f2a11
            spec:
              type: {strategy_type}
        "})
        .expect("test input is a valid Strategy")
    }

    fn authrealm() -> AuthRealm {
        serde_yaml::from_str(indoc! {"
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
        "})
        .expect("test input is a valid AuthRealm")
    }

    fn authrealm_placement() -> Placement {
        serde_yaml::from_str(indoc! {"
            apiVersion: cluster.open-cluster-management.io/v1beta1
            kind: Placement
            metadata:
              name: realm-placement
              namespace: realm-ns
            spec:
              predicates:
                - requiredClusterSelector:
                    labelSelector:
                      matchLabels:
                        vendor: OpenShift
        "})
        .expect("test input is a valid Placement")
    }

    fn selector_string(predicate: &ClusterPredicate) -> String {
        predicate
            .required_cluster_selector
            .label_selector
            .as_ref()
            .map(|selector| selector.to_query_string().unwrap())
            .unwrap_or_default()
    }

    #[rstest]
    #[case::backplane(
        "backplane",
        "realm-placement-backplane",
        "feature.open-cluster-management.io/addon-policy-controller notin (available)"
    )]
    #[case::grc(
        "grc",
        "realm-placement-grc",
        "feature.open-cluster-management.io/addon-policy-controller in (available)"
    )]
    fn strategy_placement_narrows_authrealm_placement(
        #[case] strategy_type: &str,
        #[case] expected_name: &str,
        #[case] expected_selector: &str,
    ) {
        let strategy = strategy(strategy_type);

        let placement =
            build_strategy_placement(&strategy, &authrealm(), &authrealm_placement()).unwrap();

        assert_eq!(placement.name_any(), expected_name);
        assert_eq!(placement.namespace().as_deref(), Some("realm-ns"));
        assert_eq!(placement.spec.predicates.len(), 2);
        assert_eq!(selector_string(&placement.spec.predicates[0]), expected_selector);
        assert_eq!(selector_string(&placement.spec.predicates[1]), "vendor=OpenShift");
    }

    #[test]
    fn strategy_placement_is_owned_by_strategy() {
        let strategy = strategy("backplane");

        let placement =
            build_strategy_placement(&strategy, &authrealm(), &authrealm_placement()).unwrap();

        let owner = &placement.owner_references()[0];
        assert_eq!(owner.kind, "Strategy");
        assert_eq!(owner.name, "realm-backplane");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(
            placement.labels().get(K8S_APP_INSTANCE_KEY).map(String::as_str),
            Some("realm")
        );
    }

    #[test]
    fn strategy_without_uid_cannot_own_placement() {
        let mut strategy = strategy("backplane");
        strategy.metadata.uid = None;

        let result = build_strategy_placement(&strategy, &authrealm(), &authrealm_placement());

        assert!(matches!(result, Err(Error::ObjectMissingMetadataForOwnerRef)));
    }

    #[test]
    fn placement_without_predicates_only_filters_by_policy_controller() {
        let mut authrealm_placement = authrealm_placement();
        authrealm_placement.spec.predicates.clear();

        let placement =
            build_strategy_placement(&strategy("grc"), &authrealm(), &authrealm_placement)
                .unwrap();

        assert_eq!(
            placement.spec.predicates,
            vec![policy_controller_predicate(StrategyType::Grc)]
        );
        assert_eq!(placement.labels(), &authrealm_labels("realm", "realm-ns").unwrap());
    }

    #[rstest]
    #[case::unset(None, None)]
    #[case::current(Some("realm-placement-backplane"), None)]
    #[case::renamed(Some("old-placement-backplane"), Some("old-placement-backplane"))]
    #[case::type_changed(Some("realm-placement-grc"), Some("realm-placement-grc"))]
    fn stale_placement_is_the_previous_reference(
        #[case] referenced: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let mut strategy = strategy("backplane");
        strategy.spec.placement_ref = referenced.map(LocalObjectReference::new);

        assert_eq!(stale_placement_name(&strategy, "realm-placement-backplane"), expected);
    }

    #[test]
    fn only_generated_placements_are_controlled_by_strategy() {
        let strategy = strategy("backplane");
        let generated =
            build_strategy_placement(&strategy, &authrealm(), &authrealm_placement()).unwrap();

        let mut other_strategy = strategy.clone();
        other_strategy.metadata.uid = Some("c2f0a8d4-7a51-4a0e-b0b3-3d5c7e9f1a22".to_owned());
        let mut not_controller = generated.clone();
        not_controller.metadata.owner_references = generated
            .metadata
            .owner_references
            .clone()
            .map(|owners| {
                owners
                    .into_iter()
                    .map(|mut owner| {
                        owner.controller = None;
                        owner
                    })
                    .collect()
            });

        assert!(controlled_by(&generated, &strategy));
        assert!(!controlled_by(&generated, &other_strategy));
        assert!(!controlled_by(&not_controller, &strategy));
        assert!(!controlled_by(&authrealm_placement(), &strategy));
    }

    #[test]
    fn authrealm_name_too_long_for_labels_is_reported() {
        let mut authrealm = authrealm();
        authrealm.metadata.name = Some("realm".repeat(13));

        let result = build_strategy_placement(&strategy("backplane"), &authrealm, &authrealm_placement());

        assert!(matches!(
            result,
            Err(Error::InvalidOwnerLabels {
                source: LabelValueError::ValueTooLong { length: 65, .. },
                ..
            })
        ));
    }

    #[test]
    fn errors_are_categorized() {
        let error = Error::PlacementNotFound {
            placement: ObjectRef::new("realm-placement").within("realm-ns"),
        };

        assert_eq!(error.category(), "PlacementNotFound");
        assert_eq!(
            error.secondary_object().map(|object| object.name),
            Some("realm-placement".to_owned())
        );
    }
}
