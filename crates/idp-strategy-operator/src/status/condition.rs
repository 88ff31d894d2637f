//! This module deals with the [`Condition`] object from Kubernetes.

use k8s_openapi::{
    apimachinery::pkg::apis::meta::v1::{Condition, Time},
    jiff::Timestamp,
};
use kube::Resource;
use strum::{Display, EnumString};

/// Set on a Strategy once its Placement has been generated.
pub const PLACEMENT_CREATED: &str = "PlacementCreated";

pub const REASON_SUCCEED: &str = "Succeed";
pub const REASON_FAILED: &str = "Failed";

/// According to the Kubernetes schema the only allowed values for the `status` of a `Condition`
/// are `True`, `False` and `Unknown`.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Builds a [`Condition`] from the passed in parameters.
///
/// * It uses the `current_conditions` to set the `last_transition_time` field automatically
/// * It uses the passed in `resource` to automatically set the `observed_generation`
/// * The remaining parameters are just passed through
pub fn build_condition<T>(
    resource: &T,
    current_conditions: &[Condition],
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
) -> Condition
where
    T: Resource,
{
    let status = status.to_string();

    // Only a status change moves the transition time
    let last_transition_time = current_conditions
        .iter()
        .find(|condition| condition.type_ == condition_type)
        .filter(|condition| condition.status == status)
        .map(|condition| condition.last_transition_time.clone())
        .unwrap_or_else(|| Time(Timestamp::now()));

    Condition {
        last_transition_time,
        message: message.into(),
        observed_generation: resource.meta().generation,
        reason: reason.to_owned(),
        status,
        type_: condition_type.to_owned(),
    }
}

/// Replaces the condition of the same type in `conditions`, or appends it.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions
        .iter_mut()
        .find(|existing| existing.type_ == condition.type_)
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;
    use rstest::rstest;

    use super::*;

    fn resource() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("strategy".to_owned()),
                generation: Some(3),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    fn old_condition(status: ConditionStatus) -> Condition {
        Condition {
            last_transition_time: Time(Timestamp::UNIX_EPOCH),
            message: String::new(),
            observed_generation: Some(1),
            reason: REASON_SUCCEED.to_owned(),
            status: status.to_string(),
            type_: PLACEMENT_CREATED.to_owned(),
        }
    }

    #[test]
    fn transition_time_is_kept_if_status_is_unchanged() {
        let current = [old_condition(ConditionStatus::True)];

        let condition = build_condition(
            &resource(),
            &current,
            PLACEMENT_CREATED,
            ConditionStatus::True,
            REASON_SUCCEED,
            "Placement realm-placement-backplane created",
        );

        assert_eq!(condition.last_transition_time, Time(Timestamp::UNIX_EPOCH));
        assert_eq!(condition.observed_generation, Some(3));
        assert_eq!(condition.message, "Placement realm-placement-backplane created");
    }

    #[rstest]
    #[case::status_changed(vec![old_condition(ConditionStatus::False)])]
    #[case::first_condition(vec![])]
    fn transition_time_is_reset(#[case] current: Vec<Condition>) {
        let condition = build_condition(
            &resource(),
            &current,
            PLACEMENT_CREATED,
            ConditionStatus::True,
            REASON_SUCCEED,
            "",
        );

        assert_ne!(condition.last_transition_time, Time(Timestamp::UNIX_EPOCH));
        assert_eq!(condition.status, "True");
    }

    #[test]
    fn set_condition_replaces_by_type() {
        let mut conditions = vec![old_condition(ConditionStatus::True)];
        let failed = Condition {
            reason: REASON_FAILED.to_owned(),
            ..old_condition(ConditionStatus::False)
        };

        set_condition(&mut conditions, failed.clone());
        assert_eq!(conditions, vec![failed]);

        let other = Condition {
            type_: "Other".to_owned(),
            ..old_condition(ConditionStatus::True)
        };
        set_condition(&mut conditions, other);
        assert_eq!(conditions.len(), 2);
    }
}
