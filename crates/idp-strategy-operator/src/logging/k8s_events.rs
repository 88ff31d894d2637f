//! Warning events telling AuthRealm owners why their Strategy, PlacementDecision or ClusterOAuth
//! could not be reconciled.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    core::DynamicObject,
    runtime::{
        events::{Event, EventType, Recorder, Reporter},
        reflector::ObjectRef,
    },
};
use tracing::{Instrument, warn};

use super::{controller::ReconcilerError, error_chain_message};
use crate::client::Client;

/// Maximum size of an event note accepted by the API server.
const MAX_NOTE_LEN: usize = 1024;

const ELLIPSIS: char = '…';

/// Publishes the failures of one controller as events.
#[derive(Clone)]
pub struct EventPublisher {
    client: kube::Client,
    reporter: Reporter,
}

impl EventPublisher {
    pub fn new(client: &Client, controller: &str, instance: Option<String>) -> Self {
        Self {
            client: client.as_kube_client(),
            reporter: Reporter {
                controller: format!("{}-{controller}", crate::OPERATOR_NAME),
                instance,
            },
        }
    }

    /// Publishes `error` on `object` in the background.
    pub fn publish_failure<E: ReconcilerError>(&self, error: &E, object: &ObjectRef<DynamicObject>) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone());
        let reference = ObjectReference::from(object.clone());
        let event = failure_event(error);

        tokio::spawn(
            async move {
                if let Err(error) = recorder.publish(&event, &reference).await {
                    warn!(
                        error = &error as &dyn std::error::Error,
                        object.name = reference.name,
                        "Failed to publish reconcile failure as event"
                    );
                }
            }
            .in_current_span(),
        );
    }
}

fn failure_event<E: ReconcilerError>(error: &E) -> Event {
    Event {
        type_: EventType::Warning,
        reason: error.category().to_owned(),
        note: Some(truncate_note(error_chain_message(error), MAX_NOTE_LEN)),
        action: "Reconcile".to_owned(),
        secondary: error.secondary_object().map(ObjectReference::from),
    }
}

/// Cuts `note` down to at most `max_len` bytes, marking the cut with an ellipsis.
fn truncate_note(mut note: String, max_len: usize) -> String {
    if note.len() <= max_len {
        return note;
    }

    let keep = note
        .char_indices()
        .map(|(index, _)| index)
        .take_while(|index| index + ELLIPSIS.len_utf8() <= max_len)
        .last()
        .unwrap_or_default();
    note.truncate(keep);
    if ELLIPSIS.len_utf8() <= max_len {
        note.push(ELLIPSIS);
    }
    note
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::{client, cluster_resources, controller::placement_decision, crd::dex::DexClient};

    fn conflicting_dex_client() -> placement_decision::Error {
        placement_decision::Error::SyncDexClients {
            source: cluster_resources::Error::ApplyResource {
                source: client::Error::MissingObjectKey { key: "name" },
                resource: "DexClient realm/cluster1-github".to_owned(),
            },
        }
    }

    #[test]
    fn event_carries_the_full_error_chain() {
        let event = failure_event(&conflicting_dex_client());

        assert!(matches!(event.type_, EventType::Warning));
        assert_eq!(event.reason, "SyncDexClients");
        assert_eq!(
            event.note.as_deref(),
            Some(
                "failed to sync DexClients: failed to apply DexClient realm/cluster1-github: \
                 object is missing key \"name\""
            )
        );
    }

    #[test]
    fn event_points_at_the_failing_object() {
        let error = placement_decision::Error::GetDexClient {
            source: client::Error::MissingObjectKey { key: "name" },
            dex_client: ObjectRef::<DexClient>::new("cluster1-github").within("realm"),
        };

        let secondary = failure_event(&error).secondary.unwrap();

        assert_eq!(secondary.kind.as_deref(), Some("DexClient"));
        assert_eq!(secondary.name.as_deref(), Some("cluster1-github"));
        assert_eq!(secondary.namespace.as_deref(), Some("realm"));
    }

    #[rstest]
    #[case::fits("placement missing", 17, "placement missing")]
    #[case::ascii("placement missing", 10, "placeme…")]
    #[case::multibyte("realm “sso”", 12, "realm “…")]
    #[case::only_ellipsis("placement", 3, "…")]
    #[case::too_short_for_ellipsis("placement", 2, "")]
    fn notes_are_truncated_on_char_boundaries(
        #[case] note: &str,
        #[case] max_len: usize,
        #[case] expected: &str,
    ) {
        let truncated = truncate_note(note.to_owned(), max_len);

        assert_eq!(truncated, expected);
        assert!(truncated.len() <= max_len);
    }
}
