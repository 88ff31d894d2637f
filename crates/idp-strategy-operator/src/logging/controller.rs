//! Reporting of reconciliation outcomes.
//!
//! Every outcome is logged with the kind, namespace and name of the reconciled object. Failures
//! of a reconciliation are also published as a Warning event on the object, see
//! [`super::k8s_events`].

use kube::{
    Resource,
    core::DynamicObject,
    runtime::{
        controller::{self, Action},
        reflector::ObjectRef,
    },
};
use tracing::{debug, error, info};

use crate::{client::Client, logging::k8s_events::EventPublisher};

/// Error of a reconciler, published as an event on the reconciled object.
pub trait ReconcilerError: std::error::Error {
    /// Event reason, usually the `PascalCase` variant name.
    fn category(&self) -> &'static str;

    /// The related object the reconciler failed on, e.g. the DexClient it could not apply.
    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

/// Reports the outcomes of one controller.
#[derive(Clone)]
pub struct OutcomeReporter {
    controller: &'static str,
    events: EventPublisher,
}

impl OutcomeReporter {
    /// `instance` identifies this operator replica in published events, usually the pod name.
    pub fn new(client: &Client, controller: &'static str, instance: Option<String>) -> Self {
        Self {
            controller,
            events: EventPublisher::new(client, controller, instance),
        }
    }

    pub fn report<K, ReconcileErr, QueueErr>(
        &self,
        result: &Result<(ObjectRef<K>, Action), controller::Error<ReconcileErr, QueueErr>>,
    ) where
        K: Resource,
        ReconcileErr: ReconcilerError + 'static,
        QueueErr: std::error::Error + 'static,
    {
        match result {
            Ok((object, action)) => info!(
                controller.name = self.controller,
                object.kind = %K::kind(&object.dyntype),
                object.namespace = object.namespace.as_deref(),
                object.name = object.name,
                ?action,
                "Reconciled object"
            ),
            Err(controller::Error::ReconcilerFailed(reconcile_error, object)) => {
                error!(
                    controller.name = self.controller,
                    object.kind = object.dyntype.kind,
                    object.namespace = object.namespace.as_deref(),
                    object.name = object.name,
                    error.category = reconcile_error.category(),
                    error = reconcile_error as &dyn std::error::Error,
                    "Failed to reconcile object"
                );
                self.events.publish_failure(reconcile_error, object);
            }
            Err(controller::Error::ObjectNotFound(object)) => debug!(
                controller.name = self.controller,
                object.kind = object.dyntype.kind,
                object.namespace = object.namespace.as_deref(),
                object.name = object.name,
                "Queued object is gone, skipping"
            ),
            Err(other) => error!(
                controller.name = self.controller,
                error = other as &dyn std::error::Error,
                "Controller failed outside of a reconciliation"
            ),
        }
    }
}
