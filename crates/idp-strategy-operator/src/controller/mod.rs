//! The controllers of this operator and the plumbing shared between them.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use kube::runtime::{Controller, controller::Action, watcher};
use tracing::info;

use crate::{
    cli::RunArguments,
    client::Client,
    crd::{
        ClusterOAuth, Strategy,
        ocm::{Placement, PlacementDecision},
    },
    logging::controller::{OutcomeReporter, ReconcilerError},
};

pub mod cluster_oauth;
pub mod placement_decision;
pub mod strategy;

/// State shared by all reconciliations of one controller.
pub struct Ctx {
    pub client: Client,
    pub error_requeue: Duration,
}

/// Requeues failed reconciliations after the configured delay.
pub fn error_policy<K, E>(_obj: Arc<K>, error: &E, ctx: Arc<Ctx>) -> Action
where
    E: ReconcilerError + 'static,
{
    tracing::debug!(
        error = error as &dyn std::error::Error,
        requeue_after = ?ctx.error_requeue,
        "Requeueing after failed reconcile"
    );
    Action::requeue(ctx.error_requeue)
}

/// Runs the Strategy, PlacementDecision and ClusterOAuth controllers until a shutdown signal is
/// received.
///
/// Strategies, their Placements and PlacementDecisions are watched in the configured watch
/// namespace. ClusterOAuths live in the namespaces of the managed clusters and are always watched
/// in all namespaces.
pub async fn run(client: Client, args: &RunArguments) {
    let watch_namespace = &args.watch_namespace;
    let ctx = Arc::new(Ctx {
        client: client.clone(),
        error_requeue: args.error_requeue(),
    });
    let reporter = |controller| OutcomeReporter::new(&client, controller, args.pod_name.clone());

    info!("- Strategy controller");
    let strategy_reporter = reporter(strategy::CONTROLLER_NAME);
    let strategy_controller = Controller::new(
        watch_namespace.get_api::<Strategy>(&client),
        watcher::Config::default(),
    )
    .owns(
        watch_namespace.get_api::<Placement>(&client),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(strategy::reconcile, error_policy, ctx.clone())
    .for_each(|result| {
        strategy_reporter.report(&result);
        futures::future::ready(())
    });

    info!("- PlacementDecision controller");
    let placement_decision_reporter = reporter(placement_decision::CONTROLLER_NAME);
    let placement_decision_controller = Controller::new(
        watch_namespace.get_api::<PlacementDecision>(&client),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(placement_decision::reconcile, error_policy, ctx.clone())
    .for_each(|result| {
        placement_decision_reporter.report(&result);
        futures::future::ready(())
    });

    info!("- ClusterOAuth controller");
    let cluster_oauth_reporter = reporter(cluster_oauth::CONTROLLER_NAME);
    let cluster_oauth_controller = Controller::new(
        client.get_all_api::<ClusterOAuth>(),
        watcher::Config::default(),
    )
    .shutdown_on_signal()
    .run(cluster_oauth::reconcile, error_policy, ctx)
    .for_each(|result| {
        cluster_oauth_reporter.report(&result);
        futures::future::ready(())
    });

    futures::future::join3(
        strategy_controller,
        placement_decision_controller,
        cluster_oauth_controller,
    )
    .await;
}
