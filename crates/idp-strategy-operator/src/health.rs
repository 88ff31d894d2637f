//! Liveness and readiness probes served over HTTP.
//!
//! `/healthz` answers as soon as the server runs. `/readyz` answers once the owned CRDs are
//! installed and the controllers are about to start.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use snafu::{ResultExt, Snafu};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to bind the health endpoint address {address}"))]
    BindHealthAddress {
        source: std::io::Error,
        address: SocketAddr,
    },

    #[snafu(display("failed to serve health endpoints"))]
    ServeHealthEndpoints { source: std::io::Error },
}

/// Shared flag flipped once the operator is ready to reconcile.
#[derive(Clone, Debug, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub fn health_router(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .with_state(readiness)
}

async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

/// Serves the health endpoints on `address` until the process exits.
pub async fn serve_health_endpoints(
    address: SocketAddr,
    readiness: Readiness,
) -> Result<(), Error> {
    let listener = TcpListener::bind(address)
        .await
        .context(BindHealthAddressSnafu { address })?;
    info!(%address, "Serving health endpoints");

    axum::serve(listener, health_router(readiness))
        .await
        .context(ServeHealthEndpointsSnafu)
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;

    async fn status_of(readiness: &Readiness, path: &str) -> StatusCode {
        let request = Request::builder().uri(path).body(Body::empty()).unwrap();
        health_router(readiness.clone())
            .oneshot(request)
            .await
            .unwrap()
            .status()
    }

    #[rstest]
    #[case::starting(false, StatusCode::OK, StatusCode::SERVICE_UNAVAILABLE)]
    #[case::ready(true, StatusCode::OK, StatusCode::OK)]
    #[tokio::test]
    async fn health_endpoints_report_readiness(
        #[case] ready: bool,
        #[case] expected_healthz: StatusCode,
        #[case] expected_readyz: StatusCode,
    ) {
        let readiness = Readiness::default();
        if ready {
            readiness.mark_ready();
        }

        assert_eq!(status_of(&readiness, "/healthz").await, expected_healthz);
        assert_eq!(status_of(&readiness, "/readyz").await, expected_readyz);
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        assert_eq!(status_of(&Readiness::default(), "/metrics").await, StatusCode::NOT_FOUND);
    }
}
