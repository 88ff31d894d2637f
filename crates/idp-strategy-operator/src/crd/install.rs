//! Installs the CRDs this operator owns before its controllers start watching them.

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    CustomResourceExt, ResourceExt,
    runtime::wait::{self, await_condition, conditions},
};
use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::{
    client::{self, Client},
    crd::{AuthRealm, ClusterOAuth, Strategy},
};

/// How long a freshly applied CRD may take to be served by the API server.
pub const CRD_ESTABLISHED_TIMEOUT: Duration = Duration::from_secs(30);

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to apply CRD {crd_name:?}"))]
    ApplyCrd {
        source: client::Error,
        crd_name: String,
    },

    #[snafu(display("failed to watch CRD {crd_name:?} until it is established"))]
    AwaitEstablished {
        source: wait::Error,
        crd_name: String,
    },

    #[snafu(display("CRD {crd_name:?} was not established within {timeout:?}"))]
    EstablishTimeout {
        source: tokio::time::error::Elapsed,
        crd_name: String,
        timeout: Duration,
    },
}

/// The CRDs of the resources this operator defines, in installation order.
pub fn owned_crds() -> [CustomResourceDefinition; 3] {
    [AuthRealm::crd(), Strategy::crd(), ClusterOAuth::crd()]
}

/// Server-side applies every owned CRD and waits until the API server serves it.
///
/// Applying takes over the fields from other managers, so an older CRD installed by hand is
/// brought up to date.
pub async fn install_crds(client: &Client) -> Result<()> {
    let crd_api = client.get_api::<CustomResourceDefinition>(&());

    for crd in owned_crds() {
        let crd_name = crd.name_any();
        debug!(k8s.crd.name = crd_name, "Applying custom resource definition");
        client
            .apply_patch(&crd)
            .await
            .with_context(|_| ApplyCrdSnafu {
                crd_name: crd_name.clone(),
            })?;

        let established = await_condition(crd_api.clone(), &crd_name, conditions::is_crd_established());
        tokio::time::timeout(CRD_ESTABLISHED_TIMEOUT, established)
            .await
            .with_context(|_| EstablishTimeoutSnafu {
                crd_name: crd_name.clone(),
                timeout: CRD_ESTABLISHED_TIMEOUT,
            })?
            .with_context(|_| AwaitEstablishedSnafu {
                crd_name: crd_name.clone(),
            })?;
        info!(k8s.crd.name = crd_name, "Custom resource definition is established");
    }

    Ok(())
}
