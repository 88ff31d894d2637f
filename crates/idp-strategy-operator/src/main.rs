use clap::Parser;
use idp_strategy_operator::{
    OPERATOR_NAME,
    cli::{Command, Opts},
    client, controller,
    crd::install::{self, owned_crds},
    health::{self, Readiness},
    logging::{self, LOG_ENV},
};
use kube::ResourceExt;
use snafu::{ResultExt, Snafu};
use tracing::info;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to serialize CRD {crd_name}"))]
    SerializeCrd {
        source: serde_yaml::Error,
        crd_name: String,
    },

    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to initialize the Kubernetes client"))]
    InitializeClient { source: client::Error },

    #[snafu(display("failed to install the custom resource definitions"))]
    InstallCrds { source: install::Error },

    #[snafu(display("failed to run the health endpoint server"))]
    HealthEndpoints { source: health::Error },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.command {
        Command::Crd => {
            let mut documents = Vec::new();
            for crd in owned_crds() {
                documents.push(
                    serde_yaml::to_string(&crd).with_context(|_| SerializeCrdSnafu {
                        crd_name: crd.name_any(),
                    })?,
                );
            }
            print!("{}", documents.join("---\n"));
        }
        Command::Run(run) => {
            logging::initialize_logging(LOG_ENV, OPERATOR_NAME).context(InitializeLoggingSnafu)?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                watch_namespace = ?run.watch_namespace,
                pod_name = run.pod_name.as_deref(),
                "Starting {OPERATOR_NAME}"
            );

            let client = client::initialize_operator(run.field_manager.clone())
                .await
                .context(InitializeClientSnafu)?;

            let readiness = Readiness::default();
            let health_endpoints =
                health::serve_health_endpoints(run.health_address, readiness.clone());
            let operator = async {
                install::install_crds(&client).await.context(InstallCrdsSnafu)?;
                readiness.mark_ready();
                controller::run(client.clone(), &run).await;
                Ok::<_, Error>(())
            };

            // The controllers stop on SIGTERM, the health endpoints only on failure
            tokio::select! {
                result = operator => result?,
                result = health_endpoints => result.context(HealthEndpointsSnafu)?,
            }
        }
    }

    Ok(())
}
