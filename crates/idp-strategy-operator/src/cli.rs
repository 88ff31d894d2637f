//! Command line interface of the operator, built with `clap`.
//!
//! ```no_run
//! use clap::Parser;
//! use idp_strategy_operator::cli::{Command, Opts};
//!
//! let opts = Opts::parse();
//! match opts.command {
//!     Command::Crd => { /* print the CRDs */ }
//!     Command::Run(run) => { /* run the controllers in run.watch_namespace */ }
//! }
//! ```

use std::{net::SocketAddr, time::Duration};

use clap::{Args, Parser};

use crate::{OPERATOR_NAME, namespace::WatchNamespace};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = OPERATOR_NAME, author, version, about)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, Parser)]
pub enum Command {
    /// Print CRD objects.
    Crd,

    /// Run the operator.
    Run(RunArguments),
}

/// CLI arguments of the `run` subcommand.
#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    /// Provides a specific namespace to watch (instead of watching all namespaces)
    #[arg(long, env, default_value = "")]
    pub watch_namespace: WatchNamespace,

    /// Field manager used for all writes to the Kubernetes API
    #[arg(long, env, default_value = OPERATOR_NAME)]
    pub field_manager: String,

    /// Seconds to wait before retrying a failed reconciliation
    #[arg(long, env, default_value_t = 5)]
    pub error_requeue_seconds: u64,

    /// Address serving the /healthz and /readyz endpoints
    #[arg(long, env, default_value = DEFAULT_HEALTH_ADDRESS)]
    pub health_address: SocketAddr,

    /// Name of the operator pod, identifying this replica in published events
    #[arg(long, env)]
    pub pod_name: Option<String>,
}

pub const DEFAULT_HEALTH_ADDRESS: &str = "0.0.0.0:8081";

impl RunArguments {
    pub fn error_requeue(&self) -> Duration {
        Duration::from_secs(self.error_requeue_seconds)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;

    use super::*;

    fn default_health_address() -> SocketAddr {
        DEFAULT_HEALTH_ADDRESS.parse().unwrap()
    }

    #[test]
    fn verify_cli() {
        Opts::command().debug_assert()
    }

    #[test]
    fn crd_subcommand_takes_no_arguments() {
        let opts = Opts::parse_from([OPERATOR_NAME, "crd"]);
        assert_eq!(opts.command, Command::Crd);
    }

    #[test]
    fn run_defaults_watch_all_namespaces() {
        let opts = Opts::parse_from([OPERATOR_NAME, "run"]);

        let expected = RunArguments {
            watch_namespace: WatchNamespace::All,
            field_manager: OPERATOR_NAME.to_owned(),
            error_requeue_seconds: 5,
            health_address: default_health_address(),
            pod_name: None,
        };
        assert_eq!(expected.error_requeue(), Duration::from_secs(5));
        assert_eq!(opts.command, Command::Run(expected));
    }

    #[rstest]
    #[case(
        &["--watch-namespace", "realm-ns"],
        WatchNamespace::One("realm-ns".to_owned()),
        "idp-strategy-operator",
        5
    )]
    #[case(
        &["--field-manager", "sso", "--error-requeue-seconds", "30"],
        WatchNamespace::All,
        "sso",
        30
    )]
    fn run_arguments_are_parsed(
        #[case] args: &[&str],
        #[case] watch_namespace: WatchNamespace,
        #[case] field_manager: &str,
        #[case] error_requeue_seconds: u64,
    ) {
        let opts = Opts::parse_from([OPERATOR_NAME, "run"].iter().chain(args));

        assert_eq!(
            opts.command,
            Command::Run(RunArguments {
                watch_namespace,
                field_manager: field_manager.to_owned(),
                error_requeue_seconds,
                health_address: default_health_address(),
                pod_name: None,
            })
        );
    }

    #[test]
    fn health_address_and_pod_name_are_parsed() {
        let opts = Opts::parse_from([
            OPERATOR_NAME,
            "run",
            "--health-address",
            "127.0.0.1:9440",
            "--pod-name",
            "idp-strategy-operator-7d9f8-x2x4q",
        ]);

        assert_eq!(
            opts.command,
            Command::Run(RunArguments {
                watch_namespace: WatchNamespace::All,
                field_manager: OPERATOR_NAME.to_owned(),
                error_requeue_seconds: 5,
                health_address: "127.0.0.1:9440".parse().unwrap(),
                pod_name: Some("idp-strategy-operator-7d9f8-x2x4q".to_owned()),
            })
        );
    }

    #[test]
    fn invalid_requeue_delay_is_rejected() {
        let result =
            Opts::try_parse_from([OPERATOR_NAME, "run", "--error-requeue-seconds", "soon"]);
        assert!(result.is_err());
    }
}
