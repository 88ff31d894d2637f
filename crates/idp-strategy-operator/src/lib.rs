//! Operator that applies identity provider strategies to a fleet of managed clusters.
//!
//! A [`Strategy`](crate::crd::Strategy) belongs to an [`AuthRealm`](crate::crd::AuthRealm) and
//! describes how the realm reaches the clusters selected by its placement. Three controllers keep
//! the derived resources convergent:
//!
//! - [`controller::strategy`] generates a strategy specific `Placement`.
//! - [`controller::placement_decision`] registers OAuth clients (`DexClient`s), client secrets and
//!   `ClusterOAuth`s for every decided cluster and removes them for clusters that left.
//! - [`controller::cluster_oauth`] folds the `ClusterOAuth`s of one cluster into the
//!   `ManifestWork` that configures the cluster's OAuth server.

pub mod cli;
pub mod client;
pub mod cluster_resources;
pub mod controller;
pub mod crd;
pub mod health;
pub mod labels;
pub mod logging;
pub mod manifest;
pub mod namespace;
pub mod status;
pub mod utils;

// External re-exports
pub use k8s_openapi;
pub use kube;
pub use schemars;

/// The name of this operator, also used as field manager and event reporter.
pub const OPERATOR_NAME: &str = "idp-strategy-operator";
