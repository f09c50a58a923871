//! NGINX Ingress Controller index
//!
//! The index holds everything the controller knows about the cluster and
//! decides what NGINX should serve:
//!
//! - The [`Cache`] receives watch events for every watched kind and enqueues
//!   a sync task whenever an object changes in a way the controller cares
//!   about.
//! - The [`Configuration`] holds the Ingresses, VirtualServers,
//!   VirtualServerRoutes and TransportServers that were admitted, resolves
//!   host and listener conflicts between them, and reports which resources
//!   were accepted, changed, or rejected.
//! - The [`SecretStore`] validates secrets and materializes them through the
//!   configurator's file manager.
//! - The [`AppProtectConfiguration`] and [`DosConfiguration`] track App
//!   Protect WAF and DoS resources and the resources that reference them.
//! - A [`Builder`] joins accepted resources with the endpoints, secrets and
//!   policies they reference, producing the snapshots handed to NGINX.
//!
//! ```text
//! [ watches ] -> [ Cache ] -> [ queue ] -> [ Configuration ] -> [ Builder ] -> [ Configurator ]
//! ```

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod app_protect;
pub mod builder;
pub mod cache;
mod cluster_info;
pub mod config_map;
pub mod configuration;
pub mod endpoints;
pub mod global_configuration;
pub mod metrics;
pub mod secrets;
pub mod validation;

#[cfg(test)]
mod test_util;

pub use self::{
    app_protect::{dos::DosConfiguration, AppProtectConfiguration},
    builder::Builder,
    cache::{Cache, Cached, SharedCache},
    cluster_info::{ClusterInfo, SpecialSecret, SpecialSecrets, WatchedNamespaces},
    configuration::{Configuration, ResourceFilter, SharedConfiguration},
    metrics::IndexMetrics,
    secrets::SecretStore,
    validation::Validator,
};
