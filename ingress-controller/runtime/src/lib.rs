#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use nginx_ingress_controller_core as core;
pub use nginx_ingress_controller_k8s_api as k8s;
pub use nginx_ingress_controller_k8s_index as index;
pub use nginx_ingress_controller_k8s_status as status;

mod args;
pub mod configurator;
pub mod dispatcher;
mod initial_sync;
mod lease;
pub mod metrics;

pub use self::{
    args::Args,
    configurator::DryRun,
    dispatcher::Dispatcher,
    initial_sync::InitialSync,
    metrics::DispatcherMetrics,
};
