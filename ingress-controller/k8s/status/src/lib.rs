//! Reports the outcome of reconciliation back onto cluster resources.
//!
//! The dispatcher describes what it wants written through a
//! [`StatusUpdater`], which turns each report into an [`Update`] on a channel.
//! The [`Controller`] drains the channel: events are always published, while
//! status patches are only applied when this replica holds the lease.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod metrics;
mod updater;

#[cfg(test)]
mod tests;

pub use self::{
    controller::{Controller, FIELD_MANAGER},
    metrics::ControllerMetrics,
    updater::{Event, StatusPatch, StatusUpdater, Update},
};
