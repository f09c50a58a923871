#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod configurator;
pub mod extended;
pub mod queue;
mod reason;
pub mod resource;
mod resource_id;
pub mod task;
pub mod weights;

pub use self::{
    configurator::{Configurator, ConfigParams, MgmtConfigParams, SecretFileManager, Warnings},
    queue::{QueueError, WorkQueue},
    reason::{Reason, State},
    resource::{
        IngressConfiguration, MinionConfiguration, Operation, Problem, Resource, ResourceChange,
        TransportServerConfiguration, VirtualServerConfiguration,
    },
    resource_id::ResourceId,
    task::{Kind, Task},
};
