//! Runtime core: supervision and lifecycle.
//!
//! Internal modules:
//! - [`worker`]: one connection's connect/retry/circuit-breaker state machine;
//! - [`coordinator`]: the control loop over a pool of workers, memory checks, health persistence;
//! - [`builder`]: coordinator construction with optional collaborators;
//! - [`signals`]: deferred lifecycle requests (OS signals and [`Controls`]).

mod builder;
mod coordinator;
mod signals;
mod worker;

pub use builder::CoordinatorBuilder;
pub use coordinator::{Coordinator, CoordinatorSnapshot, Flow};
pub use signals::{Controls, Intent};
pub use worker::{Worker, WorkerContext, WorkerSnapshot, WorkerStatus};
