//! The progress coordinator.
//!
//! A stateless control loop: each pass lists a job's namespace, classifies
//! the job and, when a round has just completed, schedules the next one
//! behind a create-if-absent round marker.

pub mod core;
pub mod event;
pub mod handler;
pub mod notify;
pub mod snapshot;

pub use crate::core::{Coordinator, CoordinatorConfig, Outcome};
pub use crate::handler::CoordinatorHandler;
