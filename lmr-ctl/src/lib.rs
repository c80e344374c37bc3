//! Job driver and cost accounting behind the `lmr-ctl` command.

pub mod cost;
pub mod driver;

pub use cost::{CostReport, JobUsage};
pub use driver::{generate_job_id, Completion, Driver, SubmitReport};
