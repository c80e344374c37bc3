//! Map and reduce task bodies.
//!
//! Both run the same [`pipeline::Pipeline`]; they differ only in the schema
//! source lines are read under and in the key the accumulator is written to.

pub mod core;
pub mod map;
pub mod pipeline;
pub mod reduce;

pub use crate::core::{MapHandler, ReduceHandler};
