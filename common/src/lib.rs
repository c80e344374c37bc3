//! Shared building blocks of a serverless MapReduce engine.
//!
//! Users specify map and reduce work as short-lived functions; every bit of
//! job progress lives in an S3-compatible object namespace, which is the
//! only state shared between the driver, the tasks and the coordinator.

pub mod codec;
pub mod config;
pub mod error;
pub mod invoke;
pub mod job;
pub mod keys;
pub mod minio;
pub mod partitioner;
pub mod store;
pub mod utils;

pub use error::{InputError, InvocationError, ParseError, StorageError};
pub use invoke::{HttpInvoker, Invoker, LocalInvoker, TaskHandler};
pub use job::{JobData, JobPhase, MapTask, ReduceTask, RoundMarker, TaskStats};
pub use keys::{JobId, JobKey};
pub use partitioner::Partitioner;
pub use store::{MemoryStore, Metadata, ObjectCreated, ObjectInfo, ObjectStore, PutOutcome};

use codec::DecimalValue;

/////////////////////////////////////////////////////////////////////////////
// MapReduce application types
/////////////////////////////////////////////////////////////////////////////

/// A map reduce application.
///
/// Map tasks read raw input lines through [`Workload::map_record`]; reduce
/// tasks read the `key,value` lines earlier tasks wrote. Both fold every
/// pair into one accumulator with [`Workload::fold`], so `fold` must be
/// associative and commutative for the reduce tree to be order-independent.
pub trait Workload: Send + Sync + 'static {
    /// The accumulated value, carried between rounds as decimal text.
    type Value: DecimalValue;

    /// Short name used to select the workload on the command line.
    fn name(&self) -> &'static str;

    /// Parse one raw input record into the pairs it contributes.
    ///
    /// An error discards the whole record; nothing it would have emitted is
    /// folded.
    fn map_record(&self, record: &str) -> Result<Vec<(String, Self::Value)>, ParseError>;

    /// Combine `value` with the value accumulated so far for `key`.
    fn fold(&self, key: &str, value: Self::Value, acc: Option<Self::Value>) -> Self::Value;
}
