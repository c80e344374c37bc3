//! Job records persisted in the namespace and the payloads exchanged with
//! task invocations.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de, Deserialize, Deserializer, Serialize};

/// `<jobId>/jobdata`, written once by the driver before any map task runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub map_count: u32,
    pub total_s3_files: u64,
    /// Seconds since the Unix epoch.
    pub start_time: f64,
}

/// `<jobId>/roundstate.<round>`, created at most once per round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundMarker {
    /// Reduce tasks scheduled for the round; the round's expected output count.
    #[serde(deserialize_with = "number_or_string")]
    pub reducer_count: u32,
    /// Inputs per reducer (the last reducer may get fewer).
    #[serde(deserialize_with = "number_or_string")]
    pub batch_size: u32,
    /// Objects consumed by the round.
    #[serde(deserialize_with = "number_or_string")]
    pub total_s3_files: u64,
    #[serde(deserialize_with = "number_or_string")]
    pub start_time: f64,
}

/// Accepts `3` as well as `"3"`: some marker writers quote every value.
fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw<T> {
        Number(T),
        Text(String),
    }

    match Raw::<T>::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
    }
}

/// Progress of a job, derived from a namespace listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Mapping { completed: u32, expected: u32 },
    Reducing { round: u32, completed: u32, expected: u32 },
    Done,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Mapping {
                completed,
                expected,
            } => write!(f, "MAPPING ({completed}/{expected} mappers)"),
            JobPhase::Reducing {
                round,
                completed,
                expected,
            } => write!(f, "REDUCING({round}) ({completed}/{expected} reducers)"),
            JobPhase::Done => write!(f, "DONE"),
        }
    }
}

/// Payload of a map invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapTask {
    /// Bucket holding the input objects.
    pub bucket: String,
    pub keys: Vec<String>,
    pub job_bucket: String,
    pub job_id: String,
    pub mapper_id: u32,
}

/// Payload of a reduce invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceTask {
    pub bucket: String,
    pub keys: Vec<String>,
    pub job_bucket: String,
    pub job_id: String,
    pub n_reducers: u32,
    pub step_id: u32,
    pub reducer_id: u32,
}

/// Execution statistics a task returns to its caller. Used for cost
/// accounting only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub input_object_count: u64,
    pub record_count: u64,
    pub total_time_nanos: u64,
    pub download_time_nanos: u64,
    pub fold_time_nanos: u64,
}

impl TaskStats {
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.total_time_nanos)
    }
}

/// Seconds since the Unix epoch, as stored in job records.
pub fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
