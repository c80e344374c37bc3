//! Typed encoding of the job namespace.
//!
//! Every object the engine reads or writes under a job lives at one of
//! these paths:
//!
//! ```text
//! <jobId>/jobdata
//! <jobId>/task/mapper/<mapperIndex>
//! <jobId>/task/reducer/<round>/<reducerIndex>
//! <jobId>/roundstate.<round>
//! <jobId>/result
//! ```
//!
//! [`JobKey`] converts between these strings and a closed set of variants,
//! so the coordinator never has to pattern-match raw key suffixes.

use std::fmt;
use std::str::FromStr;

use crate::error::InputError;

const JOBDATA: &str = "jobdata";
const RESULT: &str = "result";
const TASK: &str = "task";
const MAPPER_DIR: &str = "task/mapper/";
const REDUCER_DIR: &str = "task/reducer/";
const ROUND_MARKER: &str = "roundstate.";

/// Identifies one job; the first path segment of every key it owns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self, InputError> {
        let id = id.into();
        let valid = !id.trim().is_empty()
            && !id.contains('/')
            && !id.contains('\\')
            && !id.contains("..");
        if valid {
            Ok(Self(id))
        } else {
            Err(InputError::InvalidJobId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix under which the whole job namespace is listed.
    pub fn namespace(&self) -> String {
        format!("{}/", self.0)
    }

    /// Prefix that task-output notifications are filtered on.
    pub fn task_prefix(&self) -> String {
        format!("{}/{}", self.0, TASK)
    }

    pub fn key(&self, key: JobKey) -> String {
        key.encode(self)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobId::new(s)
    }
}

/// One object in a job namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKey {
    JobData,
    MapOutput { mapper: u32 },
    ReduceOutput { round: u32, reducer: u32 },
    RoundMarker { round: u32 },
    Result,
}

impl JobKey {
    pub fn encode(&self, job: &JobId) -> String {
        match self {
            JobKey::JobData => format!("{job}/{JOBDATA}"),
            JobKey::MapOutput { mapper } => format!("{job}/{MAPPER_DIR}{mapper}"),
            JobKey::ReduceOutput { round, reducer } => {
                format!("{job}/{REDUCER_DIR}{round}/{reducer}")
            }
            JobKey::RoundMarker { round } => format!("{job}/{ROUND_MARKER}{round}"),
            JobKey::Result => format!("{job}/{RESULT}"),
        }
    }

    /// Output slot of reducer `reducer` in `round` when the round has
    /// `n_reducers` reducers. A lone reducer writes the canonical result.
    pub fn reducer_output(n_reducers: u32, round: u32, reducer: u32) -> JobKey {
        if n_reducers == 1 {
            JobKey::Result
        } else {
            JobKey::ReduceOutput { round, reducer }
        }
    }

    /// Decode a full object key. Returns `None` for keys outside the job or
    /// keys that do not follow the layout exactly.
    pub fn decode(job: &JobId, key: &str) -> Option<JobKey> {
        let rest = key.strip_prefix(job.as_str())?.strip_prefix('/')?;

        if rest == JOBDATA {
            return Some(JobKey::JobData);
        }
        if rest == RESULT {
            return Some(JobKey::Result);
        }
        if let Some(index) = rest.strip_prefix(MAPPER_DIR) {
            return parse_index(index).map(|mapper| JobKey::MapOutput { mapper });
        }
        if let Some(round) = rest.strip_prefix(ROUND_MARKER) {
            return parse_index(round).map(|round| JobKey::RoundMarker { round });
        }
        if let Some(tail) = rest.strip_prefix(REDUCER_DIR) {
            let (round, reducer) = tail.split_once('/')?;
            return Some(JobKey::ReduceOutput {
                round: parse_index(round)?,
                reducer: parse_index(reducer)?,
            });
        }
        None
    }
}

/// Digits only: rejects signs, whitespace and empty strings that `u32::from_str`
/// would otherwise let through or report ambiguously.
fn parse_index(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobId {
        JobId::new("bl-release").unwrap()
    }

    #[test]
    fn encodes_the_namespace_layout() {
        let job = job();
        assert_eq!(job.key(JobKey::JobData), "bl-release/jobdata");
        assert_eq!(
            job.key(JobKey::MapOutput { mapper: 3 }),
            "bl-release/task/mapper/3"
        );
        assert_eq!(
            job.key(JobKey::ReduceOutput { round: 1, reducer: 12 }),
            "bl-release/task/reducer/1/12"
        );
        assert_eq!(
            job.key(JobKey::RoundMarker { round: 4 }),
            "bl-release/roundstate.4"
        );
        assert_eq!(job.key(JobKey::Result), "bl-release/result");
    }

    #[test]
    fn decode_inverts_encode() {
        let job = job();
        let keys = [
            JobKey::JobData,
            JobKey::MapOutput { mapper: 1 },
            JobKey::ReduceOutput { round: 11, reducer: 2 },
            JobKey::ReduceOutput { round: 1, reducer: 12 },
            JobKey::RoundMarker { round: 7 },
            JobKey::Result,
        ];
        for key in keys {
            assert_eq!(JobKey::decode(&job, &key.encode(&job)), Some(key));
        }
    }

    #[test]
    fn decode_rejects_foreign_and_malformed_keys() {
        let job = job();
        for key in [
            "other/task/mapper/1",
            "bl-release-2/task/mapper/1",
            "bl-release/task/mapper/",
            "bl-release/task/mapper/x1",
            "bl-release/task/mapper/+1",
            "bl-release/task/reducer1/2",
            "bl-release/task/reducer/1",
            "bl-release/task/reducer/1/2/3",
            "bl-release/task/reducer//2",
            "bl-release/roundstate.",
            "bl-release/results",
            "bl-release/reducerexectime/rtime_1_0.5",
        ] {
            assert_eq!(JobKey::decode(&job, key), None, "{key}");
        }
    }

    #[test]
    fn rounds_share_one_reducer_directory() {
        let job = job();
        let round_1 = job.key(JobKey::ReduceOutput { round: 1, reducer: 12 });
        let round_11 = job.key(JobKey::ReduceOutput { round: 11, reducer: 2 });
        assert!(round_1.starts_with("bl-release/task/reducer/1/"));
        assert!(!round_11.starts_with("bl-release/task/reducer/1/"));
        assert_eq!(
            JobKey::decode(&job, "bl-release/task/reducer/11/2"),
            Some(JobKey::ReduceOutput { round: 11, reducer: 2 })
        );
    }

    #[test]
    fn job_id_rejects_path_characters() {
        assert!(JobId::new("").is_err());
        assert!(JobId::new("a/b").is_err());
        assert!(JobId::new("..").is_err());
        assert!(JobId::new("lmr-abc123").is_ok());
    }
}
