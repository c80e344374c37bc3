//! Error taxonomy shared by every component.
//!
//! A lost round-marker race is not represented here: it surfaces as
//! [`crate::store::PutOutcome::AlreadyExists`].

use std::time::Duration;

use thiserror::Error;

/// Bad job parameters, rejected before any work is started.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("no input objects matched `{0}`")]
    EmptyInput(String),
    #[error("invalid job id `{0}`")]
    InvalidJobId(String),
    #[error("invalid object path `{0}`: {1}")]
    InvalidPath(String, String),
    #[error("memory budget must be positive")]
    ZeroBudget,
    #[error("batch size must be positive")]
    ZeroBatchSize,
    #[error("unknown workload `{0}`")]
    UnknownWorkload(String),
}

/// The object namespace is unavailable or the requested key is missing.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
    #[error("object {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn corrupt(key: &str, reason: impl ToString) -> Self {
        StorageError::Corrupt {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// A compute invocation failed or did not return in time.
#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("no function registered under `{0}`")]
    UnknownFunction(String),
    #[error("invocation of `{function}` failed: {reason}")]
    Failed { function: String, reason: String },
    #[error("invocation of `{function}` timed out after {timeout:?}")]
    Timeout { function: String, timeout: Duration },
}

impl InvocationError {
    pub fn failed(function: &str, reason: impl ToString) -> Self {
        InvocationError::Failed {
            function: function.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A single record could not be parsed. Never fatal for a task.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("malformed record `{record}`: {reason}")]
pub struct ParseError {
    pub record: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(record: &str, reason: impl ToString) -> Self {
        Self {
            record: record.chars().take(80).collect(),
            reason: reason.to_string(),
        }
    }
}
