//! Configuration shared by the binaries: object store connection flags and
//! the driver's job config file.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

use crate::minio::ClientConfig;

/// Connection flags for the S3-compatible object store.
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Minio access key / user ID.
    #[arg(long, env = "LMR_ACCESS_KEY_ID", default_value = "minioadmin")]
    pub access_key_id: String,

    /// Minio secret key / password.
    #[arg(long, env = "LMR_SECRET_ACCESS_KEY", default_value = "minioadmin")]
    pub secret_access_key: String,

    /// Object store region. Defaults to the job config's `region`, then
    /// `us-east-1`.
    #[arg(long, env = "LMR_REGION")]
    pub region: Option<String>,

    /// Object store endpoint.
    #[arg(long, env = "LMR_MINIO_URL", default_value = "http://127.0.0.1:9000")]
    pub minio_url: String,
}

impl StoreArgs {
    pub fn client_config(&self) -> ClientConfig {
        self.client_config_or(DEFAULT_REGION)
    }

    /// Client config using `fallback_region` unless a region was given.
    pub fn client_config_or(&self, fallback_region: &str) -> ClientConfig {
        ClientConfig {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            region: self
                .region
                .clone()
                .unwrap_or_else(|| fallback_region.to_string()),
            url: self.minio_url.clone(),
        }
    }
}

pub const DEFAULT_REGION: &str = "us-east-1";

pub const DEFAULT_MAPPER_FUNCTION: &str = "lmr-mapper";
pub const DEFAULT_REDUCER_FUNCTION: &str = "lmr-reducer";
pub const DEFAULT_COORDINATOR_FUNCTION: &str = "lmr-coordinator";

/// Driver job configuration, usually `driverconfig.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    /// Bucket holding the input objects.
    pub bucket: String,

    /// Bucket holding the job namespace.
    pub job_bucket: String,

    /// Input key prefix within `bucket`.
    #[serde(default)]
    pub prefix: String,

    /// Optional glob the input keys must match.
    #[serde(default)]
    pub glob: Option<String>,

    /// Object store region, used when no `--region` is given.
    #[serde(default = "default_region")]
    pub region: String,

    /// Memory of every task, in MB.
    #[serde(default = "default_lambda_memory")]
    pub lambda_memory: u64,

    /// Maximum number of map tasks in flight.
    #[serde(default = "default_concurrent_lambdas")]
    pub concurrent_lambdas: usize,

    /// Per-invocation timeout, in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// Fixed number of inputs per map task instead of the memory heuristic.
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Fixed number of inputs per reduce task instead of the memory heuristic.
    #[serde(default)]
    pub reducer_batch_size: Option<usize>,

    #[serde(default = "default_mapper")]
    pub mapper_function: String,

    #[serde(default = "default_reducer")]
    pub reducer_function: String,

    #[serde(default = "default_coordinator")]
    pub coordinator_function: String,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_lambda_memory() -> u64 {
    1536
}

fn default_concurrent_lambdas() -> usize {
    100
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_mapper() -> String {
    DEFAULT_MAPPER_FUNCTION.to_string()
}

fn default_reducer() -> String {
    DEFAULT_REDUCER_FUNCTION.to_string()
}

fn default_coordinator() -> String {
    DEFAULT_COORDINATOR_FUNCTION.to_string()
}

impl JobConfig {
    /// Config with every optional field at its default.
    pub fn new(bucket: impl Into<String>, job_bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            job_bucket: job_bucket.into(),
            prefix: String::new(),
            glob: None,
            region: default_region(),
            lambda_memory: default_lambda_memory(),
            concurrent_lambdas: default_concurrent_lambdas(),
            task_timeout_secs: default_task_timeout_secs(),
            batch_size: None,
            reducer_batch_size: None,
            mapper_function: default_mapper(),
            reducer_function: default_reducer(),
            coordinator_function: default_coordinator(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading job config {}", path.display()))?;
        let config: JobConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing job config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.bucket.is_empty(), "`bucket` must not be empty");
        anyhow::ensure!(!self.job_bucket.is_empty(), "`jobBucket` must not be empty");
        anyhow::ensure!(self.lambda_memory > 0, "`lambdaMemory` must be positive");
        anyhow::ensure!(
            self.concurrent_lambdas > 0,
            "`concurrentLambdas` must be positive"
        );
        anyhow::ensure!(
            self.batch_size != Some(0) && self.reducer_batch_size != Some(0),
            "batch sizes must be positive"
        );
        Ok(())
    }

    /// Task memory in bytes.
    pub fn memory_budget(&self) -> u64 {
        ByteSize::mb(self.lambda_memory).as_u64()
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_a_minimal_config_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bucket": "input", "jobBucket": "jobs", "prefix": "logs/", "lambdaMemory": 1024}}"#
        )
        .unwrap();

        let config = JobConfig::load(file.path()).unwrap();
        assert_eq!(config.bucket, "input");
        assert_eq!(config.prefix, "logs/");
        assert_eq!(config.memory_budget(), 1_024_000_000);
        assert_eq!(config.concurrent_lambdas, 100);
        assert_eq!(config.reducer_function, DEFAULT_REDUCER_FUNCTION);
        assert_eq!(config.task_timeout(), Duration::from_secs(300));
        assert_eq!(config.region, DEFAULT_REGION);
    }

    #[derive(clap::Parser)]
    struct Cli {
        #[command(flatten)]
        store: StoreArgs,
    }

    #[test]
    fn the_job_config_region_applies_unless_a_region_flag_is_given() {
        use clap::Parser;

        let cli = Cli::try_parse_from(["lmr"]).unwrap();
        if cli.store.region.is_none() {
            assert_eq!(cli.store.client_config_or("eu-west-1").region, "eu-west-1");
            assert_eq!(cli.store.client_config().region, DEFAULT_REGION);
        }

        let cli = Cli::try_parse_from(["lmr", "--region", "ap-south-1"]).unwrap();
        assert_eq!(cli.store.client_config_or("eu-west-1").region, "ap-south-1");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bucket": "input", "jobBucket": "jobs", "concurrentLambdas": 0}}"#
        )
        .unwrap();
        assert!(JobConfig::load(file.path()).is_err());
    }
}
