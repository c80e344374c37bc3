use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use common::config::{JobConfig, StoreArgs};
use common::minio::S3Path;

//
// For parsing user specified command.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,

    /// Driver job config file.
    #[arg(short, long, global = true, default_value = "driverconfig.json")]
    pub config: PathBuf,

    /// Lambda-compatible invoke endpoint.
    #[arg(
        long,
        global = true,
        env = "LMR_INVOKE_URL",
        default_value = "http://127.0.0.1:9001"
    )]
    pub invoke_endpoint: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub job: JobOverrides,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List all jobs in the job bucket and their phases.
    Jobs,
    /// Display the phase of a job, as the coordinator sees it.
    Status { job_id: String },
    /// Re-invoke the missing reducers of a stalled reduce round.
    Resume { job_id: String },
    /// Print the result of a finished job.
    Fetch { job_id: String },
    /// Submit a job: run the map phase, then wait for the result and report costs.
    Submit {
        /// Job id; generated when omitted.
        #[arg(short, long)]
        job_id: Option<String>,

        /// Return once the map phase is done.
        #[arg(long)]
        no_wait: bool,

        /// Seconds between result checks.
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,

        /// Give up waiting for the result after this many seconds.
        #[arg(long, default_value_t = 3600)]
        wait_timeout_secs: u64,
    },
}

/// Flags overriding the job config file.
#[derive(ClapArgs, Debug, Default)]
pub struct JobOverrides {
    /// Input location as `s3://bucket/prefix`; sets both `--bucket` and `--prefix`.
    #[arg(long, global = true, conflicts_with_all = ["bucket", "prefix"])]
    pub input: Option<S3Path>,

    /// Bucket holding the input objects.
    #[arg(long, global = true)]
    pub bucket: Option<String>,

    /// Bucket holding the job namespaces.
    #[arg(long, global = true)]
    pub job_bucket: Option<String>,

    /// Input key prefix.
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Glob the input keys must match.
    #[arg(long, global = true)]
    pub glob: Option<String>,

    /// Memory of every task, in MB.
    #[arg(long, global = true)]
    pub lambda_memory: Option<u64>,

    /// Maximum number of map tasks in flight.
    #[arg(long, global = true)]
    pub concurrent_lambdas: Option<usize>,

    /// Fixed number of inputs per map task.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,

    /// Fixed number of inputs per reduce task.
    #[arg(long, global = true)]
    pub reducer_batch_size: Option<usize>,
}

impl JobOverrides {
    /// Config from `file` when given, flags on top.
    pub fn apply(&self, file: Option<JobConfig>) -> anyhow::Result<JobConfig> {
        let bucket = self
            .input
            .as_ref()
            .map(|input| &input.bucket)
            .or(self.bucket.as_ref());
        let prefix = self
            .input
            .as_ref()
            .map(|input| &input.prefix)
            .or(self.prefix.as_ref());

        let mut config = match file {
            Some(config) => config,
            None => {
                let (Some(bucket), Some(job_bucket)) = (bucket, &self.job_bucket) else {
                    anyhow::bail!("no job config file: `--bucket` and `--job-bucket` are required");
                };
                JobConfig::new(bucket, job_bucket)
            }
        };

        if let Some(bucket) = bucket {
            config.bucket = bucket.clone();
        }
        if let Some(job_bucket) = &self.job_bucket {
            config.job_bucket = job_bucket.clone();
        }
        if let Some(prefix) = prefix {
            config.prefix = prefix.clone();
        }
        if let Some(glob) = &self.glob {
            config.glob = Some(glob.clone());
        }
        if let Some(memory) = self.lambda_memory {
            config.lambda_memory = memory;
        }
        if let Some(n) = self.concurrent_lambdas {
            config.concurrent_lambdas = n;
        }
        if self.batch_size.is_some() {
            config.batch_size = self.batch_size;
        }
        if self.reducer_batch_size.is_some() {
            config.reducer_batch_size = self.reducer_batch_size;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_the_file() {
        let overrides = JobOverrides {
            prefix: Some("2024/".into()),
            reducer_batch_size: Some(4),
            ..Default::default()
        };
        let config = overrides
            .apply(Some(JobConfig::new("input", "jobs")))
            .unwrap();
        assert_eq!(config.bucket, "input");
        assert_eq!(config.prefix, "2024/");
        assert_eq!(config.reducer_batch_size, Some(4));
    }

    #[test]
    fn buckets_are_required_without_a_file() {
        assert!(JobOverrides::default().apply(None).is_err());

        let overrides = JobOverrides {
            bucket: Some("input".into()),
            job_bucket: Some("jobs".into()),
            ..Default::default()
        };
        assert_eq!(overrides.apply(None).unwrap().job_bucket, "jobs");
    }

    #[test]
    fn an_s3_input_sets_bucket_and_prefix() {
        let args = Args::try_parse_from([
            "lmr-ctl",
            "submit",
            "--input",
            "s3://logs/2016/*",
            "--job-bucket",
            "jobs",
        ])
        .unwrap();
        let config = args.job.apply(None).unwrap();
        assert_eq!(config.bucket, "logs");
        assert_eq!(config.prefix, "2016/");

        assert!(Args::try_parse_from(["lmr-ctl", "jobs", "--input", "http://logs/"]).is_err());
    }

    #[test]
    fn parses_a_submit_command() {
        let args = Args::try_parse_from([
            "lmr-ctl",
            "submit",
            "--job-id",
            "j1",
            "--bucket",
            "input",
            "--batch-size",
            "2",
        ])
        .unwrap();
        assert!(matches!(args.command, Commands::Submit { job_id: Some(ref id), .. } if id == "j1"));
        assert_eq!(args.job.batch_size, Some(2));
    }
}
