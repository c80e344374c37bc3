use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{Parser, Subcommand};

use common::config::{StoreArgs, DEFAULT_REDUCER_FUNCTION};

#[derive(Parser, Debug)]
#[command(version, about = "Run one pass of the progress coordinator", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Bucket holding the job namespaces.
    #[arg(short, long, env = "LMR_JOB_BUCKET", default_value = "lmr-jobs")]
    pub job_bucket: String,

    /// Function name reduce tasks are deployed under.
    #[arg(long, default_value = DEFAULT_REDUCER_FUNCTION)]
    pub reducer_function: String,

    /// Memory of a reduce task, in MB.
    #[arg(long, default_value_t = 1536)]
    pub lambda_memory: u64,

    /// Memory budget the reducer batch size is derived from, e.g. `1.5GiB`.
    /// Takes precedence over `--lambda-memory`.
    #[arg(long)]
    pub memory_budget: Option<ByteSize>,

    /// Fixed number of inputs per reducer.
    #[arg(long)]
    pub reducer_batch_size: Option<usize>,

    /// Lambda-compatible invoke endpoint.
    #[arg(long, env = "LMR_INVOKE_URL", default_value = "http://127.0.0.1:9001")]
    pub invoke_endpoint: String,

    /// Give up on the pass after this many seconds.
    #[arg(long, default_value_t = 300)]
    pub timeout_secs: u64,

    #[command(flatten)]
    pub store: StoreArgs,
}

impl Args {
    pub fn memory_budget(&self) -> u64 {
        self.memory_budget
            .unwrap_or_else(|| ByteSize::mb(self.lambda_memory))
            .as_u64()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one coordinator pass for a job.
    Step { job_id: String },

    /// Handle an S3 object-created notification (stdin when no file is given).
    Event { payload: Option<PathBuf> },

    /// Print the job's phase without scheduling anything.
    Inspect { job_id: String },

    /// Re-invoke the missing reducers of a stalled round.
    Resume { job_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_budget_accepts_human_sizes() {
        let args =
            Args::try_parse_from(["lmr-coordinator", "--memory-budget", "2GiB", "step", "j"])
                .unwrap();
        assert_eq!(args.memory_budget(), 2 * 1024 * 1024 * 1024);

        let args = Args::try_parse_from(["lmr-coordinator", "inspect", "j"]).unwrap();
        assert_eq!(args.memory_budget(), 1_536_000_000);
    }
}
