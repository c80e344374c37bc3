//! Runs a whole job in one process: local files are loaded into an
//! in-memory namespace and the mapper, reducer and coordinator functions
//! are deployed on a local invoker.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::{debug, info};

use common::config::JobConfig;
use common::store::Metadata;
use common::utils::init_tracing;
use common::{InputError, Invoker, LocalInvoker, MemoryStore, ObjectStore};
use lmr_coordinator::notify::forward_notifications;
use lmr_coordinator::{CoordinatorConfig, CoordinatorHandler};
use lmr_ctl::{generate_job_id, CostReport, Driver};
use lmr_worker::{MapHandler, ReduceHandler};
use workload::with_workload;

const INPUT_BUCKET: &str = "input";
const JOB_BUCKET: &str = "jobs";

#[derive(Parser, Debug)]
#[command(version, about = "Run a MapReduce job over local files", long_about = None)]
struct Args {
    /// Glob selecting the input files, e.g. `data/**/*.csv`.
    input: String,

    /// The workload to run: one of `ad-revenue`, `word-count`, `vertex-degree`.
    #[arg(short, long, default_value = "ad-revenue")]
    workload: String,

    /// Write the result here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Input objects per mapper. Derived from the memory budget when omitted.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Inputs per reducer. Derived from the memory budget when omitted.
    #[arg(long)]
    reducer_batch_size: Option<usize>,

    /// Memory, in MB, the simulated functions are given.
    #[arg(long, default_value_t = 1536)]
    lambda_memory: u64,

    /// Mappers in flight at once.
    #[arg(long, default_value_t = 8)]
    concurrent_lambdas: usize,

    /// Give up when no result appears within this many seconds.
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,
}

impl Args {
    fn job_config(&self) -> Result<JobConfig> {
        let mut config = JobConfig::new(INPUT_BUCKET, JOB_BUCKET);
        config.batch_size = self.batch_size;
        config.reducer_batch_size = self.reducer_batch_size;
        config.lambda_memory = self.lambda_memory;
        config.concurrent_lambdas = self.concurrent_lambdas;
        config.task_timeout_secs = self.timeout_secs;
        config.validate()?;
        Ok(config)
    }
}

/// Object key for a local file: its path, without a leading `/`.
fn object_key(path: &Path) -> String {
    path.to_string_lossy().trim_start_matches('/').replace('\\', "/")
}

async fn load_inputs(store: &MemoryStore, pattern: &str) -> Result<usize> {
    let mut loaded = 0;
    for entry in glob::glob(pattern).with_context(|| format!("bad input glob `{pattern}`"))? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }
        let body = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let key = object_key(&path);
        debug!(key, size = body.len(), "loaded input");
        store
            .put(INPUT_BUCKET, &key, Bytes::from(body), Metadata::new())
            .await?;
        loaded += 1;
    }
    if loaded == 0 {
        bail!(InputError::EmptyInput(pattern.to_string()));
    }
    Ok(loaded)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let named = workload::try_named(&args.workload)
        .ok_or_else(|| anyhow!(InputError::UnknownWorkload(args.workload.clone())))?;
    let config = args.job_config()?;

    let store = Arc::new(MemoryStore::new());
    let loaded = load_inputs(&store, &args.input).await?;
    info!("Loaded {loaded} input files");

    let invoker = LocalInvoker::new(config.task_timeout());
    let shared: Arc<dyn Invoker> = Arc::new(invoker.clone());
    with_workload!(named, w => {
        invoker.register(
            config.mapper_function.clone(),
            Arc::new(MapHandler::new(store.clone(), w)),
        );
        invoker.register(
            config.reducer_function.clone(),
            Arc::new(ReduceHandler::new(store.clone(), w)),
        );
    });
    invoker.register(
        config.coordinator_function.clone(),
        Arc::new(CoordinatorHandler::new(
            store.clone(),
            shared.clone(),
            CoordinatorConfig::from_job_config(&config),
        )),
    );
    let notifier = forward_notifications(
        store.subscribe(),
        shared.clone(),
        config.coordinator_function.clone(),
        JOB_BUCKET,
    );

    let driver = Driver::new(store.clone(), shared, config.clone());
    let job = generate_job_id()?;
    let submitted = driver.submit(&job).await?;
    info!(
        job_id = %job,
        "{} mappers over {} objects",
        submitted.map_count, submitted.input_objects
    );

    let completion = driver
        .wait_for_completion(
            &job,
            Duration::from_millis(50),
            Duration::from_secs(args.timeout_secs),
        )
        .await?;
    let result = driver.fetch_result(&job).await?;
    invoker.wait_idle().await;
    notifier.abort();

    match &args.output {
        Some(path) => tokio::fs::write(path, &result)
            .await
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", String::from_utf8_lossy(&result)),
    }

    let report = CostReport::estimate(&completion.usage(&submitted), config.lambda_memory);
    eprintln!("{report}");
    Ok(())
}
