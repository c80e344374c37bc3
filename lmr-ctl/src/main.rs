use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use common::config::JobConfig;
use common::minio::S3Store;
use common::utils::{init_tracing, string_from_bytes};
use common::{HttpInvoker, Invoker, JobId, ObjectStore};
use lmr_coordinator::{Coordinator, CoordinatorConfig};
use lmr_ctl::{generate_job_id, CostReport, Driver};

mod args;
use args::{Args, Commands};

fn load_config(args: &Args) -> Result<JobConfig> {
    let file = if args.config.exists() {
        Some(JobConfig::load(&args.config)?)
    } else {
        None
    };
    args.job.apply(file)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = load_config(&args)?;

    let client_config = args.store.client_config_or(&config.region);
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::from_conf(client_config));
    let invoker: Arc<dyn Invoker> = Arc::new(HttpInvoker::new(&args.invoke_endpoint));
    let coordinator = |job: JobId| {
        Coordinator::new(
            store.clone(),
            invoker.clone(),
            config.job_bucket.clone(),
            job,
            CoordinatorConfig::from_job_config(&config),
        )
    };
    let driver = Driver::new(store.clone(), invoker.clone(), config.clone());

    match args.command {
        Commands::Jobs => {
            println!("[Jobs]");
            for job in driver.jobs().await? {
                let phase = coordinator(job.clone()).inspect().await?;
                println!("{job}: {phase}");
            }
        }
        Commands::Status { job_id } => {
            let phase = coordinator(JobId::new(job_id.as_str())?).inspect().await?;
            println!("[Status]");
            println!("{job_id}: {phase}");
        }
        Commands::Resume { job_id } => {
            let outcome = coordinator(JobId::new(job_id)?).resume().await?;
            println!("{outcome}");
        }
        Commands::Fetch { job_id } => {
            let body = driver.fetch_result(&JobId::new(job_id)?).await?;
            print!("{}", string_from_bytes(body)?);
        }
        Commands::Submit {
            job_id,
            no_wait,
            poll_secs,
            wait_timeout_secs,
        } => {
            let job = match job_id {
                Some(id) => JobId::new(id)?,
                None => generate_job_id()?,
            };
            info!("Submitting job `{job}`");

            let submitted = driver.submit(&job).await?;
            println!(
                "Job `{job}`: {} mappers over {} objects",
                submitted.map_count, submitted.input_objects
            );
            if no_wait {
                return Ok(());
            }

            let completion = driver
                .wait_for_completion(
                    &job,
                    Duration::from_secs(poll_secs.max(1)),
                    Duration::from_secs(wait_timeout_secs),
                )
                .await?;
            let report = CostReport::estimate(&completion.usage(&submitted), config.lambda_memory);
            println!("Job `{job}` done: {} reducer outputs", completion.reducer_outputs);
            println!("{report}");
        }
    }

    Ok(())
}
