use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::info;

use common::minio::S3Store;
use common::utils::init_tracing;
use common::{HttpInvoker, Invoker, JobId, ObjectStore};
use lmr_coordinator::event::S3Event;
use lmr_coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandler};

mod args;
use args::{Args, Command};

fn read_event(path: Option<&std::path::Path>) -> Result<Bytes> {
    let buf = match path {
        Some(path) => std::fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    Ok(Bytes::from(buf))
}

async fn run(args: Args) -> Result<()> {
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::from_conf(args.store.client_config()));
    let invoker: Arc<dyn Invoker> = Arc::new(HttpInvoker::new(&args.invoke_endpoint));
    let config = CoordinatorConfig {
        reducer_function: args.reducer_function.clone(),
        memory_budget: args.memory_budget(),
        reducer_batch_size: args.reducer_batch_size,
    };
    let coordinator = |job_id: &str| -> Result<Coordinator> {
        Ok(Coordinator::new(
            store.clone(),
            invoker.clone(),
            args.job_bucket.clone(),
            JobId::new(job_id)?,
            config.clone(),
        ))
    };

    match &args.command {
        Command::Step { job_id } => {
            let outcome = coordinator(job_id)?.step().await?;
            println!("{outcome}");
        }
        Command::Inspect { job_id } => {
            let phase = coordinator(job_id)?.inspect().await?;
            println!("{job_id}: {phase}");
        }
        Command::Resume { job_id } => {
            let outcome = coordinator(job_id)?.resume().await?;
            println!("{outcome}");
        }
        Command::Event { payload } => {
            let raw = read_event(payload.as_deref())?;
            let event: S3Event = serde_json::from_slice(&raw).context("parsing notification")?;
            let handler = CoordinatorHandler::new(store.clone(), invoker.clone(), config.clone());
            for outcome in handler.on_event(&event).await? {
                println!("{outcome}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout_secs);
    info!("Coordinator pass on bucket `{}`", args.job_bucket);

    tokio::time::timeout(timeout, run(args))
        .await
        .with_context(|| format!("coordinator pass timed out after {timeout:?}"))?
}
