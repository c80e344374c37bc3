use std::io::Read;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::Parser;
use tracing::info;

use common::minio::S3Store;
use common::utils::{init_tracing, string_from_bytes};
use common::{InputError, ObjectStore, TaskHandler};
use lmr_worker::core::{MapHandler, ReduceHandler};
use lmr_worker::pipeline::Pipeline;
use workload::with_workload;

mod args;
use args::{Args, TaskKind};

fn read_payload(args: &Args) -> Result<Bytes> {
    let buf = match &args.payload {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };
    Ok(Bytes::from(buf))
}

async fn run(args: Args) -> Result<Bytes> {
    let named = workload::try_named(&args.workload)
        .ok_or_else(|| anyhow!(InputError::UnknownWorkload(args.workload.clone())))?;
    let payload = read_payload(&args)?;
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::from_conf(args.store.client_config()));

    info!("Running {:?} task with workload `{named}`", args.stage);

    with_workload!(named, w => {
        let pipeline = Pipeline::new(store, w).with_concurrency(args.concurrency);
        let handler: Box<dyn TaskHandler> = match args.stage {
            TaskKind::Map => Box::new(MapHandler::with_pipeline(pipeline)),
            TaskKind::Reduce => Box::new(ReduceHandler::with_pipeline(pipeline)),
        };
        handler.handle(payload).await
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let response = run(args).await?;
    println!("{}", string_from_bytes(response)?);
    Ok(())
}
