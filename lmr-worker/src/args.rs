use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use common::config::StoreArgs;

#[derive(Parser, Debug)]
#[command(version, about = "Run one map or reduce task", long_about = None)]
pub struct Args {
    /// Kind of task the payload describes.
    #[arg(value_enum)]
    pub stage: TaskKind,

    /// The workload to run: one of `ad-revenue`, `word-count`, `vertex-degree`.
    #[arg(short, long, default_value = "ad-revenue")]
    pub workload: String,

    /// JSON invocation payload. Reads stdin when omitted.
    #[arg(short, long)]
    pub payload: Option<PathBuf>,

    /// Source objects fetched at the same time.
    #[arg(short, long, default_value_t = lmr_worker::pipeline::DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    #[command(flatten)]
    pub store: StoreArgs,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Map,
    Reduce,
}
