use std::time::Instant;

use anyhow::Result;
use tracing::info;

use common::{JobId, JobKey, ReduceTask, TaskStats, Workload};

use crate::pipeline::{nanos, Pipeline, Stage};

/// Where a reducer writes: the canonical result when it is the only reducer
/// of its round, its round slot otherwise.
pub fn output_key(job: &JobId, task: &ReduceTask) -> String {
    job.key(JobKey::reducer_output(
        task.n_reducers,
        task.step_id,
        task.reducer_id,
    ))
}

/// Merge earlier outputs (read from `task.bucket`) into one.
pub async fn perform_reduce<W: Workload>(
    pipeline: &Pipeline<W>,
    task: &ReduceTask,
) -> Result<TaskStats> {
    let start = Instant::now();
    let job = JobId::new(&task.job_id)?;

    info!(
        job_id = %job,
        round = task.step_id,
        reducer_id = task.reducer_id,
        "Received reduce task {}/{} over {} objects",
        task.reducer_id + 1,
        task.n_reducers,
        task.keys.len()
    );

    let out = pipeline.run(Stage::Reduce, &task.bucket, &task.keys).await?;

    let key = output_key(&job, task);
    pipeline
        .store()
        .put(&task.job_bucket, &key, out.encode(), out.metadata())
        .await?;

    let mut stats = out.stats;
    stats.total_time_nanos = nanos(start.elapsed());
    info!(
        job_id = %job,
        round = task.step_id,
        reducer_id = task.reducer_id,
        keys = out.values.len(),
        "reduce output written to {key}"
    );
    Ok(stats)
}
