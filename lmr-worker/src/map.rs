use std::time::Instant;

use anyhow::Result;
use tracing::info;

use common::{JobId, JobKey, MapTask, TaskStats, Workload};

use crate::pipeline::{nanos, Pipeline, Stage};

/// Fold the task's input objects and write `<job>/task/mapper/<id>`.
pub async fn perform_map<W: Workload>(pipeline: &Pipeline<W>, task: &MapTask) -> Result<TaskStats> {
    let start = Instant::now();
    let job = JobId::new(&task.job_id)?;

    info!(
        job_id = %job,
        mapper_id = task.mapper_id,
        workload = pipeline.workload().name(),
        "Received map task over {} objects",
        task.keys.len()
    );

    let out = pipeline.run(Stage::Map, &task.bucket, &task.keys).await?;

    let key = job.key(JobKey::MapOutput {
        mapper: task.mapper_id,
    });
    pipeline
        .store()
        .put(&task.job_bucket, &key, out.encode(), out.metadata())
        .await?;

    let mut stats = out.stats;
    stats.total_time_nanos = nanos(start.elapsed());
    info!(
        job_id = %job,
        mapper_id = task.mapper_id,
        records = stats.record_count,
        keys = out.values.len(),
        "map output written to {key}"
    );
    Ok(stats)
}
