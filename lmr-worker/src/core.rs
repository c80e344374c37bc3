//! Deployable task bodies: decode the invocation payload, run the task and
//! answer with its [`TaskStats`](common::TaskStats) as JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::error;

use common::{MapTask, ObjectStore, ReduceTask, TaskHandler, Workload};

use crate::map::perform_map;
use crate::pipeline::Pipeline;
use crate::reduce::perform_reduce;

pub struct MapHandler<W> {
    pipeline: Pipeline<W>,
}

impl<W: Workload> MapHandler<W> {
    pub fn new(store: Arc<dyn ObjectStore>, workload: W) -> Self {
        Self {
            pipeline: Pipeline::new(store, workload),
        }
    }

    pub fn with_pipeline(pipeline: Pipeline<W>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl<W: Workload> TaskHandler for MapHandler<W> {
    async fn handle(&self, payload: Bytes) -> Result<Bytes> {
        let task: MapTask = serde_json::from_slice(&payload).context("malformed map payload")?;
        let stats = perform_map(&self.pipeline, &task).await.map_err(|err| {
            error!(job_id = %task.job_id, mapper_id = task.mapper_id, "map task failed: {err:#}");
            err
        })?;
        Ok(Bytes::from(serde_json::to_vec(&stats)?))
    }
}

pub struct ReduceHandler<W> {
    pipeline: Pipeline<W>,
}

impl<W: Workload> ReduceHandler<W> {
    pub fn new(store: Arc<dyn ObjectStore>, workload: W) -> Self {
        Self {
            pipeline: Pipeline::new(store, workload),
        }
    }

    pub fn with_pipeline(pipeline: Pipeline<W>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl<W: Workload> TaskHandler for ReduceHandler<W> {
    async fn handle(&self, payload: Bytes) -> Result<Bytes> {
        let task: ReduceTask =
            serde_json::from_slice(&payload).context("malformed reduce payload")?;
        let stats = perform_reduce(&self.pipeline, &task).await.map_err(|err| {
            error!(
                job_id = %task.job_id,
                round = task.step_id,
                reducer_id = task.reducer_id,
                "reduce task failed: {err:#}"
            );
            err
        })?;
        Ok(Bytes::from(serde_json::to_vec(&stats)?))
    }
}

#[cfg(test)]
mod tests {
    use common::store::Metadata;
    use common::{MemoryStore, TaskStats};
    use workload::WordCount;

    use super::*;

    #[tokio::test]
    async fn map_handler_answers_with_stats() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("in", "a", Bytes::from("hello world\n"), Metadata::new())
            .await
            .unwrap();
        let handler = MapHandler::new(store.clone(), WordCount);

        let payload = serde_json::json!({
            "bucket": "in",
            "keys": ["a"],
            "jobBucket": "jobs",
            "jobId": "j",
            "mapperId": 1
        });
        let response = handler
            .handle(Bytes::from(payload.to_string()))
            .await
            .unwrap();

        let stats: TaskStats = serde_json::from_slice(&response).unwrap();
        assert_eq!(stats.record_count, 1);
        assert!(store.exists("jobs", "j/task/mapper/1").await.unwrap());
    }

    #[tokio::test]
    async fn reduce_handler_rejects_garbage() {
        let handler = ReduceHandler::new(Arc::new(MemoryStore::new()), WordCount);
        assert!(handler.handle(Bytes::from_static(b"{}")).await.is_err());
    }
}
