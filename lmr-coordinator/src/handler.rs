use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error};

use common::{Invoker, JobId, ObjectStore, TaskHandler};

use crate::core::{Coordinator, CoordinatorConfig, Outcome};
use crate::event::{task_job, S3Event};

/// Coordinator deployed as a function, triggered by object notifications.
///
/// Runs one [`Coordinator::step`] per distinct job named by the event's
/// task keys. Other keys (markers, the result, job data) never trigger a
/// pass.
pub struct CoordinatorHandler {
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn Invoker>,
    config: CoordinatorConfig,
}

impl CoordinatorHandler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        invoker: Arc<dyn Invoker>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            invoker,
            config,
        }
    }

    pub async fn on_event(&self, event: &S3Event) -> Result<Vec<Outcome>> {
        let mut targets = BTreeSet::new();
        for created in event.objects() {
            let Some(job) = task_job(&created.key) else {
                debug!(key = %created.key, "ignoring notification");
                continue;
            };
            targets.insert((created.bucket.clone(), job.to_string()));
        }

        let mut outcomes = vec![];
        for (bucket, job) in targets {
            let job = JobId::new(job)?;
            let coordinator = Coordinator::new(
                self.store.clone(),
                self.invoker.clone(),
                bucket,
                job.clone(),
                self.config.clone(),
            );
            match coordinator.step().await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!(job_id = %job, "coordinator pass failed: {err:#}");
                    return Err(err);
                }
            }
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl TaskHandler for CoordinatorHandler {
    async fn handle(&self, payload: Bytes) -> Result<Bytes> {
        let event: S3Event =
            serde_json::from_slice(&payload).context("malformed notification payload")?;
        let outcomes = self.on_event(&event).await?;
        let summary: Vec<String> = outcomes.iter().map(ToString::to_string).collect();
        Ok(Bytes::from(serde_json::to_vec(&summary)?))
    }
}
