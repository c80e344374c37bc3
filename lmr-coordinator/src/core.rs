use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::{debug, error, info, warn};

use common::config::JobConfig;
use common::job::unix_time_secs;
use common::partitioner::create_batches;
use common::{
    Invoker, JobData, JobId, JobKey, JobPhase, ObjectInfo, ObjectStore, Partitioner, PutOutcome,
    ReduceTask, RoundMarker, StorageError,
};

use crate::snapshot::{Next, Snapshot};

/// Scheduling parameters shared by every job a coordinator serves.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub reducer_function: String,
    /// Memory of a reduce task, in bytes.
    pub memory_budget: u64,
    /// Fixed number of inputs per reducer instead of the memory heuristic.
    pub reducer_batch_size: Option<usize>,
}

impl CoordinatorConfig {
    pub fn from_job_config(config: &JobConfig) -> Self {
        Self {
            reducer_function: config.reducer_function.clone(),
            memory_budget: config.memory_budget(),
            reducer_batch_size: config.reducer_batch_size,
        }
    }
}

/// Result of one coordinator pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Waiting(JobPhase),
    Scheduled { round: u32, reducers: u32 },
    /// Another pass created the round's marker first.
    LostRace { round: u32 },
    /// Reducers re-invoked by [`Coordinator::resume`].
    Resumed { round: u32, reducers: Vec<u32> },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Done => write!(f, "DONE"),
            Outcome::Waiting(phase) => write!(f, "waiting: {phase}"),
            Outcome::Scheduled { round, reducers } => {
                write!(f, "scheduled round {round} with {reducers} reducers")
            }
            Outcome::LostRace { round } => write!(f, "round {round} already scheduled"),
            Outcome::Resumed { round, reducers } => {
                write!(f, "re-invoked reducers {reducers:?} of round {round}")
            }
        }
    }
}

/// The progress coordinator of one job.
///
/// Holds no job state: every call lists `<job>/` in the job bucket and
/// decides from what it finds.
pub struct Coordinator {
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn Invoker>,
    job_bucket: String,
    job: JobId,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        invoker: Arc<dyn Invoker>,
        job_bucket: impl Into<String>,
        job: JobId,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            invoker,
            job_bucket: job_bucket.into(),
            job,
            config,
        }
    }

    /// One pass of the control loop. Safe to run any number of times,
    /// concurrently included.
    pub async fn step(&self) -> Result<Outcome> {
        if self.result_exists().await? {
            debug!(job_id = %self.job, "result exists");
            return Ok(Outcome::Done);
        }

        let snapshot = self.snapshot().await?;
        let job_data = self.job_data().await?;
        let latest = self.latest_marker(&snapshot).await?;
        let assessment = snapshot.assess(&job_data, latest.as_ref().map(|(r, m)| (*r, m)));

        match assessment.next {
            Next::Nothing if assessment.phase == JobPhase::Done => Ok(Outcome::Done),
            Next::Nothing => {
                info!(job_id = %self.job, "{}", assessment.phase);
                Ok(Outcome::Waiting(assessment.phase))
            }
            Next::Schedule { round, inputs } => self.schedule(round, inputs).await,
        }
    }

    /// Current phase, without scheduling anything.
    pub async fn inspect(&self) -> Result<JobPhase> {
        if self.result_exists().await? {
            return Ok(JobPhase::Done);
        }
        let snapshot = self.snapshot().await?;
        let job_data = self.job_data().await?;
        let latest = self.latest_marker(&snapshot).await?;
        Ok(snapshot
            .assess(&job_data, latest.as_ref().map(|(r, m)| (*r, m)))
            .phase)
    }

    /// Restart a stalled round.
    ///
    /// Re-derives the latest round's batches from its sorted inputs and the
    /// marker's batch size, and invokes again only the reducers whose output
    /// is missing. Never writes a marker; a job that is not stalled in a
    /// reduce round gets a normal [`Coordinator::step`].
    pub async fn resume(&self) -> Result<Outcome> {
        if self.result_exists().await? {
            return Ok(Outcome::Done);
        }

        let snapshot = self.snapshot().await?;
        let job_data = self.job_data().await?;
        let Some((round, marker)) = self.latest_marker(&snapshot).await? else {
            return self.step().await;
        };
        let assessment = snapshot.assess(&job_data, Some((round, &marker)));
        if !matches!(assessment.phase, JobPhase::Reducing { .. })
            || matches!(assessment.next, Next::Schedule { .. })
        {
            return self.step().await;
        }

        let inputs = snapshot.round_inputs(round).to_vec();
        if inputs.len() as u64 != marker.total_s3_files {
            warn!(
                job_id = %self.job,
                round,
                found = inputs.len(),
                recorded = marker.total_s3_files,
                "round inputs differ from the marker"
            );
        }

        let batches = create_batches(inputs, marker.batch_size as usize);
        let mut reinvoked = vec![];
        for (reducer_id, batch) in (0u32..).zip(batches) {
            if reducer_id >= marker.reducer_count {
                break;
            }
            let task = self.reduce_task(round, marker.reducer_count, reducer_id, &batch);
            let output = self.job.key(JobKey::reducer_output(
                marker.reducer_count,
                round,
                reducer_id,
            ));
            if self.store.exists(&self.job_bucket, &output).await? {
                continue;
            }
            info!(job_id = %self.job, round, reducer_id, "re-invoking reducer");
            self.invoke(&task).await?;
            reinvoked.push(reducer_id);
        }

        Ok(Outcome::Resumed {
            round,
            reducers: reinvoked,
        })
    }

    async fn schedule(&self, round: u32, inputs: Vec<ObjectInfo>) -> Result<Outcome> {
        let partitioner = Partitioner::new(self.config.memory_budget)?
            .converging(true)
            .with_batch_size(self.config.reducer_batch_size)?;
        let batch_size = partitioner.batch_size(&inputs)?;
        let total = inputs.len() as u64;
        let batches = create_batches(inputs, batch_size);
        let reducers = u32::try_from(batches.len()).context("too many reducers")?;

        let marker = RoundMarker {
            reducer_count: reducers,
            batch_size: u32::try_from(batch_size).unwrap_or(u32::MAX),
            total_s3_files: total,
            start_time: unix_time_secs(),
        };
        let key = self.job.key(JobKey::RoundMarker { round });
        let created = self
            .store
            .put_if_absent(
                &self.job_bucket,
                &key,
                Bytes::from(serde_json::to_vec(&marker)?),
                Default::default(),
            )
            .await?;
        if created == PutOutcome::AlreadyExists {
            warn!(job_id = %self.job, round, "round marker already exists, not scheduling");
            return Ok(Outcome::LostRace { round });
        }

        info!(
            job_id = %self.job,
            round,
            reducers,
            batch_size,
            "scheduling reduce round over {total} objects"
        );

        let mut first_failure = None;
        for (reducer_id, batch) in (0u32..).zip(batches) {
            let task = self.reduce_task(round, reducers, reducer_id, &batch);
            if let Err(err) = self.invoke(&task).await {
                error!(job_id = %self.job, round, reducer_id, "failed to invoke reducer: {err:#}");
                first_failure.get_or_insert(err);
            }
        }
        if let Some(err) = first_failure {
            return Err(err);
        }

        Ok(Outcome::Scheduled { round, reducers })
    }

    fn reduce_task(
        &self,
        round: u32,
        n_reducers: u32,
        reducer_id: u32,
        batch: &[ObjectInfo],
    ) -> ReduceTask {
        ReduceTask {
            bucket: self.job_bucket.clone(),
            keys: batch.iter().map(|o| o.key.clone()).collect(),
            job_bucket: self.job_bucket.clone(),
            job_id: self.job.to_string(),
            n_reducers,
            step_id: round,
            reducer_id,
        }
    }

    async fn invoke(&self, task: &ReduceTask) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(task)?);
        self.invoker
            .invoke_async(&self.config.reducer_function, payload)
            .await?;
        Ok(())
    }

    async fn result_exists(&self) -> Result<bool, StorageError> {
        self.store
            .exists(&self.job_bucket, &self.job.key(JobKey::Result))
            .await
    }

    async fn snapshot(&self) -> Result<Snapshot, StorageError> {
        let objects = self
            .store
            .list(&self.job_bucket, &self.job.namespace())
            .await?;
        Ok(Snapshot::from_listing(&self.job, objects))
    }

    async fn job_data(&self) -> Result<JobData> {
        self.read_json(JobKey::JobData).await
    }

    async fn latest_marker(&self, snapshot: &Snapshot) -> Result<Option<(u32, RoundMarker)>> {
        match snapshot.latest_round() {
            Some(round) => {
                let marker = self.read_json(JobKey::RoundMarker { round }).await?;
                Ok(Some((round, marker)))
            }
            None => Ok(None),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(&self, key: JobKey) -> Result<T> {
        let key = self.job.key(key);
        let object = self.store.get(&self.job_bucket, &key).await?;
        Ok(serde_json::from_slice(&object.body).map_err(|err| StorageError::corrupt(&key, err))?)
    }
}
