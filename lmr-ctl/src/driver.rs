//! The job driver: starts the map phase and, optionally, waits for the
//! result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use globset::{Glob, GlobMatcher};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use common::config::JobConfig;
use common::job::unix_time_secs;
use common::partitioner::is_compressed_key;
use common::store::{Metadata, META_PROCESSING_TIME};
use common::{
    InputError, Invoker, JobData, JobId, JobKey, MapTask, ObjectInfo, ObjectStore, Partitioner,
    PutOutcome, TaskStats,
};

use crate::cost::JobUsage;

/// Namespace polling interval of [`Driver::wait_for_completion`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// `lmr-` followed by eight random alphanumerics.
pub fn generate_job_id() -> Result<JobId, InputError> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    JobId::new(format!("lmr-{suffix}"))
}

/// What [`Driver::submit`] did.
#[derive(Debug, Clone)]
pub struct SubmitReport {
    pub job: JobId,
    pub map_count: u32,
    pub input_objects: u64,
    pub batch_size: usize,
    /// One entry per mapper, ordered by mapper id.
    pub stats: Vec<TaskStats>,
    pub elapsed: Duration,
}

impl SubmitReport {
    pub fn records(&self) -> u64 {
        self.stats.iter().map(|s| s.record_count).sum()
    }

    pub fn map_seconds(&self) -> f64 {
        self.stats.iter().map(|s| s.total_time().as_secs_f64()).sum()
    }
}

/// Job namespace totals once the result exists.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Completion {
    /// Sum of the `processingtime` of the reducer outputs and the result.
    pub reduce_seconds: f64,
    pub reducer_outputs: usize,
    pub job_objects: u64,
    pub job_bytes: u64,
    pub elapsed: Duration,
}

impl Completion {
    pub fn usage(&self, submit: &SubmitReport) -> JobUsage {
        JobUsage {
            map_seconds: submit.map_seconds(),
            reduce_seconds: self.reduce_seconds,
            input_objects: submit.input_objects,
            records: submit.records(),
            job_objects: self.job_objects,
            job_bytes: self.job_bytes,
        }
    }
}

pub struct Driver {
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn Invoker>,
    config: JobConfig,
}

impl Driver {
    pub fn new(store: Arc<dyn ObjectStore>, invoker: Arc<dyn Invoker>, config: JobConfig) -> Self {
        Self {
            store,
            invoker,
            config,
        }
    }

    /// Input objects under `bucket/prefix`, filtered by the configured glob
    /// (matched against the full key).
    pub async fn list_inputs(&self) -> Result<Vec<ObjectInfo>> {
        let matcher = self.config.glob.as_deref().map(compile_glob).transpose()?;
        let objects = self
            .store
            .list(&self.config.bucket, &self.config.prefix)
            .await?;

        let inputs: Vec<ObjectInfo> = objects
            .into_iter()
            .filter(|o| !o.key.ends_with('/'))
            .filter(|o| matcher.as_ref().map_or(true, |m| m.is_match(&o.key)))
            .collect();
        if inputs.is_empty() {
            let pattern = format!(
                "s3://{}/{}{}",
                self.config.bucket,
                self.config.prefix,
                self.config.glob.as_deref().unwrap_or("")
            );
            return Err(InputError::EmptyInput(pattern).into());
        }
        Ok(inputs)
    }

    /// Start the map phase of `job` and wait for every mapper.
    ///
    /// The job record is written before the first invocation. A single
    /// failed mapper fails the call and aborts the mappers still running.
    pub async fn submit(&self, job: &JobId) -> Result<SubmitReport> {
        let start = Instant::now();
        let inputs = self.list_inputs().await?;
        let input_objects = inputs.len() as u64;

        let compressed = inputs.iter().any(|o| is_compressed_key(&o.key));
        let partitioner = Partitioner::new(self.config.memory_budget())?
            .compressed(compressed)
            .with_batch_size(self.config.batch_size)?;
        let batch_size = partitioner.batch_size(&inputs)?;
        let batches = partitioner.partition(inputs)?;
        let map_count = u32::try_from(batches.len()).context("too many mappers")?;

        info!(
            job_id = %job,
            map_count,
            batch_size,
            "Partitioned {input_objects} input objects"
        );

        let job_data = JobData {
            map_count,
            total_s3_files: input_objects,
            start_time: unix_time_secs(),
        };
        let created = self
            .store
            .put_if_absent(
                &self.config.job_bucket,
                &job.key(JobKey::JobData),
                Bytes::from(serde_json::to_vec(&job_data)?),
                Metadata::new(),
            )
            .await?;
        if created == PutOutcome::AlreadyExists {
            bail!("job `{job}` already exists in bucket `{}`", self.config.job_bucket);
        }

        let stats = self.invoke_mappers(job, batches).await?;
        let report = SubmitReport {
            job: job.clone(),
            map_count,
            input_objects,
            batch_size,
            stats,
            elapsed: start.elapsed(),
        };
        info!(
            job_id = %job,
            records = report.records(),
            "all {map_count} mappers finished in {:?}",
            report.elapsed
        );
        Ok(report)
    }

    async fn invoke_mappers(
        &self,
        job: &JobId,
        batches: Vec<Vec<ObjectInfo>>,
    ) -> Result<Vec<TaskStats>> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrent_lambdas.max(1)));
        let timeout = self.config.task_timeout();
        let mut mappers = JoinSet::new();

        for (mapper_id, batch) in (1u32..).zip(batches) {
            let task = MapTask {
                bucket: self.config.bucket.clone(),
                keys: batch.into_iter().map(|o| o.key).collect(),
                job_bucket: self.config.job_bucket.clone(),
                job_id: job.to_string(),
                mapper_id,
            };
            let payload = Bytes::from(serde_json::to_vec(&task)?);
            let invoker = self.invoker.clone();
            let function = self.config.mapper_function.clone();
            let semaphore = semaphore.clone();

            mappers.spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                debug!(mapper_id, "invoking mapper");
                let response = invoker.invoke_sync(&function, payload, timeout).await?;
                let stats: TaskStats = serde_json::from_slice(&response)
                    .with_context(|| format!("mapper {mapper_id} answered with malformed stats"))?;
                anyhow::Ok((mapper_id, stats))
            });
        }

        let mut stats = Vec::with_capacity(mappers.len());
        while let Some(joined) = mappers.join_next().await {
            let outcome = joined
                .map_err(|err| anyhow!("mapper task panicked: {err}"))
                .and_then(|r| r);
            match outcome {
                Ok(done) => stats.push(done),
                Err(err) => {
                    error!(job_id = %job, "map phase failed: {err:#}");
                    mappers.abort_all();
                    return Err(err);
                }
            }
        }

        stats.sort_by_key(|(mapper_id, _)| *mapper_id);
        Ok(stats.into_iter().map(|(_, s)| s).collect())
    }

    /// Poll until `<job>/result` exists, then total the reduce side of the
    /// job from the namespace.
    pub async fn wait_for_completion(
        &self,
        job: &JobId,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Completion> {
        let start = Instant::now();
        let result_key = job.key(JobKey::Result);
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            ticker.tick().await;
            if self
                .store
                .exists(&self.config.job_bucket, &result_key)
                .await?
            {
                break;
            }
            if start.elapsed() >= timeout {
                bail!("job `{job}` produced no result within {timeout:?}");
            }
            debug!(job_id = %job, "check to see if the job is done");
        }

        let objects = self
            .store
            .list(&self.config.job_bucket, &job.namespace())
            .await?;
        let mut completion = Completion {
            job_objects: objects.len() as u64,
            job_bytes: objects.iter().map(|o| o.size).sum(),
            ..Default::default()
        };
        for object in &objects {
            match JobKey::decode(job, &object.key) {
                Some(JobKey::ReduceOutput { .. }) => completion.reducer_outputs += 1,
                Some(JobKey::Result) => {}
                _ => continue,
            }
            completion.reduce_seconds += self.processing_time(object).await?;
        }
        completion.elapsed = start.elapsed();

        info!(job_id = %job, "job done in {:?}", completion.elapsed);
        Ok(completion)
    }

    /// `processingtime` of an object. Listings from S3 carry no metadata, so
    /// the object is fetched when the listing entry lacks it.
    async fn processing_time(&self, object: &ObjectInfo) -> Result<f64> {
        let raw = match object.metadata.get(META_PROCESSING_TIME) {
            Some(raw) => raw.clone(),
            None => {
                let fetched = self.store.get(&self.config.job_bucket, &object.key).await?;
                match fetched.metadata.get(META_PROCESSING_TIME) {
                    Some(raw) => raw.clone(),
                    None => {
                        warn!(key = %object.key, "object has no processing time");
                        return Ok(0.0);
                    }
                }
            }
        };
        raw.parse()
            .with_context(|| format!("bad processing time `{raw}` on {}", object.key))
    }

    pub async fn fetch_result(&self, job: &JobId) -> Result<Bytes> {
        let object = self
            .store
            .get(&self.config.job_bucket, &job.key(JobKey::Result))
            .await?;
        Ok(object.body)
    }

    /// Ids of every job with a job record in the job bucket.
    pub async fn jobs(&self) -> Result<Vec<JobId>> {
        let objects = self.store.list(&self.config.job_bucket, "").await?;
        let mut jobs = vec![];
        for object in objects {
            let Some((id, rest)) = object.key.split_once('/') else {
                continue;
            };
            if rest != "jobdata" {
                continue;
            }
            match JobId::new(id) {
                Ok(job) => jobs.push(job),
                Err(err) => warn!("skipping {}: {err}", object.key),
            }
        }
        Ok(jobs)
    }
}

fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    let glob = Glob::new(pattern)
        .map_err(|err| InputError::InvalidPath(pattern.to_string(), err.to_string()))?;
    Ok(glob.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = generate_job_id().unwrap();
        let b = generate_job_id().unwrap();
        assert!(a.as_str().starts_with("lmr-"));
        assert_eq!(a.as_str().len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn globs_match_full_keys() {
        let matcher = compile_glob("logs/*.csv.gz").unwrap();
        assert!(matcher.is_match("logs/part-0.csv.gz"));
        assert!(!matcher.is_match("logs/part-0.csv"));
        assert!(compile_glob("logs/[").is_err());
    }
}
