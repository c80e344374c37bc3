//! The accumulate-and-emit shape shared by map and reduce tasks.
//!
//! Every source object is fetched, transparently gunzipped when its key ends
//! in `.gz`, split into lines and parsed under the stage's schema. Parsed
//! pairs are folded as they are read into a per-source map holding one
//! entry per distinct key; merging that map into the task's accumulator is
//! the only step that holds the accumulator lock.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use flate2::read::GzDecoder;
use sysinfo::{Pid, System};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use common::codec;
use common::partitioner::is_compressed_key;
use common::store::{Metadata, META_LINE_COUNT, META_MEMORY_USAGE, META_PROCESSING_TIME};
use common::{ObjectStore, ParseError, TaskStats, Workload};

/// Source objects fetched and parsed at the same time by one task.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Schema the lines of a source object are read under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Raw input records, parsed by [`Workload::map_record`].
    Map,
    /// `key,value` lines written by an earlier task.
    Reduce,
}

/// What a pipeline run produced, ready to be persisted.
#[derive(Debug)]
pub struct Accumulated<V> {
    pub values: HashMap<String, V>,
    pub stats: TaskStats,
    pub skipped_records: u64,
    /// Resident set size high-water mark in bytes, 0 when unavailable.
    pub memory_high_water: u64,
}

impl<V: codec::DecimalValue> Accumulated<V> {
    /// Accumulator body, rows ordered by key.
    pub fn encode(&self) -> Bytes {
        let mut rows: Vec<(&String, &V)> = self.values.iter().collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        codec::encode(rows)
    }

    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            META_LINE_COUNT.to_string(),
            self.stats.record_count.to_string(),
        );
        metadata.insert(
            META_PROCESSING_TIME.to_string(),
            self.stats.total_time().as_secs_f64().to_string(),
        );
        metadata.insert(
            META_MEMORY_USAGE.to_string(),
            self.memory_high_water.to_string(),
        );
        metadata
    }
}

pub struct Pipeline<W> {
    store: Arc<dyn ObjectStore>,
    workload: Arc<W>,
    concurrency: usize,
}

impl<W> Clone for Pipeline<W> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            workload: self.workload.clone(),
            concurrency: self.concurrency,
        }
    }
}

impl<W: Workload> Pipeline<W> {
    pub fn new(store: Arc<dyn ObjectStore>, workload: W) -> Self {
        Self {
            store,
            workload: Arc::new(workload),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    /// Fold every record of `keys` (in `bucket`) into one accumulator.
    ///
    /// Fails as a whole if any source object cannot be read or decompressed;
    /// malformed records are skipped and not counted.
    pub async fn run(
        &self,
        stage: Stage,
        bucket: &str,
        keys: &[String],
    ) -> Result<Accumulated<W::Value>> {
        let start = Instant::now();
        let accumulator = Arc::new(Mutex::new(HashMap::new()));
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let sampler = Arc::new(MemorySampler::new());
        let mut sources = JoinSet::new();

        for key in keys {
            let permit = semaphore.clone().acquire_owned().await?;
            let source = Source {
                store: self.store.clone(),
                workload: self.workload.clone(),
                stage,
                bucket: bucket.to_string(),
                key: key.clone(),
            };
            let accumulator = accumulator.clone();
            let sampler = sampler.clone();
            sources.spawn(async move {
                let _permit = permit;
                let outcome = source.fold_into(&accumulator).await;
                sampler.sample();
                outcome
            });
        }

        let mut totals = SourceTotals::default();
        while let Some(joined) = sources.join_next().await {
            match joined {
                Ok(Ok(source)) => totals.add(&source),
                Ok(Err(err)) => {
                    sources.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    sources.abort_all();
                    return Err(err).context("source task panicked");
                }
            }
        }

        if totals.skipped > 0 {
            warn!(
                skipped = totals.skipped,
                records = totals.records,
                "skipped malformed records"
            );
        }

        let values = std::mem::take(&mut *accumulator.lock().await);
        let stats = TaskStats {
            input_object_count: keys.len() as u64,
            record_count: totals.records,
            total_time_nanos: nanos(start.elapsed()),
            download_time_nanos: nanos(totals.download),
            fold_time_nanos: nanos(totals.fold),
        };

        Ok(Accumulated {
            values,
            stats,
            skipped_records: totals.skipped,
            memory_high_water: sampler.high_water(),
        })
    }
}

pub(crate) fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default)]
struct SourceTotals {
    records: u64,
    skipped: u64,
    download: Duration,
    fold: Duration,
}

impl SourceTotals {
    fn add(&mut self, source: &SourceTotals) {
        self.records += source.records;
        self.skipped += source.skipped;
        self.download += source.download;
        self.fold += source.fold;
    }
}

struct Source<W> {
    store: Arc<dyn ObjectStore>,
    workload: Arc<W>,
    stage: Stage,
    bucket: String,
    key: String,
}

struct Parsed<V> {
    values: HashMap<String, V>,
    records: u64,
    skipped: u64,
}

fn fold_pair<W: Workload>(
    workload: &W,
    values: &mut HashMap<String, W::Value>,
    key: String,
    value: W::Value,
) {
    match values.get_mut(&key) {
        Some(slot) => *slot = workload.fold(&key, value, Some(*slot)),
        None => {
            let first = workload.fold(&key, value, None);
            values.insert(key, first);
        }
    }
}

impl<W: Workload> Source<W> {
    async fn fold_into(
        self,
        accumulator: &Mutex<HashMap<String, W::Value>>,
    ) -> Result<SourceTotals> {
        let started = Instant::now();
        let object = self
            .store
            .get(&self.bucket, &self.key)
            .await
            .with_context(|| format!("reading s3://{}/{}", self.bucket, self.key))?;
        let download = started.elapsed();
        debug!(key = %self.key, bytes = object.body.len(), "fetched source");

        let workload = self.workload.clone();
        let stage = self.stage;
        let key = self.key.clone();
        let parsed = tokio::task::spawn_blocking(move || {
            parse_body(&*workload, stage, &key, &object.body)
        })
        .await??;

        let folding = Instant::now();
        {
            let mut accumulator = accumulator.lock().await;
            for (key, value) in parsed.values {
                fold_pair(&*self.workload, &mut accumulator, key, value);
            }
        }

        Ok(SourceTotals {
            records: parsed.records,
            skipped: parsed.skipped,
            download,
            fold: folding.elapsed(),
        })
    }
}

fn parse_body<W: Workload>(
    workload: &W,
    stage: Stage,
    key: &str,
    body: &[u8],
) -> Result<Parsed<W::Value>> {
    let raw: Box<dyn Read + '_> = if is_compressed_key(key) {
        Box::new(GzDecoder::new(body))
    } else {
        Box::new(body)
    };
    let mut reader = BufReader::new(raw);

    let mut parsed = Parsed {
        values: HashMap::new(),
        records: 0,
        skipped: 0,
    };
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .with_context(|| format!("decoding {key}"))?;
        if read == 0 {
            break;
        }

        let text = match std::str::from_utf8(&line) {
            Ok(text) => text.trim_end_matches(|c| c == '\n' || c == '\r'),
            Err(err) => {
                debug!(key, %err, "skipping non utf-8 record");
                parsed.skipped += 1;
                continue;
            }
        };
        if text.is_empty() {
            continue;
        }

        match parse_record(workload, stage, text) {
            Ok(pairs) => {
                parsed.records += 1;
                for (key, value) in pairs {
                    fold_pair(workload, &mut parsed.values, key, value);
                }
            }
            Err(err) => {
                debug!(key, %err, "skipping malformed record");
                parsed.skipped += 1;
            }
        }
    }
    Ok(parsed)
}

fn parse_record<W: Workload>(
    workload: &W,
    stage: Stage,
    text: &str,
) -> Result<Vec<(String, W::Value)>, ParseError> {
    match stage {
        Stage::Map => workload.map_record(text),
        Stage::Reduce => codec::decode_record(text).map(|pair| vec![pair]),
    }
}

/// Samples this process' resident set size.
struct MemorySampler {
    system: std::sync::Mutex<System>,
    pid: Option<Pid>,
    high_water: AtomicU64,
}

impl MemorySampler {
    fn new() -> Self {
        let sampler = Self {
            system: std::sync::Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            high_water: AtomicU64::new(0),
        };
        sampler.sample();
        sampler
    }

    fn sample(&self) {
        let Some(pid) = self.pid else {
            return;
        };
        let Ok(mut system) = self.system.lock() else {
            return;
        };
        if system.refresh_process(pid) {
            if let Some(process) = system.process(pid) {
                self.high_water.fetch_max(process.memory(), Ordering::Relaxed);
            }
        }
    }

    fn high_water(&self) -> u64 {
        self.high_water.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use common::MemoryStore;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use workload::{AdRevenue, WordCount};

    use super::*;

    fn gzip(text: &str) -> Bytes {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        Bytes::from(encoder.finish().unwrap())
    }

    async fn seeded(objects: &[(&str, Bytes)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (key, body) in objects {
            store
                .put("input", key, body.clone(), Metadata::new())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn map_folds_plain_and_compressed_sources() {
        let store = seeded(&[
            ("a.csv", Bytes::from("10.0.0.1,u,d,1.5\n10.0.0.2,u,d,2.0\n")),
            ("b.csv.gz", gzip("10.0.0.1,u,d,0.5\r\n")),
        ])
        .await;
        let pipeline = Pipeline::new(store, AdRevenue).with_concurrency(2);

        let keys = vec!["a.csv".to_string(), "b.csv.gz".to_string()];
        let out = pipeline.run(Stage::Map, "input", &keys).await.unwrap();

        assert_eq!(out.stats.input_object_count, 2);
        assert_eq!(out.stats.record_count, 3);
        assert_eq!(out.values.len(), 2);
        assert!((out.values["10.0.0.1"] - 2.0).abs() < 1e-9);
        assert!((out.values["10.0.0.2"] - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped_and_not_counted() {
        let store = seeded(&[(
            "part",
            Bytes::from("the,2\nnot a record\ncat,x\ncat,3\n\nthe,1\n"),
        )])
        .await;
        let pipeline = Pipeline::new(store, WordCount);

        let out = pipeline
            .run(Stage::Reduce, "input", &["part".to_string()])
            .await
            .unwrap();

        assert_eq!(out.stats.record_count, 3);
        assert_eq!(out.skipped_records, 2);
        assert_eq!(out.values["the"], 3);
        assert_eq!(out.values["cat"], 3);
    }

    #[tokio::test]
    async fn a_missing_source_fails_the_whole_run() {
        let store = seeded(&[("present", Bytes::from("the,1\n"))]).await;
        let pipeline = Pipeline::new(store, WordCount);

        let keys = vec!["present".to_string(), "absent".to_string()];
        let err = pipeline.run(Stage::Reduce, "input", &keys).await.unwrap_err();
        assert!(format!("{err:#}").contains("absent"));
    }

    #[tokio::test]
    async fn corrupt_gzip_fails_the_whole_run() {
        let store = seeded(&[("broken.gz", Bytes::from_static(b"definitely not gzip"))]).await;
        let pipeline = Pipeline::new(store, WordCount);

        let result = pipeline
            .run(Stage::Map, "input", &["broken.gz".to_string()])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn encoded_output_is_sorted_and_carries_metadata() {
        let store = seeded(&[("text", Bytes::from("b a b\n"))]).await;
        let pipeline = Pipeline::new(store, WordCount);

        let out = pipeline
            .run(Stage::Map, "input", &["text".to_string()])
            .await
            .unwrap();

        assert_eq!(&out.encode()[..], b"a,1\nb,2\n");
        let metadata = out.metadata();
        assert_eq!(metadata[META_LINE_COUNT], "1");
        assert!(metadata.contains_key(META_PROCESSING_TIME));
        assert!(metadata.contains_key(META_MEMORY_USAGE));
    }

    #[test]
    fn a_source_is_folded_while_it_is_parsed() {
        let body = "the cat the
".repeat(10_000);

        let parsed = parse_body(&WordCount, Stage::Map, "text", body.as_bytes()).unwrap();

        assert_eq!(parsed.records, 10_000);
        assert_eq!(parsed.values.len(), 2);
        assert_eq!(parsed.values["the"], 20_000);
        assert_eq!(parsed.values["cat"], 10_000);
    }

    #[tokio::test]
    async fn per_source_maps_merge_into_one_accumulator() {
        let store = seeded(&[
            ("one", Bytes::from("the,2
cat,1
")),
            ("two", Bytes::from("the,5
")),
            ("three", Bytes::from("dog,4
the,1
")),
        ])
        .await;
        let pipeline = Pipeline::new(store, WordCount).with_concurrency(3);

        let keys = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let out = pipeline.run(Stage::Reduce, "input", &keys).await.unwrap();

        assert_eq!(out.values.len(), 3);
        assert_eq!(out.values["the"], 8);
        assert_eq!(out.values["cat"], 1);
        assert_eq!(out.values["dog"], 4);
    }

    #[test]
    fn durations_beyond_u64_nanos_saturate() {
        assert_eq!(nanos(Duration::from_millis(3)), 3_000_000);
        assert_eq!(nanos(Duration::MAX), u64::MAX);
    }
}
