//! Memory-budget-driven sizing of task fan-out.
//!
//! The partitioner is a heuristic: it looks at the average object size only,
//! so one oversized object can still unbalance a task.

use crate::error::InputError;
use crate::store::ObjectInfo;

/// Share of the task memory kept for data when inputs are plain.
pub const DATA_FRACTION: f64 = 0.6;
/// Share of the task memory kept for data when inputs are gzipped;
/// decompression needs the rest.
pub const COMPRESSED_DATA_FRACTION: f64 = 0.4;
/// Smallest reduce batch; anything lower would not shrink a round.
pub const CONVERGING_MIN_BATCH: usize = 2;

/// How a set of objects is cut into task batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partitioner {
    memory_budget: u64,
    compressed: bool,
    converging: bool,
    fixed_batch_size: Option<usize>,
}

impl Partitioner {
    /// Partitioner for a task with `memory_budget` bytes of memory.
    pub fn new(memory_budget: u64) -> Result<Self, InputError> {
        if memory_budget == 0 {
            return Err(InputError::ZeroBudget);
        }
        Ok(Self {
            memory_budget,
            compressed: false,
            converging: false,
            fixed_batch_size: None,
        })
    }

    /// Inputs are compressed; reserve less memory for data.
    pub fn compressed(mut self, compressed: bool) -> Self {
        self.compressed = compressed;
        self
    }

    /// Batches feed a reduce round, which must end with fewer tasks than it
    /// started with: the batch size never drops below two.
    pub fn converging(mut self, converging: bool) -> Self {
        self.converging = converging;
        self
    }

    /// Skip the size heuristic and use `batch_size` (still subject to the
    /// converging floor).
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Result<Self, InputError> {
        if batch_size == Some(0) {
            return Err(InputError::ZeroBatchSize);
        }
        self.fixed_batch_size = batch_size;
        Ok(self)
    }

    pub fn data_fraction(&self) -> f64 {
        if self.compressed {
            COMPRESSED_DATA_FRACTION
        } else {
            DATA_FRACTION
        }
    }

    /// Number of objects per batch for `objects`.
    pub fn batch_size(&self, objects: &[ObjectInfo]) -> Result<usize, InputError> {
        if objects.is_empty() {
            return Err(InputError::EmptyInput("<partitioner>".to_string()));
        }

        let computed = match self.fixed_batch_size {
            Some(size) => size,
            None => {
                let total: u64 = objects.iter().map(|o| o.size).sum();
                let avg_object_size = total as f64 / objects.len() as f64;
                if avg_object_size <= 0.0 {
                    objects.len()
                } else {
                    let size = (self.memory_budget as f64 * self.data_fraction()
                        / avg_object_size)
                        .round();
                    // Saturating float-to-int conversion.
                    size.min(usize::MAX as f64) as usize
                }
            }
        };

        let floor = if self.converging {
            CONVERGING_MIN_BATCH
        } else {
            1
        };
        Ok(computed.max(floor))
    }

    /// Cut `objects` into contiguous batches.
    pub fn partition(&self, objects: Vec<ObjectInfo>) -> Result<Vec<Vec<ObjectInfo>>, InputError> {
        let batch_size = self.batch_size(&objects)?;
        Ok(create_batches(objects, batch_size))
    }
}

/// Group `items` into contiguous batches of `batch_size`, the short remainder
/// forming the last batch.
pub fn create_batches<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut batch = Vec::with_capacity(batch_size.min(items.len()));

    for item in items {
        batch.push(item);
        if batch.len() >= batch_size {
            batches.push(std::mem::take(&mut batch));
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }

    batches
}

/// Whether a key names a gzip-encoded object.
pub fn is_compressed_key(key: &str) -> bool {
    key.ends_with(".gz")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objects(sizes: &[u64]) -> Vec<ObjectInfo> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, size)| ObjectInfo::new(format!("in/{i}"), *size))
            .collect()
    }

    const MB: u64 = 1000 * 1000;

    #[test]
    fn batch_size_follows_the_memory_budget() {
        // 1536MB * 0.6 / 100MB = 9.216
        let p = Partitioner::new(1536 * MB).unwrap();
        assert_eq!(p.batch_size(&objects(&[100 * MB; 20])).unwrap(), 9);

        // 1536MB * 0.4 / 100MB = 6.144
        let p = p.compressed(true);
        assert_eq!(p.batch_size(&objects(&[100 * MB; 20])).unwrap(), 6);
    }

    #[test]
    fn oversized_objects_get_one_per_map_batch() {
        let p = Partitioner::new(100 * MB).unwrap();
        assert_eq!(p.batch_size(&objects(&[500 * MB, 700 * MB])).unwrap(), 1);
    }

    #[test]
    fn converging_batches_never_drop_below_two() {
        let p = Partitioner::new(100 * MB).unwrap().converging(true);
        assert_eq!(p.batch_size(&objects(&[500 * MB, 700 * MB])).unwrap(), 2);

        let p = p.with_batch_size(Some(1)).unwrap();
        assert_eq!(p.batch_size(&objects(&[1, 1, 1])).unwrap(), 2);
    }

    #[test]
    fn empty_objects_form_a_single_batch() {
        let p = Partitioner::new(MB).unwrap();
        let batches = p.partition(objects(&[0, 0, 0])).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[test]
    fn rejects_empty_input_and_zero_parameters() {
        assert!(Partitioner::new(0).is_err());
        let p = Partitioner::new(MB).unwrap();
        assert!(p.batch_size(&[]).is_err());
        assert!(p.with_batch_size(Some(0)).is_err());
    }

    #[test]
    fn five_objects_in_batches_of_two() {
        let sizes: Vec<usize> = create_batches((0..5).collect(), 2)
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn batches_cover_every_item_in_order() {
        for count in 1..40usize {
            for batch_size in 1..12usize {
                let items: Vec<usize> = (0..count).collect();
                let batches = create_batches(items.clone(), batch_size);

                let flattened: Vec<usize> = batches.iter().flatten().copied().collect();
                assert_eq!(flattened, items);

                let (last, rest) = batches.split_last().unwrap();
                assert!(rest.iter().all(|b| b.len() == batch_size));
                assert!(!last.is_empty() && last.len() <= batch_size);
            }
        }
    }

    #[test]
    fn converging_rounds_strictly_shrink() {
        let p = Partitioner::new(MB).unwrap().converging(true);
        for n in 2..200u64 {
            // Outputs far larger than the budget push the heuristic to its floor.
            let inputs = objects(&vec![10 * MB; n as usize]);
            let fan_out = p.partition(inputs).unwrap().len() as u64;
            assert!(fan_out < n, "fan-out {fan_out} did not shrink from {n}");
        }
    }

    #[test]
    fn detects_gzip_keys() {
        assert!(is_compressed_key("logs/part-0001.gz"));
        assert!(!is_compressed_key("logs/part-0001.gz.txt"));
    }
}
