//! A MapReduce-compatible implementation of word count.

use common::{ParseError, Workload};

#[derive(Debug, Clone, Copy, Default)]
pub struct WordCount;

impl Workload for WordCount {
    type Value = u64;

    fn name(&self) -> &'static str {
        "word-count"
    }

    fn map_record(&self, record: &str) -> Result<Vec<(String, u64)>, ParseError> {
        Ok(record
            .split(|c: char| !c.is_alphabetic())
            .filter(|s| !s.is_empty())
            .map(|word| (word.to_lowercase(), 1))
            .collect())
    }

    fn fold(&self, _key: &str, value: u64, acc: Option<u64>) -> u64 {
        acc.unwrap_or_default() + value
    }
}
