//! Cost estimate of a finished job.
//!
//! Approximate: task time is what the tasks report about themselves, not
//! billed duration.

use std::fmt;

use serde::Serialize;

/// Compute price per GB-second of task memory.
pub const LAMBDA_GB_SECOND: f64 = 0.00001667;
pub const S3_GET_PER_REQUEST: f64 = 0.004 / 10_000.0;
pub const S3_PUT_PER_REQUEST: f64 = 0.005 / 1_000.0;
/// Storage price per GB for one hour.
pub const S3_GB_HOUR: f64 = 0.0000521574022522109;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// What a job consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUsage {
    pub map_seconds: f64,
    pub reduce_seconds: f64,
    /// Input objects read by map tasks.
    pub input_objects: u64,
    pub records: u64,
    /// Objects in the job namespace once the result exists.
    pub job_objects: u64,
    pub job_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostReport {
    pub lambda_seconds: f64,
    pub lambda_cost: f64,
    pub reducer_cost: f64,
    pub storage_cost: f64,
    pub request_cost: f64,
    pub total_cost: f64,
    pub records: u64,
}

impl CostReport {
    /// `memory_mb` is the memory of every task.
    pub fn estimate(usage: &JobUsage, memory_mb: u64) -> Self {
        let memory_gb = memory_mb as f64 / 1024.0;
        let lambda_seconds = usage.map_seconds + usage.reduce_seconds;
        let lambda_cost = lambda_seconds * LAMBDA_GB_SECOND * memory_gb;
        let reducer_cost = usage.reduce_seconds * LAMBDA_GB_SECOND * memory_gb;

        let gets = usage.input_objects + usage.job_objects;
        let puts = usage.job_objects;
        let request_cost = gets as f64 * S3_GET_PER_REQUEST + puts as f64 * S3_PUT_PER_REQUEST;
        let storage_cost = S3_GB_HOUR * (usage.job_bytes as f64 / GIB);

        Self {
            lambda_seconds,
            lambda_cost,
            reducer_cost,
            storage_cost,
            request_cost,
            total_cost: lambda_cost + storage_cost + request_cost,
            records: usage.records,
        }
    }
}

impl fmt::Display for CostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Lambda seconds:  {:.3}", self.lambda_seconds)?;
        writeln!(f, "Reducer cost:    ${:.8}", self.reducer_cost)?;
        writeln!(f, "Lambda cost:     ${:.8}", self.lambda_cost)?;
        writeln!(f, "S3 storage cost: ${:.8}", self.storage_cost)?;
        writeln!(f, "S3 request cost: ${:.8}", self.request_cost)?;
        writeln!(f, "Total cost:      ${:.8}", self.total_cost)?;
        write!(f, "Total records:   {}", self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_compute_requests_and_storage() {
        let usage = JobUsage {
            map_seconds: 90.0,
            reduce_seconds: 10.0,
            input_objects: 10_000,
            records: 42,
            job_objects: 1_000,
            job_bytes: 1024 * 1024 * 1024,
        };
        let report = CostReport::estimate(&usage, 1024);

        assert!((report.lambda_seconds - 100.0).abs() < 1e-9);
        assert!((report.lambda_cost - 100.0 * LAMBDA_GB_SECOND).abs() < 1e-12);
        assert!((report.reducer_cost - 10.0 * LAMBDA_GB_SECOND).abs() < 1e-12);
        assert!((report.request_cost - (11_000.0 * 0.004 / 10_000.0 + 0.005)).abs() < 1e-12);
        assert!((report.storage_cost - S3_GB_HOUR).abs() < 1e-15);
        assert!(
            (report.total_cost - (report.lambda_cost + report.request_cost + report.storage_cost))
                .abs()
                < 1e-12
        );
        assert_eq!(report.records, 42);
    }

    #[test]
    fn an_idle_job_costs_nothing() {
        let report = CostReport::estimate(&JobUsage::default(), 1536);
        assert_eq!(report.total_cost, 0.0);
    }
}
