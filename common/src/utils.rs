use anyhow::Result;
use bytes::Bytes;
use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `LMR_LOG` first, then `RUST_LOG`, then `info`.
///
/// Log fields: `job_id` on every job-scoped event, `round` on scheduling
/// events, `mapper_id` / `reducer_id` inside tasks.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("LMR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn string_from_bytes(bytes: Bytes) -> Result<String> {
    Ok(String::from_utf8(bytes.into())?)
}
