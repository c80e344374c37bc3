//! Bucket notification wiring for in-process runs.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use common::{Invoker, ObjectCreated};

use crate::event::{task_job, S3Event};

/// Turn every object created under `<job>/task` in `bucket` into an
/// asynchronous invocation of `function` with an S3 notification payload,
/// until the feed closes.
pub fn forward_notifications(
    mut feed: broadcast::Receiver<ObjectCreated>,
    invoker: Arc<dyn Invoker>,
    function: impl Into<String>,
    bucket: impl Into<String>,
) -> JoinHandle<()> {
    let function = function.into();
    let bucket = bucket.into();

    tokio::spawn(async move {
        loop {
            let created = match feed.recv().await {
                Ok(created) => created,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "notification feed lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if created.bucket != bucket || task_job(&created.key).is_none() {
                continue;
            }

            debug!(key = %created.key, "notifying {function}");
            let payload = match serde_json::to_vec(&S3Event::from_created(&created)) {
                Ok(payload) => Bytes::from(payload),
                Err(err) => {
                    error!("failed to encode notification: {err}");
                    continue;
                }
            };
            if let Err(err) = invoker.invoke_async(&function, payload).await {
                error!(key = %created.key, "failed to notify {function}: {err}");
            }
        }
    })
}
