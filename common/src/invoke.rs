//! The invocation service collaborator.
//!
//! Tasks are addressed by function name and receive a JSON payload.
//! [`LocalInvoker`] runs registered [`TaskHandler`]s on the current tokio
//! runtime; [`HttpInvoker`] talks to a Lambda-compatible invoke endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::error::InvocationError;

#[async_trait]
pub trait Invoker: Send + Sync + 'static {
    /// Run `function` and wait for its response, at most `timeout`.
    async fn invoke_sync(
        &self,
        function: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, InvocationError>;

    /// Start `function` without waiting for it. Success only means the
    /// invocation was accepted.
    async fn invoke_async(&self, function: &str, payload: Bytes) -> Result<(), InvocationError>;
}

/// Body of a deployed function.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Bytes) -> anyhow::Result<Bytes>;
}

/// Runs handlers in-process, each invocation on its own tokio task.
///
/// Fire-and-forget invocations are bounded by `async_timeout`, the
/// equivalent of a deployed function's configured timeout.
#[derive(Clone)]
pub struct LocalInvoker {
    handlers: Arc<DashMap<String, Arc<dyn TaskHandler>>>,
    tracker: TaskTracker,
    async_timeout: Duration,
}

impl LocalInvoker {
    pub fn new(async_timeout: Duration) -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
            tracker: TaskTracker::new(),
            async_timeout,
        }
    }

    /// Deploy `handler` under `function`, replacing any previous deployment.
    pub fn register(&self, function: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(function.into(), handler);
    }

    fn handler(&self, function: &str) -> Result<Arc<dyn TaskHandler>, InvocationError> {
        self.handlers
            .get(function)
            .map(|h| h.value().clone())
            .ok_or_else(|| InvocationError::UnknownFunction(function.to_string()))
    }

    /// Wait until every invocation started so far (and any they started in
    /// turn) has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Invocations still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

#[async_trait]
impl Invoker for LocalInvoker {
    async fn invoke_sync(
        &self,
        function: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, InvocationError> {
        let handler = self.handler(function)?;
        let task = self
            .tracker
            .spawn(async move { handler.handle(payload).await });
        let abort = task.abort_handle();

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(err))) => Err(InvocationError::failed(function, format!("{err:#}"))),
            Ok(Err(join_err)) => Err(InvocationError::failed(function, join_err)),
            Err(_) => {
                abort.abort();
                Err(InvocationError::Timeout {
                    function: function.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn invoke_async(&self, function: &str, payload: Bytes) -> Result<(), InvocationError> {
        let handler = self.handler(function)?;
        let function = function.to_string();
        let timeout = self.async_timeout;

        self.tracker.spawn(async move {
            match tokio::time::timeout(timeout, handler.handle(payload)).await {
                Ok(Ok(_)) => debug!(function, "async invocation finished"),
                Ok(Err(err)) => error!(function, "async invocation failed: {err:#}"),
                Err(_) => error!(function, ?timeout, "async invocation timed out"),
            }
        });
        Ok(())
    }
}

const INVOCATION_TYPE_HEADER: &str = "X-Amz-Invocation-Type";
const FUNCTION_ERROR_HEADER: &str = "X-Amz-Function-Error";

/// Invokes functions through the Lambda `Invoke` REST shape:
/// `POST {endpoint}/2015-03-31/functions/{name}/invocations`.
///
/// Requests are unsigned, which suits local emulators and gateways that
/// authenticate on their own.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpInvoker {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, function: &str) -> String {
        format!(
            "{}/2015-03-31/functions/{}/invocations",
            self.endpoint, function
        )
    }

    fn map_err(function: &str, err: reqwest::Error, timeout: Option<Duration>) -> InvocationError {
        match timeout {
            Some(timeout) if err.is_timeout() => InvocationError::Timeout {
                function: function.to_string(),
                timeout,
            },
            _ => InvocationError::failed(function, err),
        }
    }
}

#[async_trait]
impl Invoker for HttpInvoker {
    async fn invoke_sync(
        &self,
        function: &str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, InvocationError> {
        let response = self
            .client
            .post(self.url(function))
            .header(INVOCATION_TYPE_HEADER, "RequestResponse")
            .timeout(timeout)
            .body(payload)
            .send()
            .await
            .map_err(|e| Self::map_err(function, e, Some(timeout)))?;

        let status = response.status();
        let function_error = response
            .headers()
            .get(FUNCTION_ERROR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| Self::map_err(function, e, Some(timeout)))?;

        if !status.is_success() {
            return Err(InvocationError::failed(function, format!("HTTP {status}")));
        }
        if let Some(kind) = function_error {
            let detail = String::from_utf8_lossy(&body);
            return Err(InvocationError::failed(function, format!("{kind}: {detail}")));
        }
        Ok(body)
    }

    async fn invoke_async(&self, function: &str, payload: Bytes) -> Result<(), InvocationError> {
        let response = self
            .client
            .post(self.url(function))
            .header(INVOCATION_TYPE_HEADER, "Event")
            .body(payload)
            .send()
            .await
            .map_err(|e| Self::map_err(function, e, None))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InvocationError::failed(function, format!("HTTP {status}")));
        }
        Ok(())
    }
}
