//! Worker executor boundary.
//!
//! # Data Flow
//! ```text
//! handler builds Payload (body + context + codec tag)
//!     → Executor::exec / exec_stream (shared worker pool, external)
//!     → response fragments come back as Payloads
//!     → first fragment carries status+headers, the rest are body-only
//! ```
//!
//! # Design Decisions
//! - The pool itself (spawn, supervise, scale) lives outside this crate;
//!   everything behind this trait is opaque to the gateway
//! - Streaming delivers fragments on an mpsc channel and reports failure
//!   out-of-band: exactly one terminal error or a channel close, never both
//! - Worker state is a read-only snapshot consumed by the metrics exporter

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

/// Wire codec tag telling the worker side how to decode the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Json,
    Proto,
}

/// Execution mode advertised by the executor; selected by the wire protocol
/// in use, never by request content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Unary,
    Stream,
}

/// The unit exchanged with the worker pool.
///
/// Body and context buffers are pooled by the handler and cleared (capacity
/// kept) on release.
#[derive(Debug, Default)]
pub struct Payload {
    pub body: Vec<u8>,
    pub context: Vec<u8>,
    pub codec: Codec,
}

/// Lifecycle status of a single worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Ready,
    Working,
    Invalid,
    Killing,
    Destroyed,
    Errored,
    Inactive,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Ready => "ready",
            WorkerStatus::Working => "working",
            WorkerStatus::Invalid => "invalid",
            WorkerStatus::Killing => "killing",
            WorkerStatus::Destroyed => "destroyed",
            WorkerStatus::Errored => "errored",
            WorkerStatus::Inactive => "inactive",
        }
    }
}

/// Read-only snapshot of one worker, supplied by the external pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerState {
    pub pid: i64,
    pub status: WorkerStatus,
    pub memory_usage: u64,
}

/// Failure taxonomy reported by the executor. Detail never reaches clients;
/// the classifier in `handler::error` maps each variant to an HTTP outcome.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("no free workers")]
    NoFreeWorkers,
    #[error("worker allocation failed: {0}")]
    Allocate(String),
    #[error("soft job error: {0}")]
    SoftJob(String),
    #[error("execution deadline exceeded")]
    ExecTtl,
    #[error("idle deadline exceeded")]
    IdleTtl,
    #[error("worker lifetime exceeded")]
    Ttl,
    #[error("payload encode failed: {0}")]
    Encode(String),
    #[error("payload decode failed: {0}")]
    Decode(String),
    #[error("worker transport failure: {0}")]
    Network(String),
    #[error("pool watcher stopped")]
    WatcherStopped,
}

/// The shared worker pool, the only serialization point for worker
/// assignment. Allocation and execution waits happen entirely behind this
/// trait; the gateway never holds a lock across them.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Single request/response exchange.
    async fn exec(&self, payload: &Payload) -> Result<Payload, ExecError>;

    /// Streaming exchange: zero or more fragments are sent into `sink`,
    /// followed by channel closure on success. On failure the error is the
    /// sole output; nothing further arrives on `sink`.
    async fn exec_stream(
        &self,
        payload: &Payload,
        sink: mpsc::Sender<Payload>,
        stop: oneshot::Receiver<()>,
    ) -> Result<(), ExecError>;

    /// Force-release the worker with the given pid. Does not interrupt
    /// requests already assigned to it.
    async fn release(&self, pid: i64) -> Result<(), ExecError>;

    /// Snapshot of worker state for the metrics exporter. Must not block;
    /// an unqueryable pool yields an empty snapshot.
    fn workers(&self) -> Vec<WorkerState>;

    fn mode(&self) -> ExecMode {
        ExecMode::Stream
    }
}

/// Debug-mode executor: echoes the request context back as the response
/// body. Stands in for a real pool when `debug` is set in the config.
#[derive(Debug, Default)]
pub struct EchoExecutor;

impl EchoExecutor {
    fn echo(&self, payload: &Payload) -> Payload {
        let context = serde_json::json!({
            "status": 200,
            "headers": { "Content-Type": ["application/json"] },
        });
        Payload {
            body: payload.context.clone(),
            context: serde_json::to_vec(&context).unwrap_or_default(),
            codec: payload.codec,
        }
    }
}

#[async_trait]
impl Executor for EchoExecutor {
    async fn exec(&self, payload: &Payload) -> Result<Payload, ExecError> {
        Ok(self.echo(payload))
    }

    async fn exec_stream(
        &self,
        payload: &Payload,
        sink: mpsc::Sender<Payload>,
        _stop: oneshot::Receiver<()>,
    ) -> Result<(), ExecError> {
        sink.send(self.echo(payload))
            .await
            .map_err(|_| ExecError::Network("fragment sink closed".to_string()))
    }

    async fn release(&self, pid: i64) -> Result<(), ExecError> {
        Err(ExecError::Allocate(format!(
            "debug executor has no worker with pid {pid}"
        )))
    }

    fn workers(&self) -> Vec<WorkerState> {
        Vec::new()
    }
}
