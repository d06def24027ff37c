//! Shared utilities for gateway integration tests: a background server
//! harness and a set of scripted executors standing in for a worker pool.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use workgate::config::GatewayConfig;
use workgate::executor::{Codec, ExecError, Executor, Payload, WorkerState};
use workgate::http::HttpServer;
use workgate::lifecycle::Shutdown;

/// Bind the gateway on an ephemeral port and serve it in the background.
/// Returns the bound address and the shutdown handle keeping it alive.
pub async fn spawn_gateway(
    config: GatewayConfig,
    executor: Arc<dyn Executor>,
) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, executor);

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    // give the acceptor a moment to come up
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}

/// Non-pooled client so each test request opens a fresh connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

fn ok_context(status: u16, content_type: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "status": status,
        "headers": { "Content-Type": [content_type] },
    }))
    .unwrap()
}

/// Mimics an application worker that echoes the upload metadata tree back
/// to the client, verifying the spooled temp files along the way: a
/// successful descriptor whose temp file is missing or has the wrong length
/// gets its error code rewritten to 99.
#[derive(Debug, Default)]
#[allow(dead_code)]
pub struct UploadEchoExecutor;

fn scrub_uploads(node: &mut Value) {
    match node {
        Value::Object(map) => {
            if map.contains_key("mime") && map.contains_key("error") {
                let tmp = map.remove("tmpName");
                let error = map.get("error").and_then(Value::as_u64).unwrap_or(0);
                if error == 0 {
                    let size = map.get("size").and_then(Value::as_u64).unwrap_or(0);
                    let spooled = tmp
                        .as_ref()
                        .and_then(Value::as_str)
                        .and_then(|p| std::fs::metadata(p).ok())
                        .is_some_and(|m| m.len() == size);
                    if !spooled {
                        map.insert("error".into(), 99.into());
                    }
                }
            } else {
                for child in map.values_mut() {
                    scrub_uploads(child);
                }
            }
        }
        Value::Array(items) => {
            for child in items {
                scrub_uploads(child);
            }
        }
        _ => {}
    }
}

#[async_trait]
impl Executor for UploadEchoExecutor {
    async fn exec(&self, payload: &Payload) -> Result<Payload, ExecError> {
        let ctx: Value = serde_json::from_slice(&payload.context)
            .map_err(|e| ExecError::Decode(e.to_string()))?;
        let mut uploads = ctx.get("uploads").cloned().unwrap_or(Value::Null);
        scrub_uploads(&mut uploads);

        let body = serde_json::to_vec(&uploads).map_err(|e| ExecError::Encode(e.to_string()))?;
        Ok(Payload {
            body,
            context: ok_context(200, "application/json"),
            codec: payload.codec,
        })
    }

    async fn exec_stream(
        &self,
        payload: &Payload,
        sink: mpsc::Sender<Payload>,
        _stop: oneshot::Receiver<()>,
    ) -> Result<(), ExecError> {
        let fragment = self.exec(payload).await?;
        sink.send(fragment)
            .await
            .map_err(|_| ExecError::Network("fragment sink closed".to_string()))
    }

    async fn release(&self, _pid: i64) -> Result<(), ExecError> {
        Ok(())
    }

    fn workers(&self) -> Vec<WorkerState> {
        Vec::new()
    }
}

/// Streams a scripted sequence of body fragments, then either finishes
/// cleanly or fails with the configured error. Counts invocations so tests
/// can assert the pool was never reached.
#[allow(dead_code)]
pub struct ScriptedStreamExecutor {
    context: Vec<u8>,
    fragments: Vec<Vec<u8>>,
    fragment_gap: Duration,
    failure: Option<Box<dyn Fn() -> ExecError + Send + Sync>>,
    calls: AtomicU32,
    completions: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedStreamExecutor {
    pub fn new(status: u16, fragments: &[&str]) -> Self {
        Self {
            context: ok_context(status, "text/plain"),
            fragments: fragments.iter().map(|f| f.as_bytes().to_vec()).collect(),
            fragment_gap: Duration::ZERO,
            failure: None,
            calls: AtomicU32::new(0),
            completions: AtomicU32::new(0),
        }
    }

    /// Fail with the given error after all fragments have been sent.
    pub fn failing_with(mut self, f: impl Fn() -> ExecError + Send + Sync + 'static) -> Self {
        self.failure = Some(Box::new(f));
        self
    }

    /// Pause after each fragment so it reaches the client before the next
    /// event fires.
    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.fragment_gap = gap;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Times the whole script was delivered with every send accepted.
    pub fn completions(&self) -> u32 {
        self.completions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedStreamExecutor {
    async fn exec(&self, _payload: &Payload) -> Result<Payload, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fail) = &self.failure {
            return Err(fail());
        }
        Ok(Payload {
            body: self.fragments.concat(),
            context: self.context.clone(),
            codec: Codec::Json,
        })
    }

    async fn exec_stream(
        &self,
        _payload: &Payload,
        sink: mpsc::Sender<Payload>,
        _stop: oneshot::Receiver<()>,
    ) -> Result<(), ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        for (i, body) in self.fragments.iter().enumerate() {
            let context = if i == 0 {
                self.context.clone()
            } else {
                Vec::new()
            };
            let fragment = Payload {
                body: body.clone(),
                context,
                codec: Codec::Json,
            };
            if sink.send(fragment).await.is_err() {
                // fragment channel gone entirely, not even a drain left
                return Ok(());
            }
            if !self.fragment_gap.is_zero() {
                tokio::time::sleep(self.fragment_gap).await;
            }
        }
        self.completions.fetch_add(1, Ordering::SeqCst);

        match &self.failure {
            Some(fail) => Err(fail()),
            None => Ok(()),
        }
    }

    async fn release(&self, _pid: i64) -> Result<(), ExecError> {
        Ok(())
    }

    fn workers(&self) -> Vec<WorkerState> {
        Vec::new()
    }
}
