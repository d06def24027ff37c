//! Request/response bridging pipeline.
//!
//! # Data Flow
//! ```text
//! axum handler (http::server)
//!     → size precheck (Content-Length vs configured ceiling)
//!     → request.rs   (descriptor from a pool, sanitation, uploads)
//!     → payload build (wire context + body, pooled)
//!     → executor (unary or streaming, mode picked by the wire protocol)
//!     → response.rs  (first fragment applies status/headers, rest stream)
//!     → access log
//! ```
//!
//! # Design Decisions
//! - One background task per request drives the executor; the foreground
//!   task is the sole reader of the fragment and error channels
//! - An error preempts buffered fragments, then the channel is drained in
//!   the background so the worker stays consumable
//! - Pooled objects travel as RAII guards; release is exactly-once on every
//!   exit path by construction

pub mod error;
pub mod pool;
pub mod request;
pub mod response;
pub mod uploads;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::Response;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::config::GatewayConfig;
use crate::executor::{Codec, ExecMode, Executor, Payload};
use crate::observability::metrics;

use pool::{ObjectPool, Pooled};
use request::RequestDescriptor;
use response::{drain_fragments, FragmentStream, ResponseDescriptor};
use uploads::UploadPolicy;

const MB: u64 = 1024 * 1024;

/// How reading the request body failed.
enum BodyError {
    /// Client hung up while sending; log-only, nothing to write back.
    BrokenPipe(axum::Error),
    /// Body grew past the configured ceiling (chunked uploads bypass the
    /// Content-Length precheck).
    Oversized,
    /// Malformed framing; surfaces as a terse 500.
    Malformed(String),
}

/// Bridges inbound HTTP requests to the worker executor.
pub struct Handler {
    max_request_size: u64,
    internal_code: u16,
    access_logs: bool,
    parse_body: bool,
    policy: UploadPolicy,
    trusted_proxies: Vec<IpAddr>,
    executor: Arc<dyn Executor>,
    req_pool: Arc<ObjectPool<RequestDescriptor>>,
    pld_pool: Arc<ObjectPool<Payload>>,
}

impl Handler {
    pub fn new(config: &GatewayConfig, executor: Arc<dyn Executor>) -> Self {
        let trusted_proxies = config
            .trusted_proxies
            .iter()
            .filter_map(|ip| match ip.parse() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!(ip = %ip, "ignoring unparseable trusted proxy address");
                    None
                }
            })
            .collect();

        Self {
            max_request_size: config.max_request_size * MB,
            internal_code: config.internal_error_code,
            access_logs: config.access_logs,
            parse_body: config.parse_body,
            policy: UploadPolicy::new(
                &config.uploads.dir,
                &config.uploads.allowed,
                &config.uploads.forbidden,
            ),
            trusted_proxies,
            executor,
            req_pool: ObjectPool::new(8, 64),
            pld_pool: ObjectPool::new(8, 64),
        }
    }

    /// Serve one request end to end. Every exit path releases the pooled
    /// descriptor (via guard drop) and produces exactly one response.
    pub async fn handle(&self, peer: SocketAddr, req: Request) -> Response<Body> {
        let start = Instant::now();

        // fail fast on the declared size, before the body is read
        if self.max_request_size != 0 {
            if let Some(length) = req.headers().get(CONTENT_LENGTH) {
                let parsed = length.to_str().ok().and_then(|v| v.parse::<u64>().ok());
                match parsed {
                    None => {
                        tracing::error!("unreadable content-length header");
                        metrics::record_request(req.method().as_str(), 500, start);
                        return error::translation_failure();
                    }
                    Some(size) if size > self.max_request_size => {
                        tracing::error!(
                            allowed_size = self.max_request_size,
                            actual_size = size,
                            "request max body size is exceeded"
                        );
                        metrics::record_request(req.method().as_str(), 400, start);
                        return error::oversized();
                    }
                    _ => {}
                }
            }
        }

        let mut desc = self.req_pool.get();
        let (parts, body) = req.into_parts();
        desc.hydrate(&parts, peer, &self.trusted_proxies);

        if let Err(e) = self.read_body(&mut desc, parts, body).await {
            return match e {
                BodyError::BrokenPipe(err) => {
                    // the pipe is broken, there is no point writing a body
                    tracing::error!(error = %err, "client hung up while sending the request body");
                    metrics::record_request(&desc.method, 500, start);
                    error::broken_pipe()
                }
                BodyError::Oversized => {
                    tracing::error!(
                        allowed_size = self.max_request_size,
                        "request max body size is exceeded"
                    );
                    metrics::record_request(&desc.method, 400, start);
                    error::oversized()
                }
                BodyError::Malformed(err) => {
                    tracing::error!(error = %err, "request forming error");
                    metrics::record_request(&desc.method, 500, start);
                    error::translation_failure()
                }
            };
        }

        let mut pld = self.pld_pool.get();
        pld.codec = Codec::Json;
        if let Err(e) = serde_json::to_writer(&mut pld.context, &desc.wire_context()) {
            tracing::error!(error = %e, "payload forming error");
            metrics::record_request(&desc.method, self.internal_code, start);
            return error::classify(&crate::executor::ExecError::Encode(e.to_string()), self.internal_code);
        }
        std::mem::swap(&mut pld.body, &mut desc.body);

        match self.executor.mode() {
            ExecMode::Unary => self.dispatch_unary(desc, pld, start).await,
            ExecMode::Stream => self.dispatch_stream(desc, pld, start).await,
        }
    }

    /// Consume the request body according to content type: multipart parts
    /// go through the upload policy, forms/JSON are optionally parsed into
    /// the data tree, everything else passes through raw.
    async fn read_body(
        &self,
        desc: &mut Pooled<RequestDescriptor>,
        parts: Parts,
        body: Body,
    ) -> Result<(), BodyError> {
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("multipart/form-data") {
            return self.read_multipart(desc, parts, body).await;
        }

        let raw = self.collect_body(body).await?;

        if self.parse_body && content_type.starts_with("application/x-www-form-urlencoded") {
            match serde_urlencoded::from_bytes::<Vec<(String, String)>>(&raw) {
                Ok(pairs) => {
                    for (name, value) in pairs {
                        desc.push_field(&name, value);
                    }
                    return Ok(());
                }
                Err(e) => return Err(BodyError::Malformed(e.to_string())),
            }
        }

        if self.parse_body && content_type.starts_with("application/json") {
            if let Ok(tree) = serde_json::from_slice(&raw) {
                desc.data = tree;
                desc.parsed = true;
                return Ok(());
            }
            // undecodable JSON passes through raw; the worker is the
            // authority on rejecting it
        }

        desc.body.extend_from_slice(&raw);
        Ok(())
    }

    async fn read_multipart(
        &self,
        desc: &mut Pooled<RequestDescriptor>,
        parts: Parts,
        body: Body,
    ) -> Result<(), BodyError> {
        let req = Request::from_parts(parts, body);
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| BodyError::Malformed(e.to_string()))?;

        let dir_ok = self.policy.dir_usable().await;
        if !dir_ok {
            tracing::warn!(dir = %self.policy.dir().display(), "upload directory is unusable");
        }

        loop {
            let mut field = match multipart.next_field().await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => return Err(BodyError::Malformed(e.to_string())),
            };

            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(|s| s.to_string());
            let mime = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();

            match file_name {
                Some(file_name) => {
                    let upload = uploads::store_part(
                        &self.policy,
                        &mut field,
                        file_name,
                        mime,
                        self.max_request_size,
                        dir_ok,
                    )
                    .await
                    .map_err(|e| BodyError::Malformed(e.to_string()))?;
                    desc.push_upload(&name, upload);
                }
                None => {
                    let value = field
                        .text()
                        .await
                        .map_err(|e| BodyError::Malformed(e.to_string()))?;
                    desc.push_field(&name, value);
                }
            }
        }

        desc.parsed = true;
        Ok(())
    }

    async fn collect_body(&self, body: Body) -> Result<Vec<u8>, BodyError> {
        let mut stream = body.into_data_stream();
        let mut raw = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk: Bytes = chunk.map_err(BodyError::BrokenPipe)?;
            if self.max_request_size != 0
                && (raw.len() + chunk.len()) as u64 > self.max_request_size
            {
                return Err(BodyError::Oversized);
            }
            raw.extend_from_slice(&chunk);
        }
        Ok(raw)
    }

    async fn dispatch_unary(
        &self,
        desc: Pooled<RequestDescriptor>,
        pld: Pooled<Payload>,
        start: Instant,
    ) -> Response<Body> {
        let result = self.executor.exec(&pld).await;
        drop(pld);

        let fragment = match result {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "execute");
                self.log_request(&desc, self.internal_code, start);
                return error::classify(&e, self.internal_code);
            }
        };

        match ResponseDescriptor::decode(&fragment.context) {
            Ok(rd) => {
                self.log_request(&desc, rd.status, start);
                rd.into_response(Body::from(fragment.body))
            }
            Err(e) => {
                tracing::error!(error = %e, "undecodable response context");
                self.log_request(&desc, self.internal_code, start);
                error::classify(
                    &crate::executor::ExecError::Decode(e.to_string()),
                    self.internal_code,
                )
            }
        }
    }

    async fn dispatch_stream(
        &self,
        desc: Pooled<RequestDescriptor>,
        pld: Pooled<Payload>,
        start: Instant,
    ) -> Response<Body> {
        let (frag_tx, mut frag_rx) = mpsc::channel::<Payload>(4);
        let (err_tx, mut err_rx) = mpsc::channel::<crate::executor::ExecError>(1);
        let (stop_tx, stop_rx) = oneshot::channel();

        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            // sole output: one terminal error, or closure of frag_tx on drop
            if let Err(e) = executor.exec_stream(&pld, frag_tx, stop_rx).await {
                let _ = err_tx.send(e).await;
            }
        });

        let first = tokio::select! {
            biased;
            Some(e) = err_rx.recv() => {
                tracing::error!(error = %e, "execute");
                self.log_request(&desc, self.internal_code, start);
                drain_fragments(frag_rx);
                return error::classify(&e, self.internal_code);
            }
            fragment = frag_rx.recv() => fragment,
        };

        let Some(first) = first else {
            // channel closed before the first fragment: the driver returned,
            // and its verdict arrives on the error channel
            if let Some(e) = err_rx.recv().await {
                tracing::error!(error = %e, "execute");
                self.log_request(&desc, self.internal_code, start);
                return error::classify(&e, self.internal_code);
            }
            // worker completed without emitting a fragment
            self.log_request(&desc, 200, start);
            return Response::new(Body::empty());
        };

        let rd = match ResponseDescriptor::decode(&first.context) {
            Ok(rd) => rd,
            Err(e) => {
                tracing::error!(error = %e, "undecodable response context");
                self.log_request(&desc, self.internal_code, start);
                drain_fragments(frag_rx);
                return error::classify(
                    &crate::executor::ExecError::Decode(e.to_string()),
                    self.internal_code,
                );
            }
        };

        self.log_request(&desc, rd.status, start);
        let stream = FragmentStream::new(Bytes::from(first.body), frag_rx, err_rx, stop_tx, desc);
        rd.into_response(Body::from_stream(stream))
    }

    fn log_request(&self, req: &RequestDescriptor, status: u16, start: Instant) {
        metrics::record_request(&req.method, status, start);

        if self.access_logs {
            // external/cwe/cwe-117: attacker-controlled headers are
            // CR/LF-stripped before they reach the log
            let user_agent = strip_crlf(first_header(req, "user-agent"));
            let referer = strip_crlf(first_header(req, "referer"));
            let host = first_header(req, "host").to_string();
            let content_len = first_header(req, "content-length").to_string();

            tracing::info!(
                status,
                method = %req.method,
                uri = %req.uri,
                remote_address = %req.remote_addr,
                query = %req.raw_query,
                content_len = %content_len,
                host = %host,
                user_agent = %user_agent,
                referer = %referer,
                elapsed = ?start.elapsed(),
                "http access log"
            );
        } else {
            tracing::info!(
                status,
                method = %req.method,
                uri = %req.uri,
                remote_address = %req.remote_addr,
                elapsed = ?start.elapsed(),
                "http log"
            );
        }
    }
}

fn first_header<'a>(req: &'a RequestDescriptor, name: &str) -> &'a str {
    req.headers
        .get(name)
        .and_then(|v| v.first())
        .map(String::as_str)
        .unwrap_or("")
}

fn strip_crlf(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

// keep the handler honest about never leaking internal detail: the only
// bodies it writes itself are the two terse fixed strings in error.rs
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::executor::{EchoExecutor, ExecError, WorkerState};
    use async_trait::async_trait;
    use axum::http::StatusCode;

    fn handler() -> Handler {
        let mut config = GatewayConfig::default();
        config.max_request_size = 1;
        Handler::new(&config, Arc::new(EchoExecutor))
    }

    fn parsing_handler() -> Handler {
        let mut config = GatewayConfig::default();
        config.parse_body = true;
        Handler::new(&config, Arc::new(EchoExecutor))
    }

    async fn echoed_context(h: &Handler, req: Request) -> serde_json::Value {
        let resp = h.handle("127.0.0.1:5000".parse().unwrap(), req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Unary executor answering every exchange with one fixed payload.
    struct UnaryScriptExecutor {
        context: Vec<u8>,
        body: Vec<u8>,
    }

    #[async_trait]
    impl Executor for UnaryScriptExecutor {
        async fn exec(&self, payload: &Payload) -> Result<Payload, ExecError> {
            Ok(Payload {
                body: self.body.clone(),
                context: self.context.clone(),
                codec: payload.codec,
            })
        }

        async fn exec_stream(
            &self,
            _payload: &Payload,
            _sink: mpsc::Sender<Payload>,
            _stop: oneshot::Receiver<()>,
        ) -> Result<(), ExecError> {
            Err(ExecError::Network("unary-only executor".to_string()))
        }

        async fn release(&self, _pid: i64) -> Result<(), ExecError> {
            Ok(())
        }

        fn workers(&self) -> Vec<WorkerState> {
            Vec::new()
        }

        fn mode(&self) -> ExecMode {
            ExecMode::Unary
        }
    }

    #[tokio::test]
    async fn oversized_declared_body_fails_fast() {
        let h = handler();
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-length", (2 * MB).to_string())
            .body(Body::empty())
            .unwrap();

        let resp = h.handle("127.0.0.1:5000".parse().unwrap(), req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreadable_content_length_is_translation_failure() {
        let h = handler();
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-length", "not-a-number")
            .body(Body::empty())
            .unwrap();

        let resp = h.handle("127.0.0.1:5000".parse().unwrap(), req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn echo_round_trip_carries_request_metadata() {
        let h = handler();
        let req = Request::builder()
            .method("GET")
            .uri("/ping?a=1")
            .header("host", "localhost")
            .body(Body::empty())
            .unwrap();

        let resp = h.handle("127.0.0.1:5000".parse().unwrap(), req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let ctx: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(ctx["method"], "GET");
        assert_eq!(ctx["rawQuery"], "a=1");
        assert_eq!(ctx["remoteAddr"], "127.0.0.1");
    }

    #[tokio::test]
    async fn unary_mode_applies_status_headers_and_body_from_one_exchange() {
        let exec = UnaryScriptExecutor {
            context: br#"{"status":202,"headers":{"X-Job":["42"]}}"#.to_vec(),
            body: b"accepted".to_vec(),
        };
        let h = Handler::new(&GatewayConfig::default(), Arc::new(exec));

        let req = Request::builder()
            .method("GET")
            .uri("/jobs")
            .body(Body::empty())
            .unwrap();
        let resp = h.handle("127.0.0.1:5000".parse().unwrap(), req).await;

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(resp.headers().get("X-Job").unwrap(), "42");
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"accepted");
    }

    #[tokio::test]
    async fn unary_mode_with_undecodable_context_maps_to_internal_code() {
        let exec = UnaryScriptExecutor {
            context: b"not a response context".to_vec(),
            body: Vec::new(),
        };
        let mut config = GatewayConfig::default();
        config.internal_error_code = 503;
        let h = Handler::new(&config, Arc::new(exec));

        let req = Request::builder()
            .method("GET")
            .uri("/jobs")
            .body(Body::empty())
            .unwrap();
        let resp = h.handle("127.0.0.1:5000".parse().unwrap(), req).await;

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty(), "decode detail must not reach the client");
    }

    #[tokio::test]
    async fn urlencoded_body_folds_into_data_tree_when_parsing_enabled() {
        let h = parsing_handler();
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("a=1&user[name]=ann"))
            .unwrap();

        let ctx = echoed_context(&h, req).await;
        assert_eq!(ctx["parsed"], true);
        assert_eq!(ctx["data"]["a"], "1");
        assert_eq!(ctx["data"]["user"]["name"], "ann");
    }

    #[tokio::test]
    async fn json_body_folds_into_data_tree_when_parsing_enabled() {
        let h = parsing_handler();
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"k":[1,2],"nested":{"ok":true}}"#))
            .unwrap();

        let ctx = echoed_context(&h, req).await;
        assert_eq!(ctx["parsed"], true);
        assert_eq!(ctx["data"]["k"][1], 2);
        assert_eq!(ctx["data"]["nested"]["ok"], true);
    }

    #[tokio::test]
    async fn undecodable_json_passes_through_raw() {
        let h = parsing_handler();
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from("{broken"))
            .unwrap();

        // the worker is the authority on rejecting bad JSON
        let ctx = echoed_context(&h, req).await;
        assert_eq!(ctx["parsed"], false);
        assert!(ctx["data"].is_null());
    }

    #[tokio::test]
    async fn bodies_pass_through_raw_when_parsing_disabled() {
        let h = handler();
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("a=1"))
            .unwrap();

        let ctx = echoed_context(&h, req).await;
        assert_eq!(ctx["parsed"], false);
        assert!(ctx["data"].is_null());
    }
}
