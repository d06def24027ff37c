//! Streamed dispatch against a live gateway: fragment ordering, mid-stream
//! failure, saturation signalling and the size precheck.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use workgate::config::GatewayConfig;
use workgate::executor::ExecError;
use workgate::handler::error::NO_WORKERS_HEADER;

mod common;

use common::ScriptedStreamExecutor;

#[tokio::test]
async fn fragments_arrive_in_order_behind_first_fragment_headers() {
    let exec = Arc::new(ScriptedStreamExecutor::new(201, &["hello ", "world"]));
    let (addr, shutdown) = common::spawn_gateway(GatewayConfig::default(), exec).await;

    let resp = common::client()
        .get(format!("http://{addr}/stream"))
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(resp.status(), 201);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(resp.text().await.unwrap(), "hello world");

    shutdown.trigger();
}

#[tokio::test]
async fn stream_with_no_fragments_completes_as_empty_200() {
    let exec = Arc::new(ScriptedStreamExecutor::new(200, &[]));
    let (addr, shutdown) = common::spawn_gateway(GatewayConfig::default(), exec).await;

    let resp = common::client()
        .get(format!("http://{addr}/empty"))
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().is_empty());

    shutdown.trigger();
}

#[tokio::test]
async fn mid_stream_failure_aborts_after_flushed_fragments() {
    let exec = Arc::new(
        ScriptedStreamExecutor::new(200, &["hello ", "world"])
            .with_gap(Duration::from_millis(50))
            .failing_with(|| ExecError::Network("worker connection reset".to_string())),
    );
    let (addr, shutdown) = common::spawn_gateway(GatewayConfig::default(), exec).await;

    let resp = common::client()
        .get(format!("http://{addr}/stream"))
        .send()
        .await
        .expect("gateway unreachable");
    // headers were already committed by the first fragment
    assert_eq!(resp.status(), 200);

    let mut received = Vec::new();
    let mut aborted = false;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => received.extend_from_slice(&bytes),
            Err(_) => {
                aborted = true;
                break;
            }
        }
    }

    assert!(aborted, "the connection should abort, not end cleanly");
    assert_eq!(received, b"hello world");

    shutdown.trigger();
}

#[tokio::test]
async fn client_disconnect_mid_stream_drains_remaining_fragments() {
    let exec = Arc::new(
        ScriptedStreamExecutor::new(200, &["one", "two", "three", "four", "five", "six"])
            .with_gap(Duration::from_millis(30)),
    );
    let (addr, shutdown) = common::spawn_gateway(GatewayConfig::default(), exec.clone()).await;

    let resp = common::client()
        .get(format!("http://{addr}/stream"))
        .send()
        .await
        .expect("gateway unreachable");
    let mut body = resp.bytes_stream();
    assert!(body.next().await.is_some(), "first fragment should arrive");
    // hang up mid-stream
    drop(body);

    // the drain keeps consuming, so every remaining send is still accepted
    // and the script runs to completion
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while exec.completions() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(exec.completions(), 1, "worker script should finish into the drain");

    shutdown.trigger();
}

#[tokio::test]
async fn saturation_uses_configured_code_and_marker_header() {
    let exec = Arc::new(
        ScriptedStreamExecutor::new(200, &[]).failing_with(|| ExecError::NoFreeWorkers),
    );
    let mut config = GatewayConfig::default();
    config.internal_error_code = 507;
    let (addr, shutdown) = common::spawn_gateway(config, exec).await;

    let resp = common::client()
        .get(format!("http://{addr}/busy"))
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(resp.status(), 507);
    assert_eq!(resp.headers().get(NO_WORKERS_HEADER).unwrap(), "true");

    shutdown.trigger();
}

#[tokio::test]
async fn worker_fault_before_first_fragment_has_no_marker_header() {
    let exec = Arc::new(
        ScriptedStreamExecutor::new(200, &[])
            .failing_with(|| ExecError::SoftJob("uncaught worker exception".to_string())),
    );
    let (addr, shutdown) = common::spawn_gateway(GatewayConfig::default(), exec).await;

    let resp = common::client()
        .get(format!("http://{addr}/fault"))
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(resp.status(), 500);
    assert!(resp.headers().get(NO_WORKERS_HEADER).is_none());

    shutdown.trigger();
}

#[tokio::test]
async fn oversized_request_never_reaches_the_pool() {
    let exec = Arc::new(ScriptedStreamExecutor::new(200, &["ok"]));
    let mut config = GatewayConfig::default();
    config.max_request_size = 1; // MB
    let (addr, shutdown) = common::spawn_gateway(config, exec.clone()).await;

    let resp = common::client()
        .post(format!("http://{addr}/ingest"))
        .body(vec![0u8; 2 * 1024 * 1024])
        .send()
        .await
        .expect("gateway unreachable");

    assert_eq!(resp.status(), 400);
    assert_eq!(
        resp.text().await.unwrap(),
        "request body max size is exceeded"
    );
    assert_eq!(exec.calls(), 0, "the executor must never see the request");

    shutdown.trigger();
}
