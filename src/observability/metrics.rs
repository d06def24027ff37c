//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus recorder and hand back the render handle
//! - Re-derive worker-pool gauges from a state snapshot on each scrape
//! - Track request counts and latency distribution
//!
//! # Metrics
//! - `workgate_requests_total` (counter): requests by method, status
//! - `workgate_request_duration_seconds` (histogram): latency distribution
//! - `workgate_total_workers` / `workgate_workers_memory_bytes` (gauges)
//! - `workgate_worker_state` / `workgate_worker_memory_bytes` (per-pid gauges)
//! - `workgate_workers_ready` / `_working` / `_invalid` (gauges)
//!
//! # Design Decisions
//! - The exporter is a passive observer: gauges are recomputed at scrape
//!   time from `Executor::workers()`, never in the request hot path
//! - An unqueryable pool yields an empty snapshot, not a stalled scrape

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::executor::{WorkerState, WorkerStatus};

/// Install the process-wide Prometheus recorder.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "workgate_requests_total",
        "Total requests served by the gateway"
    );
    describe_histogram!(
        "workgate_request_duration_seconds",
        "End-to-end request latency"
    );
    describe_gauge!(
        "workgate_total_workers",
        "Total number of workers in the pool"
    );
    describe_gauge!(
        "workgate_workers_memory_bytes",
        "Cumulative resident memory of all workers"
    );
    describe_gauge!(
        "workgate_worker_memory_bytes",
        "Resident memory of one worker"
    );
    describe_gauge!("workgate_worker_state", "Current state of one worker");
    describe_gauge!("workgate_workers_ready", "Workers in the ready state");
    describe_gauge!("workgate_workers_working", "Workers in the working state");
    describe_gauge!(
        "workgate_workers_invalid",
        "Workers in invalid, killing, destroyed, errored or inactive states"
    );

    Ok(handle)
}

/// Record one finished (or failed) request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "workgate_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!("workgate_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Fold a worker-state snapshot into the gauge set. Called per scrape.
pub fn record_workers(workers: &[WorkerState]) {
    let mut cumulative_memory = 0f64;
    let mut ready = 0f64;
    let mut working = 0f64;
    let mut invalid = 0f64;

    for worker in workers {
        cumulative_memory += worker.memory_usage as f64;

        gauge!(
            "workgate_worker_state",
            "state" => worker.status.as_str(),
            "pid" => worker.pid.to_string(),
        )
        .set(0.0);
        gauge!(
            "workgate_worker_memory_bytes",
            "pid" => worker.pid.to_string(),
        )
        .set(worker.memory_usage as f64);

        match worker.status {
            WorkerStatus::Ready => ready += 1.0,
            WorkerStatus::Working => working += 1.0,
            _ => invalid += 1.0,
        }
    }

    gauge!("workgate_total_workers").set(workers.len() as f64);
    gauge!("workgate_workers_memory_bytes").set(cumulative_memory);
    gauge!("workgate_workers_ready").set(ready);
    gauge!("workgate_workers_working").set(working);
    gauge!("workgate_workers_invalid").set(invalid);
}
