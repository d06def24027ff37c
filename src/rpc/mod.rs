//! Out-of-band administrative surface: worker release RPC and the
//! Prometheus scrape endpoint. Served on the admin listener, never on the
//! gateway listener.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::executor::Executor;
use crate::observability::metrics;

/// Binary status codes of the release call.
pub const RELEASE_OK: u8 = 1;
pub const RELEASE_FAILED: u8 = 2;

#[derive(Clone)]
pub struct AdminState {
    pub executor: Arc<dyn Executor>,
    pub metrics: PrometheusHandle,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub pid: i64,
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub ok: u8,
}

/// Build the admin router.
pub fn router(executor: Arc<dyn Executor>, metrics: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .route("/rpc/workers/release", post(release_worker))
        .with_state(AdminState { executor, metrics })
}

/// Ask the pool to evict one worker by pid. In-flight requests already
/// assigned to it are unaffected.
async fn release_worker(
    State(state): State<AdminState>,
    Json(request): Json<ReleaseRequest>,
) -> Json<ReleaseResponse> {
    match state.executor.release(request.pid).await {
        Ok(()) => {
            tracing::info!(pid = request.pid, "worker released");
            Json(ReleaseResponse { ok: RELEASE_OK })
        }
        Err(e) => {
            tracing::warn!(pid = request.pid, error = %e, "worker release failed");
            Json(ReleaseResponse { ok: RELEASE_FAILED })
        }
    }
}

/// Snapshot worker state, fold it into the gauges, render the registry.
async fn scrape(State(state): State<AdminState>) -> String {
    let workers = state.executor.workers();
    metrics::record_workers(&workers);
    state.metrics.render()
}
