//! Error classification: internal failure taxonomy -> HTTP outcome.
//!
//! # Design Decisions
//! - Internal detail never reaches the client body; it goes to the server
//!   log at the point of detection
//! - Saturation is distinguishable by monitoring through one boolean
//!   response header, so 5xx spikes can be attributed correctly

use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode};

use crate::executor::ExecError;

/// Set to `true` on the saturation (no-free-worker) condition only.
pub const NO_WORKERS_HEADER: &str = "No-Workers";

/// Map an executor failure onto the configured internal-error status.
/// Everything except saturation is indistinguishable to the client.
pub fn classify(err: &ExecError, internal_code: u16) -> Response<Body> {
    let status =
        StatusCode::from_u16(internal_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = status;

    if matches!(err, ExecError::NoFreeWorkers) {
        resp.headers_mut()
            .insert(NO_WORKERS_HEADER, HeaderValue::from_static("true"));
    }
    resp
}

/// Declared request body exceeds the configured ceiling.
pub fn oversized() -> Response<Body> {
    terse(StatusCode::BAD_REQUEST, "request body max size is exceeded")
}

/// The request could not be translated (malformed framing, unreadable
/// Content-Length, broken form data).
pub fn translation_failure() -> Response<Body> {
    terse(StatusCode::INTERNAL_SERVER_ERROR, "request translation failed")
}

/// Broken client pipe: nothing useful can be written, but the handler must
/// still produce a response value. The body stays empty.
pub fn broken_pipe() -> Response<Body> {
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

fn terse(status: StatusCode, msg: &'static str) -> Response<Body> {
    let mut resp = Response::new(Body::from(msg));
    *resp.status_mut() = status;
    resp
}
