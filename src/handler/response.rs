//! Response materialization: worker fragments -> live HTTP response.
//!
//! # Responsibilities
//! - Decode the first fragment's status and header set and apply them once
//! - Stream subsequent body fragments in receipt order, flushed as they come
//! - On mid-stream executor failure, abort the connection and drain the
//!   remaining fragments so the worker stays consumable
//!
//! # Design Decisions
//! - Client disconnect shows up as the body stream being dropped; the Drop
//!   impl drains the channel and the pooled descriptor is released with it
//! - Later fragments never resend headers: only their body bytes are read

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};

use crate::executor::{ExecError, Payload};
use crate::handler::pool::Pooled;
use crate::handler::request::RequestDescriptor;

/// Status and headers carried by the first fragment of an exchange.
#[derive(Debug, Deserialize)]
pub struct ResponseDescriptor {
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
}

impl ResponseDescriptor {
    pub fn decode(context: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(context)
    }

    /// Apply status and headers to a fresh response around the given body.
    /// The worker is the authority on ordinary status codes; they pass
    /// through unmodified.
    pub fn into_response(self, body: Body) -> Response<Body> {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut resp = Response::new(body);
        *resp.status_mut() = status;

        let headers = resp.headers_mut();
        for (name, values) in self.headers {
            let Ok(name) = HeaderName::try_from(name.as_str()) else {
                tracing::warn!(header = %name, "skipping invalid response header name");
                continue;
            };
            for value in values {
                match HeaderValue::try_from(value) {
                    Ok(v) => {
                        headers.append(name.clone(), v);
                    }
                    Err(_) => {
                        tracing::warn!(header = %name, "skipping invalid response header value");
                    }
                }
            }
        }
        resp
    }
}

/// Body stream for a streamed exchange after the first fragment has been
/// applied. Sole reader of both the fragment and error channels.
pub struct FragmentStream {
    first: Option<Bytes>,
    fragments: Option<mpsc::Receiver<Payload>>,
    errors: mpsc::Receiver<ExecError>,
    // dropping this signals the executor that the client went away
    _stop: oneshot::Sender<()>,
    // released (reset + returned to the pool) when the stream is done
    _request: Pooled<RequestDescriptor>,
    fragments_done: bool,
    done: bool,
}

impl FragmentStream {
    pub fn new(
        first: Bytes,
        fragments: mpsc::Receiver<Payload>,
        errors: mpsc::Receiver<ExecError>,
        stop: oneshot::Sender<()>,
        request: Pooled<RequestDescriptor>,
    ) -> Self {
        Self {
            first: Some(first),
            fragments: Some(fragments),
            errors,
            _stop: stop,
            _request: request,
            fragments_done: false,
            done: false,
        }
    }
}

impl Stream for FragmentStream {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        if let Some(first) = this.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }

        // the fragment channel closing only means the driver returned; its
        // verdict (error or clean finish) arrives on the error channel
        if this.fragments_done {
            return match this.errors.poll_recv(cx) {
                Poll::Ready(Some(e)) => {
                    tracing::error!(error = %e, "execute failed mid-stream");
                    this.done = true;
                    Poll::Ready(Some(Err(io::Error::other(
                        "worker execution failed mid-stream",
                    ))))
                }
                Poll::Ready(None) => {
                    this.done = true;
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            };
        }

        // an error preempts any buffered fragments
        if let Poll::Ready(Some(e)) = this.errors.poll_recv(cx) {
            tracing::error!(error = %e, "execute failed mid-stream");
            this.done = true;
            if let Some(rx) = this.fragments.take() {
                drain_fragments(rx);
            }
            return Poll::Ready(Some(Err(io::Error::other(
                "worker execution failed mid-stream",
            ))));
        }

        let Some(fragments) = this.fragments.as_mut() else {
            this.done = true;
            return Poll::Ready(None);
        };

        match fragments.poll_recv(cx) {
            Poll::Ready(Some(p)) => Poll::Ready(Some(Ok(Bytes::from(p.body)))),
            Poll::Ready(None) => {
                this.fragments_done = true;
                // ensure the error channel has a waker registered
                Pin::new(this).poll_next(cx)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for FragmentStream {
    fn drop(&mut self) {
        // client went away mid-stream: leave the worker consumable
        if !self.done {
            if let Some(rx) = self.fragments.take() {
                tracing::warn!("client disconnected mid-stream, draining remaining fragments");
                drain_fragments(rx);
            }
        }
    }
}

/// Read the fragment channel to the end in the background so the worker
/// connection is left in a consumable state for the next request.
pub fn drain_fragments(mut rx: mpsc::Receiver<Payload>) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        rx.close();
        return;
    };
    handle.spawn(async move {
        tracing::warn!("draining response fragments, worker is in use");
        while rx.recv().await.is_some() {}
        tracing::warn!("draining finished, worker is ready for the next request");
    });
}
