//! HTTP gateway for a worker-pool application server.
//!
//! Accepts inbound HTTP connections, translates each request into a
//! transport-neutral payload, dispatches it to a pool of long-lived worker
//! processes, and streams the worker's response back to the client.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                    GATEWAY                        │
//!                    │                                                   │
//!   Client Request   │  ┌─────────┐   ┌───────────┐   ┌─────────────┐  │
//!   ─────────────────┼─▶│  http   │──▶│  handler  │──▶│  executor   │──┼──▶ Worker
//!                    │  │ server  │   │ translate │   │ (external   │  │    Process
//!                    │  └─────────┘   │ + uploads │   │  pool)      │  │
//!                    │                └─────┬─────┘   └──────┬──────┘  │
//!                    │                      │                │         │
//!   Client Response  │  ┌───────────────────▼────────────────▼──────┐  │
//!   ◀────────────────┼──│ response writer: first fragment applies   │  │
//!                    │  │ status+headers, the rest stream through   │  │
//!                    │  └────────────────────────────────────────────┘ │
//!                    │                                                  │
//!                    │  ┌────────────────────────────────────────────┐ │
//!                    │  │           Cross-Cutting Concerns            │ │
//!                    │  │ ┌────────┐ ┌─────────────┐ ┌─────────────┐ │ │
//!                    │  │ │ config │ │observability│ │ rpc (admin) │ │ │
//!                    │  │ └────────┘ └─────────────┘ └─────────────┘ │ │
//!                    │  │ ┌──────────────┐  ┌───────────────────────┐│ │
//!                    │  │ │ object pools │  │ lifecycle (shutdown)  ││ │
//!                    │  │ └──────────────┘  └───────────────────────┘│ │
//!                    │  └────────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod executor;
pub mod handler;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod rpc;

pub use config::GatewayConfig;
pub use executor::{Codec, ExecError, ExecMode, Executor, Payload, WorkerState, WorkerStatus};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
