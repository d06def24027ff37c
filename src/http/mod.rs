//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, catch-all route, ConnectInfo)
//!     → handler (translate, dispatch to the worker pool, stream back)
//!     → response to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
