//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! SIGTERM/SIGINT or Shutdown::trigger()
//!     → broadcast to listeners
//!     → stop accepting, drain in-flight requests, exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
