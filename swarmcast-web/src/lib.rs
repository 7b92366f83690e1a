//! Swarmcast Web - JSON API server
//!
//! Exposes the stream session lifecycle over HTTP and serves the packaged
//! HLS output as static files.

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::ApiError;
pub use server::{AppState, ServerError, router, run_server};
