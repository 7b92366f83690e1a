//! HTTP request handlers

pub mod api;

pub use api::{destroy_stream, health, list_files, start_stream, stream_status};
