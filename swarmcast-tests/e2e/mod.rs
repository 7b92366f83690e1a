//! End-to-end tests for Swarmcast
//!
//! Drive complete user workflows through the HTTP API, from magnet link to
//! playlist on disk to teardown.

mod streaming_workflow;
