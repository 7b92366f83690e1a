//! Integration tests for Swarmcast
//!
//! Exercise the orchestrator together with the simulated engines, the
//! remote daemon client against a mock daemon, and the local library engine.

#[path = "integration/library_streaming.rs"]
mod library_streaming;
#[path = "integration/remote_daemon.rs"]
mod remote_daemon;
#[path = "integration/sim_lifecycle.rs"]
mod sim_lifecycle;
