//! HTTP servers
//!
//! A small hyper HTTP/1 accept loop shared by the lookup, health and metrics
//! listeners. Every listener observes the process-wide cancellation token
//! and registers its connections with a shared task tracker.

mod endpoints;
mod listener;

pub use endpoints::{HealthEndpoint, MetricsEndpoint, Readiness};
pub use listener::{bind, reply, serve, text, Endpoint, HttpResponse};
