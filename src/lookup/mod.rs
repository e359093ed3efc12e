//! Order lookup
//!
//! - **Service** (`service.rs`) - cache-first lookup with store read-through
//! - **HTTP** (`http.rs`) - the `/order` endpoint and its HTML/JSON rendering

mod http;
mod service;

pub use http::{query_param, render_html, Format, LookupHandler};
pub use service::{Detail, Lookup, LookupConfig, LookupService, LookupSource, OrderView};
