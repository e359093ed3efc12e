//! Warm start
//!
//! Pre-loads the cache from the store at boot, before any traffic is served.

mod loader;

pub use loader::{WarmStartConfig, WarmStartLoader, WarmStartReport};
