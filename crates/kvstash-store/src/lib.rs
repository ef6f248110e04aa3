//! kvstash Store - Async CRUD over versioned object stores
//!
//! Two layers, consumed bottom-up:
//! - [`StoreAdapter`]: one fresh connection and one transaction per call,
//!   run on a blocking worker and settled exactly once
//! - [`StoreHandle`]: binds a configured database/store, tracks the opened
//!   version and a readiness flag, and re-exposes the four operations
//!
//! Failures never panic across the async boundary; every operation
//! settles with a [`Result`] whose error carries an [`ErrorKind`].

mod adapter;
mod config;
mod error;
mod handle;

pub use adapter::{StoreAdapter, StoreTarget};
pub use config::{StoreConfig, DEFAULT_DB_NAME, DEFAULT_VERSION};
pub use error::{ErrorKind, Result, StoreError};
pub use handle::StoreHandle;

/// Initialize logging
///
/// Honours `RUST_LOG`; defaults to `info`. Does nothing if a global
/// subscriber is already installed.
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
