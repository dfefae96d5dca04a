//! API layer
//!
//! HTTP handlers served behind the gate:
//! - Index and current-user endpoints
//! - Metrics (Prometheus)

mod account;
pub mod metrics;

pub use account::account_router;
pub use metrics::metrics_router;
