//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Gate Metrics
    pub static ref GATE_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("oauthgate_gate_requests_total", "Total number of requests classified by the gate"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref LOGINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("oauthgate_logins_total", "Total number of OAuth login attempts"),
        &["provider", "outcome"]
    ).expect("metric can be created");
    pub static ref DENIALS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("oauthgate_denials_total", "Total number of requests denied by the gate"),
        &["reason"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("oauthgate_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(GATE_REQUESTS_TOTAL.clone()))
            .expect("GATE_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(LOGINS_TOTAL.clone()))
            .expect("LOGINS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DENIALS_TOTAL.clone()))
            .expect("DENIALS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
