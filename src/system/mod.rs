//! System utilities and monitoring
//!
//! This module contains the Prometheus metrics shared by the dispatcher,
//! the worker pool and the completion notifier.

pub mod metrics;

pub use metrics::Metrics;
