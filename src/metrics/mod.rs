//! Prometheus metrics for the Service Ingress Operator
//!
//! This module exposes metrics for monitoring controller health, queue
//! behaviour and reconcile performance.

mod prometheus;

pub use prometheus::*;
