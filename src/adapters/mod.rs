//! Adapters between the reconcile engine and the Kubernetes API
//!
//! The informer mirrors watched objects locally and reports changes; the
//! store module is the seam through which the reconciler reads that cache
//! and writes to the API server.

mod informer;
mod store;

pub use informer::*;
pub use store::*;
