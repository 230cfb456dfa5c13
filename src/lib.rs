//! Service Ingress Operator
//!
//! A level-triggered controller that exposes every Service annotated with
//! `ingress/http` through an Ingress it owns, recreating the Ingress when it
//! is deleted or drifts and removing it once the Service is gone.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod error;
pub mod key;
pub mod metrics;
pub mod queue;
pub mod reconcilers;

pub use config::Config;
pub use error::{Error, Result};
pub use key::ObjectKey;
