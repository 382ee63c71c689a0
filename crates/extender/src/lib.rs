//! Multi-resource scheduler extender
//!
//! Serves the kube-scheduler extender protocol (`/filter`, `/prioritize`,
//! `/health`) on top of the shared scheduling core.

pub mod api;
pub mod config;
pub mod wire;
