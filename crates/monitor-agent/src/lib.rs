//! Host health monitor service
//!
//! Configuration and HTTP surface for the `health-monitor` binary.

pub mod api;
pub mod config;
