//! Tiergate - Multi-Tier Rate Limiting
//!
//! This crate gates API traffic per credential across three overlapping
//! windows (per-minute, per-hour, per-day). Counters live either in process
//! memory or in a shared Redis so several instances can enforce one quota.
//! The axum middleware in [`middleware`] is the only HTTP-aware layer.

pub mod config;
pub mod error;
pub mod middleware;
pub mod ratelimit;
pub mod server;
