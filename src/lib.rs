//! # Caddystat
//!
//! Self-hosted analytics for reverse-proxy and web-server access logs.
//!
//! - `config`: environment-sourced startup configuration
//! - `database`: SQLite-backed storage engine (inserts, rollups, analytic
//!   reads, sessions, sites, reports, retention, health)
//! - `geocache`: bounded LRU cache in front of IP geolocation lookups
//! - `ingest`: log tailers, the line parser/UA classifier/geo reader seams,
//!   and privacy transforms
//! - `sse`: the live-dashboard event hub
//! - `ratelimit`: per-client-IP sliding window limiter
//! - `metrics`: Prometheus metrics catalogue
//! - `reports`: scheduled report rendering and delivery
//! - `janitor`: background retention and session-expiry sweeper
//! - `api`: the HTTP server
//! - `app`: startup/shutdown wiring

pub mod api;
pub mod app;
pub mod config;
pub mod database;
pub mod geocache;
pub mod ingest;
pub mod janitor;
pub mod metrics;
pub mod ratelimit;
pub mod reports;
pub mod sse;

/// Crate version, for `GET /health` and startup logging.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
