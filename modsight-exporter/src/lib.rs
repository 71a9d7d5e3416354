//! Pull-based Prometheus exporter for Modbus devices.
//!
//! Every request to the scrape endpoint triggers one device scrape through
//! the engine and serves the decoded registers as a fresh exposition
//! document:
//!
//! ```text
//! GET /scrape?module=<module>&target=<host:port|/dev/tty...>&sub_target=<unit id>
//! ```
//!
//! `/metrics` exposes telemetry about the exporter itself and `/health`
//! answers liveness probes.

pub mod config;
pub mod exposition;
pub mod http;
pub mod telemetry;
