//! Modbus scrape engine.
//!
//! Turns raw register contents of industrial devices into typed, scaled
//! samples:
//!
//! - [`def`] - Metric definitions, composite addresses, data types
//! - [`plan`] - Batching definitions into the fewest contiguous reads
//! - [`decode`] - Raw bytes to numeric values (endianness, scaling)
//! - [`scrape`] - Executing a plan against a client
//! - [`bus`] - Serializing access to single-consumer serial buses
//! - [`transport`] - The seam to the external tokio-modbus client
//! - [`error`] - Error types

pub mod bus;
pub mod decode;
pub mod def;
pub mod error;
pub mod plan;
pub mod scrape;
pub mod transport;

#[cfg(test)]
mod testutil;

// Re-export commonly used types at the crate root
pub use bus::{BusCoordinator, BusStats, RetryPolicy, ScrapeEngine, ScrapeJob};
pub use def::{
    BlockedRange, DataType, DefinitionError, Endianness, MetricDef, MetricKind, ModbusFunction,
    RegisterAddress,
};
pub use error::ScrapeError;
pub use scrape::{Sample, run_scrape};
pub use transport::{
    ClientFactory, ConnectSpec, ModbusClient, Parity, Protocol, SerialSettings, TokioModbusFactory,
};
