use thiserror::Error;

use crate::def::DataType;

/// Errors produced while planning, executing or decoding a scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The composite address has no valid function digit or its offset does
    /// not fit the 16-bit register space.
    #[error("invalid register address {address}: {reason}")]
    InvalidAddress { address: u32, reason: String },

    /// The transport handed back fewer bytes than the data type occupies.
    #[error("expected {expected} bytes for {data_type} but got {actual}")]
    InsufficientData {
        data_type: DataType,
        expected: usize,
        actual: usize,
    },

    /// A boolean definition without a bit offset cannot be decoded.
    #[error("metric '{name}' has boolean data type but no bit offset")]
    MissingBitOffset { name: String },

    /// The data type is declared but its decoding is not implemented.
    #[error("decoding {0} values is not implemented")]
    UnimplementedDataType(DataType),

    /// Opening the connection to the target failed.
    #[error("unable to connect with target '{target}': {reason}")]
    Connect { target: String, reason: String },

    /// The target did not answer within the configured timeout.
    #[error("i/o timeout waiting for target '{target}'")]
    Timeout { target: String },

    /// The transport failed mid-conversation.
    #[error("transport error: {0}")]
    Io(String),
}

impl ScrapeError {
    /// Transport-class failures are the only ones worth retrying; decode and
    /// plan errors are deterministic for a given configuration.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ScrapeError::Connect { .. } | ScrapeError::Timeout { .. } | ScrapeError::Io(_)
        )
    }
}
