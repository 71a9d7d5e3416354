//! Metric and register definitions shared by the whole scrape pipeline.
//!
//! Definitions are loaded once from configuration and stay read-only for the
//! lifetime of the process; everything derived from them (plans, samples) is
//! rebuilt on every scrape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ScrapeError;

/// The four addressable Modbus register classes, named after their protocol
/// read operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusFunction {
    /// Discrete output coils (function code 1).
    Coil,
    /// Discrete input contacts (function code 2).
    Discrete,
    /// Holding registers (function code 3).
    Holding,
    /// Input registers (function code 4).
    Input,
}

impl ModbusFunction {
    /// Map a composite-address function digit to a register class.
    pub fn from_digit(digit: u32) -> Option<Self> {
        match digit {
            1 => Some(ModbusFunction::Coil),
            2 => Some(ModbusFunction::Discrete),
            3 => Some(ModbusFunction::Holding),
            4 => Some(ModbusFunction::Input),
            _ => None,
        }
    }

    /// The protocol-level function digit.
    pub fn digit(&self) -> u32 {
        match self {
            ModbusFunction::Coil => 1,
            ModbusFunction::Discrete => 2,
            ModbusFunction::Holding => 3,
            ModbusFunction::Input => 4,
        }
    }

    /// Return the string name for this register class.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModbusFunction::Coil => "coil",
            ModbusFunction::Discrete => "discrete",
            ModbusFunction::Holding => "holding",
            ModbusFunction::Input => "input",
        }
    }
}

impl std::fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Composite register address.
///
/// The leading digit selects the register class, the remainder is the 0-based
/// register offset within that class: `300007` is holding register 7,
/// `100002` is coil 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterAddress(pub u32);

impl RegisterAddress {
    /// Compose an address from a register class and an offset.
    pub fn from_parts(function: ModbusFunction, offset: u16) -> Self {
        RegisterAddress(function.digit() * 100_000 + u32::from(offset))
    }

    /// Split the address into its register class and offset.
    pub fn decode(&self) -> Result<(ModbusFunction, u16), ScrapeError> {
        let function = ModbusFunction::from_digit(self.0 / 100_000).ok_or_else(|| {
            ScrapeError::InvalidAddress {
                address: self.0,
                reason: "function digit must be 1, 2, 3 or 4".to_string(),
            }
        })?;
        let offset = self.0 % 100_000;
        if offset > u32::from(u16::MAX) {
            return Err(ScrapeError::InvalidAddress {
                address: self.0,
                reason: "register offset exceeds 65535".to_string(),
            });
        }
        Ok((function, offset as u16))
    }
}

impl std::fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the raw bytes of one or more registers are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Single bit of a 16-bit register, selected by `bit_offset`.
    Bool,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    /// Declared for completeness; decoding it is not implemented.
    Float16,
    Float32,
    Float64,
}

impl DataType {
    /// Number of 16-bit registers a value of this type occupies.
    pub fn register_span(&self) -> u16 {
        match self {
            DataType::Bool | DataType::Int16 | DataType::Uint16 | DataType::Float16 => 1,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 => 2,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Float16 => "float16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Byte and word ordering used to reassemble a multi-register value.
///
/// `big` is the wire default. `mixed` keeps the register order but swaps the
/// two bytes inside each register; `yolo` reverses the register order while
/// keeping the bytes inside each register, a layout some vendors ship.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    #[default]
    Big,
    Little,
    Mixed,
    Yolo,
}

/// Prometheus metric kind of an exposed value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// A definition is rejected at load time when its fields contradict each
/// other.
#[derive(Debug, Error)]
#[error("invalid metric definition '{name}': {reason}")]
pub struct DefinitionError {
    pub name: String,
    pub reason: String,
}

/// How to construct one metric from one or more Modbus registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    /// Metric name as exposed to the scraper.
    pub name: String,

    /// Help text attached to the exposed metric.
    #[serde(default)]
    pub help: String,

    /// Extra labels attached to every sample of this metric.
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Composite register address.
    pub address: RegisterAddress,

    pub data_type: DataType,

    #[serde(default)]
    pub endianness: Endianness,

    /// Bit to test within the register. Only valid for the bool data type;
    /// the register's two bytes are read in network order and the value is
    /// `register & (1 << bit_offset) > 0`.
    #[serde(default)]
    pub bit_offset: Option<u8>,

    /// Multiplied into the decoded value after type interpretation.
    #[serde(default)]
    pub factor: Option<f64>,

    #[serde(default)]
    pub kind: MetricKind,

    /// Always read this register on its own, never folded into a batched
    /// interval. Some devices misbehave when an address is included in a
    /// multi-register read.
    #[serde(default)]
    pub no_batch: bool,
}

impl MetricDef {
    /// Semantically validate the definition.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let fail = |reason: String| {
            Err(DefinitionError {
                name: self.name.clone(),
                reason,
            })
        };

        if self.name.is_empty() {
            return fail("name cannot be empty".to_string());
        }
        if !valid_metric_name(&self.name) {
            return fail(format!("'{}' is not a valid metric name", self.name));
        }
        if let Err(e) = self.address.decode() {
            return fail(e.to_string());
        }
        if self.data_type == DataType::Bool {
            if let Some(bit) = self.bit_offset {
                if bit > 15 {
                    return fail("bit offset must be within the 16-bit register".to_string());
                }
            } else {
                return fail("bool data type requires a bit offset".to_string());
            }
            if self.factor.is_some() {
                return fail("factor cannot be applied to the bool data type".to_string());
            }
        } else if self.bit_offset.is_some() {
            return fail("bit offset is only valid for the bool data type".to_string());
        }
        if self.factor == Some(0.0) {
            return fail("factor must be non-zero".to_string());
        }

        Ok(())
    }
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// A sub-range of one register class that a batched read must never bridge.
///
/// Some devices trap or return garbage when a multi-register read touches
/// certain address gaps; declaring the gap keeps the planner from spanning
/// it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BlockedRange {
    pub start: RegisterAddress,
    pub end: RegisterAddress,
}

impl BlockedRange {
    /// Resolve both endpoints, requiring a single register class and an
    /// ordered pair.
    pub fn resolve(&self) -> Result<(ModbusFunction, u16, u16), ScrapeError> {
        let (function, start) = self.start.decode()?;
        let (end_function, end) = self.end.decode()?;
        if function != end_function {
            return Err(ScrapeError::InvalidAddress {
                address: self.end.0,
                reason: format!(
                    "blocked range must stay within one register class, got {} and {}",
                    function, end_function
                ),
            });
        }
        if start > end {
            return Err(ScrapeError::InvalidAddress {
                address: self.start.0,
                reason: "blocked range start is beyond its end".to_string(),
            });
        }
        Ok((function, start, end))
    }
}
