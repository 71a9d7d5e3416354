//! The seam to the external Modbus client.
//!
//! Everything below this boundary (ADU/PDU framing, CRC, TCP and serial
//! transports) belongs to tokio-modbus; the engine only sees four read
//! operations returning raw bytes.

use std::fmt::Debug;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_modbus::client::{Context, Reader};
use tokio_modbus::prelude::*;

use crate::def::ModbusFunction;
use crate::error::ScrapeError;

/// Wire protocol used to reach a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Modbus TCP; the TCP stack multiplexes, so no bus serialization.
    Tcp,
    /// Modbus RTU over a serial line, electrically single-consumer.
    Serial,
}

/// Serial line settings for RTU targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate (default: 19200)
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// Data bits: 5-8 (default: 8)
    #[serde(default = "default_databits")]
    pub databits: u8,

    /// Stop bits: 1 or 2 (default: 1)
    #[serde(default = "default_stopbits")]
    pub stopbits: u8,

    /// Parity (default: even)
    #[serde(default = "default_parity")]
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings {
            baudrate: default_baudrate(),
            databits: default_databits(),
            stopbits: default_stopbits(),
            parity: default_parity(),
        }
    }
}

fn default_baudrate() -> u32 {
    19200
}

fn default_databits() -> u8 {
    8
}

fn default_stopbits() -> u8 {
    1
}

fn default_parity() -> Parity {
    Parity::Even
}

/// Serial parity: "none", "even" or "odd".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

/// Everything needed to open a connection to one device.
#[derive(Debug, Clone)]
pub struct ConnectSpec {
    pub protocol: Protocol,
    /// `host:port` for TCP, serial device path for RTU.
    pub target: String,
    /// Modbus unit identifier of the device behind the target.
    pub unit_id: u8,
    /// Bounds connecting and every single read.
    pub timeout: Duration,
    pub serial: SerialSettings,
}

/// Read side of the Modbus data model, one named operation per register
/// class.
///
/// Register reads return two big-endian bytes per register. Coil and
/// discrete reads are normalized to one 16-bit word per point (0x0000 or
/// 0x0001) so the same byte-slicing rule applies to every class.
#[async_trait]
pub trait ModbusClient: Send {
    async fn read_coils(&mut self, offset: u16, count: u16) -> Result<Vec<u8>, ScrapeError>;

    async fn read_discrete_inputs(&mut self, offset: u16, count: u16)
    -> Result<Vec<u8>, ScrapeError>;

    async fn read_holding_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError>;

    async fn read_input_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError>;

    /// Dispatch to the operation matching the register class.
    async fn read(
        &mut self,
        function: ModbusFunction,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        match function {
            ModbusFunction::Coil => self.read_coils(offset, count).await,
            ModbusFunction::Discrete => self.read_discrete_inputs(offset, count).await,
            ModbusFunction::Holding => self.read_holding_registers(offset, count).await,
            ModbusFunction::Input => self.read_input_registers(offset, count).await,
        }
    }
}

/// Opens client connections; the seam the bus coordinator is tested
/// against.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, spec: &ConnectSpec) -> Result<Box<dyn ModbusClient>, ScrapeError>;
}

/// Production client backed by tokio-modbus.
pub struct TokioModbusClient {
    ctx: Context,
    target: String,
    timeout: Duration,
}

#[async_trait]
impl ModbusClient for TokioModbusClient {
    async fn read_coils(&mut self, offset: u16, count: u16) -> Result<Vec<u8>, ScrapeError> {
        let Self { ctx, target, timeout } = self;
        let bits = bounded(*timeout, target, ctx.read_coils(offset, count)).await?;
        Ok(bits_to_words(&bits, count))
    }

    async fn read_discrete_inputs(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        let Self { ctx, target, timeout } = self;
        let bits = bounded(*timeout, target, ctx.read_discrete_inputs(offset, count)).await?;
        Ok(bits_to_words(&bits, count))
    }

    async fn read_holding_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        let Self { ctx, target, timeout } = self;
        let registers = bounded(*timeout, target, ctx.read_holding_registers(offset, count)).await?;
        Ok(registers_to_bytes(&registers))
    }

    async fn read_input_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        let Self { ctx, target, timeout } = self;
        let registers = bounded(*timeout, target, ctx.read_input_registers(offset, count)).await?;
        Ok(registers_to_bytes(&registers))
    }
}

/// Await a tokio-modbus read under the per-device timeout, flattening its
/// nested transport/exception result.
async fn bounded<T, E>(
    timeout: Duration,
    target: &str,
    read: impl Future<Output = Result<Result<T, E>, tokio_modbus::Error>>,
) -> Result<T, ScrapeError>
where
    E: Debug,
{
    match tokio::time::timeout(timeout, read).await {
        Err(_) => Err(ScrapeError::Timeout {
            target: target.to_string(),
        }),
        Ok(Err(e)) => Err(ScrapeError::Io(e.to_string())),
        Ok(Ok(Err(exception))) => Err(ScrapeError::Io(format!("exception: {:?}", exception))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(registers.len() * 2);
    for register in registers {
        bytes.extend_from_slice(&register.to_be_bytes());
    }
    bytes
}

fn bits_to_words(bits: &[bool], count: u16) -> Vec<u8> {
    // the client may pad the response up to a byte boundary
    let mut bytes = Vec::with_capacity(usize::from(count) * 2);
    for bit in bits.iter().take(usize::from(count)) {
        bytes.extend_from_slice(&u16::from(*bit).to_be_bytes());
    }
    bytes
}

/// Factory producing tokio-modbus clients for TCP and RTU targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioModbusFactory;

#[async_trait]
impl ClientFactory for TokioModbusFactory {
    async fn connect(&self, spec: &ConnectSpec) -> Result<Box<dyn ModbusClient>, ScrapeError> {
        let slave = Slave(spec.unit_id);

        let ctx = match spec.protocol {
            Protocol::Tcp => {
                let addr: SocketAddr = spec.target.parse().map_err(|e| ScrapeError::Connect {
                    target: spec.target.clone(),
                    reason: format!("invalid address: {}", e),
                })?;

                tokio::time::timeout(spec.timeout, tcp::connect_slave(addr, slave))
                    .await
                    .map_err(|_| ScrapeError::Connect {
                        target: spec.target.clone(),
                        reason: "connection timeout".to_string(),
                    })?
                    .map_err(|e| ScrapeError::Connect {
                        target: spec.target.clone(),
                        reason: e.to_string(),
                    })?
            }
            Protocol::Serial => {
                let parity = match spec.serial.parity {
                    Parity::None => tokio_serial::Parity::None,
                    Parity::Even => tokio_serial::Parity::Even,
                    Parity::Odd => tokio_serial::Parity::Odd,
                };

                let stop_bits = match spec.serial.stopbits {
                    2 => tokio_serial::StopBits::Two,
                    _ => tokio_serial::StopBits::One,
                };

                let data_bits = match spec.serial.databits {
                    5 => tokio_serial::DataBits::Five,
                    6 => tokio_serial::DataBits::Six,
                    7 => tokio_serial::DataBits::Seven,
                    _ => tokio_serial::DataBits::Eight,
                };

                let builder = tokio_serial::new(&spec.target, spec.serial.baudrate)
                    .parity(parity)
                    .stop_bits(stop_bits)
                    .data_bits(data_bits);

                let serial =
                    tokio_serial::SerialStream::open(&builder).map_err(|e| ScrapeError::Connect {
                        target: spec.target.clone(),
                        reason: format!("serial open failed: {}", e),
                    })?;

                rtu::attach_slave(serial, slave)
            }
        };

        Ok(Box::new(TokioModbusClient {
            ctx,
            target: spec.target.clone(),
            timeout: spec.timeout,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_become_big_endian_bytes() {
        assert_eq!(
            registers_to_bytes(&[0x0102, 0xfffe]),
            vec![0x01, 0x02, 0xff, 0xfe]
        );
        assert!(registers_to_bytes(&[]).is_empty());
    }

    #[test]
    fn bits_become_one_word_each() {
        assert_eq!(
            bits_to_words(&[true, false, true], 3),
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x01]
        );
    }

    #[test]
    fn padded_bits_are_truncated_to_count() {
        // 8-bit padded response for a 2-coil request
        let bits = [true, true, false, false, false, false, false, false];
        assert_eq!(bits_to_words(&bits, 2), vec![0x00, 0x01, 0x00, 0x01]);
    }
}
