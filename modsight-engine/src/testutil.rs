//! In-memory Modbus client for engine tests.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::def::ModbusFunction;
use crate::error::ScrapeError;
use crate::transport::ModbusClient;

/// Client serving 16-bit words from an in-memory map, recording every read.
///
/// Unset registers read as zero, like most bench devices. Coil and discrete
/// reads follow the transport normalization: one word per point.
#[derive(Default)]
pub(crate) struct MockClient {
    words: HashMap<(ModbusFunction, u16), u16>,
    reads: Vec<(ModbusFunction, u16, u16)>,
    fail_on: Option<ModbusFunction>,
    truncate_to: Option<usize>,
}

impl MockClient {
    pub fn set(&mut self, function: ModbusFunction, offset: u16, value: u16) {
        self.words.insert((function, offset), value);
    }

    /// Fail every read against one register class.
    pub fn fail_on(&mut self, function: ModbusFunction) {
        self.fail_on = Some(function);
    }

    /// Cap every response at `registers` registers, simulating a device
    /// answering short.
    pub fn truncate_responses(&mut self, registers: usize) {
        self.truncate_to = Some(registers);
    }

    pub fn reads(&self) -> Vec<(ModbusFunction, u16, u16)> {
        self.reads.clone()
    }

    fn serve(
        &mut self,
        function: ModbusFunction,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        self.reads.push((function, offset, count));

        if self.fail_on == Some(function) {
            return Err(ScrapeError::Io("injected read failure".to_string()));
        }

        let mut registers = usize::from(count);
        if let Some(cap) = self.truncate_to {
            registers = registers.min(cap);
        }

        let mut bytes = Vec::with_capacity(registers * 2);
        for i in 0..registers as u16 {
            let word = self
                .words
                .get(&(function, offset + i))
                .copied()
                .unwrap_or_default();
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ModbusClient for MockClient {
    async fn read_coils(&mut self, offset: u16, count: u16) -> Result<Vec<u8>, ScrapeError> {
        self.serve(ModbusFunction::Coil, offset, count)
    }

    async fn read_discrete_inputs(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        self.serve(ModbusFunction::Discrete, offset, count)
    }

    async fn read_holding_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        self.serve(ModbusFunction::Holding, offset, count)
    }

    async fn read_input_registers(
        &mut self,
        offset: u16,
        count: u16,
    ) -> Result<Vec<u8>, ScrapeError> {
        self.serve(ModbusFunction::Input, offset, count)
    }
}
