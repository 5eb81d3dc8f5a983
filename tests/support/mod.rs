//! `MockSerial`: an in-memory duplex line queue standing in for a real
//! serial device in integration tests, grounded in the teacher's
//! `tests/mock_hardware.rs` (swap the hardware behind a trait for a
//! deterministic double).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use gas_daq::error::AppResult;
use gas_daq::serial_transport::LineChannel;

#[derive(Clone, Default)]
pub struct MockSerial {
    pub inbound: Arc<Mutex<VecDeque<String>>>,
    pub written: Arc<Mutex<Vec<String>>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a line that the worker will receive on its next `read_line`.
    pub fn push_inbound(&self, line: impl Into<String>) {
        self.inbound.lock().unwrap().push_back(line.into());
    }

    pub fn written_lines(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }
}

impl LineChannel for MockSerial {
    fn write_line(&mut self, line: &str) -> AppResult<()> {
        self.written.lock().unwrap().push(line.to_string());
        Ok(())
    }

    fn read_line(&mut self) -> AppResult<Option<String>> {
        Ok(self.inbound.lock().unwrap().pop_front())
    }

    fn drain_input(&mut self) -> AppResult<()> {
        self.inbound.lock().unwrap().clear();
        Ok(())
    }

    fn reopen(&mut self) -> AppResult<()> {
        Ok(())
    }
}
