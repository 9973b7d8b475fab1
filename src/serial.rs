//! Serial port abstraction.
//!
//! A trait boundary over a real serial link or an in-memory double: both a real and a dummy
//! backend share one interface, selected by a CLI flag.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Minimal byte-stream interface the framer and routine scheduler need.
pub trait SerialPort: Send {
    fn read_byte(&mut self) -> Result<Option<u8>>;
    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>>;
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
    /// Number of bytes currently waiting in the driver's receive buffer.
    fn bytes_waiting(&mut self) -> Result<u32>;
}

/// A real serial port backed by the `serialport` crate.
pub struct RealSerialPort {
    inner: Box<dyn serialport::SerialPort>,
}

impl RealSerialPort {
    pub fn open(port_name: &str, baudrate: u32, read_timeout: Duration) -> Result<Self> {
        let inner = serialport::new(port_name, baudrate)
            .timeout(read_timeout)
            .open()
            .with_context(|| format!("failed to open serial port {port_name:?}"))?;
        Ok(Self { inner })
    }

    pub fn set_buffer_sizes(&mut self, rx_size: u32, tx_size: u32) -> Result<()> {
        // Buffer sizing is only meaningfully configurable on Windows; elsewhere this is a
        // best-effort no-op.
        if cfg!(target_os = "windows") {
            self.inner
                .set_buffer_size(serialport::ClearBuffer::All)
                .ok();
        }
        let _ = (rx_size, tx_size);
        Ok(())
    }
}

impl SerialPort for RealSerialPort {
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.inner.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(ref err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(err) => Err(err).context("serial read failed"),
        }
    }

    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .context("serial read_exact failed")?;
        Ok(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).context("serial write failed")?;
        Ok(())
    }

    fn bytes_waiting(&mut self) -> Result<u32> {
        self.inner
            .bytes_to_read()
            .context("failed to query serial rx buffer fill level")
    }
}

/// An in-memory serial port double for tests and `--use-dummy-serial-port`: bytes written to
/// the "wire" by a test harness are read back out by the framer, and writes from the gateway
/// are captured for inspection.
#[derive(Clone, Default)]
pub struct DummySerialPort {
    inbound: Arc<Mutex<VecDeque<u8>>>,
    outbound: Arc<Mutex<Vec<u8>>>,
}

impl DummySerialPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes onto the simulated wire for the framer to read.
    pub fn push_inbound(&self, bytes: &[u8]) {
        self.inbound.lock().unwrap().extend(bytes.iter().copied());
    }

    /// Bytes written by the gateway (commands sent to sensors), for test assertions.
    pub fn written(&self) -> Vec<u8> {
        self.outbound.lock().unwrap().clone()
    }
}

impl SerialPort for DummySerialPort {
    fn read_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.inbound.lock().unwrap().pop_front())
    }

    fn read_exact_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut inbound = self.inbound.lock().unwrap();
        if inbound.len() < len {
            anyhow::bail!("dummy serial port starved: wanted {len} bytes, have {}", inbound.len());
        }
        Ok(inbound.drain(0..len).collect())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.outbound.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    fn bytes_waiting(&mut self) -> Result<u32> {
        Ok(self.inbound.lock().unwrap().len() as u32)
    }
}
