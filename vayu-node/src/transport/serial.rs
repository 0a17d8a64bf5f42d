//! Serial port stream

use super::{ByteStream, POLL_INTERVAL};
use crate::error::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::Duration;

/// Serial port opened 8N1 without flow control
pub struct SerialStream {
    port: Box<dyn SerialPort>,
}

impl SerialStream {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path or name (e.g., "/dev/ttyACM0", "COM3")
    /// * `baud_rate` - Baud rate (e.g., 57600)
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(POLL_INTERVAL)
            .open()?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);
        Ok(Self { port })
    }
}

impl Read for SerialStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl ByteStream for SerialStream {
    fn try_clone_stream(&self) -> io::Result<Box<dyn ByteStream>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialStream { port }))
    }

    fn set_timeouts(&mut self, read: Option<Duration>, _write: Option<Duration>) -> io::Result<()> {
        // serialport applies one timeout to both directions
        self.port
            .set_timeout(read.unwrap_or(POLL_INTERVAL))
            .map_err(io::Error::from)
    }
}
