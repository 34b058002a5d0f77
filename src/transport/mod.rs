//! Byte-stream transport abstraction over the UART.

mod mock;
mod serial;

pub use mock::{MockTransport, TestPort};
pub use serial::SerialTransport;

use crate::error::Result;

/// Duplex byte stream with modem pin control.
///
/// `read` must return `Ok(0)` on a read timeout so the bus reader thread can
/// poll its shutdown flag; only real I/O failures return an error.
pub trait Transport: Send {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;
    fn write(&mut self, data: &[u8]) -> Result<usize>;
    fn flush(&mut self) -> Result<()>;

    /// Drive the DTR pin. A no-op for transports without modem pins.
    fn set_dtr(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    /// Drive the RTS pin. A no-op for transports without modem pins.
    fn set_rts(&mut self, _level: bool) -> Result<()> {
        Ok(())
    }

    /// Write the whole buffer, retrying partial writes.
    fn write_all(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let written = self.write(data)?;
            data = &data[written..];
        }
        Ok(())
    }
}
