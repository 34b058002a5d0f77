//! Serial transport implementation

use super::Transport;
use crate::config::Config;
use crate::error::Result;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::thread;
use std::time::Duration;

/// Delay between the individual pin states of the connect sequence.
const PIN_STEP_DELAY: Duration = Duration::from_millis(100);

/// Serial transport for UART communication with the adapter
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port
    ///
    /// # Arguments
    /// * `path` - Serial port path (e.g., "/dev/ttyUSB0")
    /// * `baud_rate` - Baud rate (115200 for every known ZNP build)
    pub fn open(path: &str, baud_rate: u32, flow_control: FlowControl) -> Result<Self> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(flow_control)
            // Short timeout so the reader thread keeps polling its shutdown flag
            .timeout(Duration::from_millis(10))
            .open()?;

        log::info!("Opened serial port: {} at {} baud", path, baud_rate);

        Ok(SerialTransport { port })
    }

    /// Open the port and run the configured connect sequence.
    ///
    /// CC2531 sticks enter their serial bootloader unless the RTS/DTR pins
    /// are toggled in the right order, and some Z-Stack 3 builds lock up
    /// when other software probes them first; writing a run of bootloader
    /// skip bytes resets that state.
    pub fn connect(config: &Config) -> Result<Self> {
        let mut transport = Self::open(
            &config.port,
            config.baud_rate,
            config.flow_control.to_serialport(),
        )?;

        for (rts, dtr) in config
            .connect_rts_states
            .iter()
            .zip(&config.connect_dtr_states)
        {
            transport.set_rts(*rts)?;
            transport.set_dtr(*dtr)?;
            thread::sleep(PIN_STEP_DELAY);
        }

        if config.skip_bootloader {
            log::debug!("Writing bootloader skip bytes");
            let skip = [crate::commands::ubl::BOOTLOADER_FORCE_RUN; 256];
            transport.write_all(&skip)?;
            transport.flush()?;
        }

        Ok(transport)
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        Ok(self.port.write(data)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush()?;
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> Result<()> {
        log::debug!("Setting DTR={}", level);
        self.port.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn set_rts(&mut self, level: bool) -> Result<()> {
        log::debug!("Setting RTS={}", level);
        self.port.write_request_to_send(level)?;
        Ok(())
    }
}
