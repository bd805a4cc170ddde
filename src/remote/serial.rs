//! Line-oriented command execution over a serial port.
//!
//! Each command is written to the line as-is, then lines are read back
//! until a non-empty one arrives; that line is the command's result.

use crate::config::SerialParams;
use crate::error::{Error, Result};
use crate::logging::Logger;
use crate::remote::connection::timeout_from_secs;
use crate::remote::stream::{trim_line_end, CommandStream, NullStream};
use log::{debug, warn};
use serialport::{DataBits, Parity, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Device name selecting the in-memory loopback line.
pub const LOOPBACK_DEVICE: &str = "loop";

/// Validated serial line settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baudrate: u32,
    pub parity: Parity,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub timeout: Duration,
}

impl LineSettings {
    /// Encodes the textual parameters; unsupported values are
    /// [`Error::Configuration`].
    pub fn from_params(params: &SerialParams) -> Result<Self> {
        let parity = match params.parity.as_str() {
            "none" => Parity::None,
            "odd" => Parity::Odd,
            "even" => Parity::Even,
            other => {
                return Err(Error::Configuration(format!(
                    "parity '{}' is not supported (expected none, odd or even)",
                    other
                )))
            }
        };

        let data_bits = match params.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(Error::Configuration(format!(
                    "{} data bits are not supported (expected 5 to 8)",
                    other
                )))
            }
        };

        // 1.5 stop bits program the same termios flag as 2.
        let stop_bits = if params.stop_bits == 1.0 {
            StopBits::One
        } else if params.stop_bits == 1.5 || params.stop_bits == 2.0 {
            StopBits::Two
        } else {
            return Err(Error::Configuration(format!(
                "{} stop bits are not supported (expected 1, 1.5 or 2)",
                params.stop_bits
            )));
        };

        Ok(Self {
            baudrate: params.baudrate,
            parity,
            data_bits,
            stop_bits,
            timeout: timeout_from_secs(params.timeout),
        })
    }
}

/// A byte stream a serial transport can talk over.
pub trait Line: Read + Write {}

impl<T: Read + Write> Line for T {}

/// An in-memory line that reads back whatever was written to it.
#[derive(Debug, Default)]
pub struct Loopback {
    buffer: VecDeque<u8>,
}

impl Read for Loopback {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(self.buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for Loopback {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serial transport for sending commands to a target console.
#[derive(Debug)]
pub struct SerialTransport {
    device: String,
    settings: LineSettings,
    log: Logger,
}

impl SerialTransport {
    /// Validates the line parameters; nothing is opened yet.
    pub fn new(params: &SerialParams, log: Logger) -> Result<Self> {
        let settings = LineSettings::from_params(params)?;
        if params.stop_bits == 1.5 {
            warn!(
                target: log.target(),
                "'{}': 1.5 stop bits are sent as 2", params.device
            );
        }

        Ok(Self {
            device: params.device.clone(),
            settings,
            log,
        })
    }

    /// Opens the line, sends each command and returns the result lines.
    ///
    /// The line is closed when this returns, whatever the outcome.
    pub fn send_commands(
        &self,
        commands: &[String],
        stream: Option<&mut dyn CommandStream>,
    ) -> Result<Vec<String>> {
        debug!(target: self.log.target(), "commands={:?}", commands);
        let mut line = self.open_line()?;
        self.send_over(line.as_mut(), commands, stream)
    }

    fn open_line(&self) -> Result<Box<dyn Line>> {
        if self.device == LOOPBACK_DEVICE {
            return Ok(Box::new(Loopback::default()));
        }

        let port = serialport::new(&self.device, self.settings.baudrate)
            .parity(self.settings.parity)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .timeout(self.settings.timeout)
            .open()
            .map_err(|e| {
                Error::Connection(format!("Failed to open serial port '{}': {}", self.device, e))
            })?;
        Ok(Box::new(port))
    }

    /// Runs the command/response exchange over an already open line.
    pub fn send_over(
        &self,
        line: &mut dyn Line,
        commands: &[String],
        stream: Option<&mut dyn CommandStream>,
    ) -> Result<Vec<String>> {
        let mut null = NullStream;
        let stream: &mut dyn CommandStream = match stream {
            Some(stream) => stream,
            None => &mut null,
        };

        let mut results = Vec::with_capacity(commands.len());

        for command in commands {
            debug!(target: self.log.target(), "executing command '{}'", command);
            stream.executing(command);

            line.write_all(command.as_bytes())
                .map_err(|e| self.io_error("write", e))?;

            let result = loop {
                line.flush().map_err(|e| self.io_error("flush", e))?;
                let received = read_line(line).map_err(|e| self.io_error("read", e))?;
                let received = trim_line_end(&received).to_string();
                stream.output_line(&received);
                if !received.is_empty() {
                    break received;
                }
            };

            stream.completed(&result);
            results.push(result);
        }

        Ok(results)
    }

    fn io_error(&self, what: &str, e: io::Error) -> Error {
        Error::Connection(format!("Serial {} on '{}' failed: {}", what, self.device, e))
    }
}

/// Reads up to and including `\n`, stopping early at EOF or timeout.
fn read_line(line: &mut dyn Line) -> io::Result<String> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match line.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                bytes.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(String::from_utf8_lossy(&bytes).to_string())
}
