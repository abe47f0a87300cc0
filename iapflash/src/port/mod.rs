//! Port abstraction for the serial byte stream the bootloader listens on.
//!
//! The update engine never talks to `serialport` directly. It drives a
//! [`Port`], which keeps the protocol layer I/O-agnostic and lets tests swap
//! in a scripted in-memory device.
//!
//! ```text
//! +------------------+
//! |  Update session  |
//! +--------+---------+
//!          |
//! +--------+---------+
//! |  Link (frames)   |
//! +--------+---------+
//!          |
//! +--------+---------+
//! |   Port trait     |
//! +--------+---------+
//!          |
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use iapflash::port::Port;
//!
//! fn drain<P: Port>(port: &mut P) -> iapflash::Result<Vec<u8>> {
//!     let mut bytes = Vec::new();
//!     while let Some(b) = port.read_byte(Duration::from_millis(50))? {
//!         bytes.push(b);
//!     }
//!     Ok(bytes)
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use crate::error::Result;

/// Serial port configuration.
///
/// Framing is always 8 data bits, no parity, one stop bit, no flow control.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115_200,
            timeout: Duration::from_millis(100),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Duplex byte stream to the bootloader.
///
/// Implementations must deliver bytes in order. They may lose bytes; the
/// frame layer recovers from that.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Set the baud rate.
    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()>;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    /// Closing twice is not an error.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Read one byte, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Timeouts, zero-length
    /// reads, `WouldBlock` and `Interrupted` all count as "no byte yet"; any
    /// other I/O error is returned.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        if self.timeout() != timeout {
            self.set_timeout(timeout)?;
        }

        let mut buf = [0u8; 1];
        match self.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            },
            Err(e) => Err(e.into()),
        }
    }
}

impl<P: Port + ?Sized> Port for Box<P> {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        (**self).set_baud_rate(baud_rate)
    }

    fn baud_rate(&self) -> u32 {
        (**self).baud_rate()
    }

    fn clear_buffers(&mut self) -> Result<()> {
        (**self).clear_buffers()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        (**self).read_byte(timeout)
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;
