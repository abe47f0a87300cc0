//! # iapflash
//!
//! Host side of a serial IAP (in-application programming) firmware update
//! protocol for microcontroller bootloaders.
//!
//! This crate provides:
//!
//! - CRC-32 checksums for frames and whole images
//! - The `0x55 0xAA` framed wire format and a resynchronizing frame decoder
//! - The stop-and-wait update session (handshake, start, data, end) with
//!   per-frame retries
//! - A `Port` abstraction with a native `serialport` backend
//! - Serial port discovery for common USB-UART bridges
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use iapflash::{FirmwareImage, UpdateConfig, Updater};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("app.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let port = iapflash::NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!         let mut updater = Updater::new(port, UpdateConfig::default());
//!         let report = updater.update(&image, 0x0001_0001, &mut |event| println!("{event:?}"))?;
//!         println!("Device {} accepted {} bytes", report.device, report.image_size);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod update;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DetectedPort, DeviceKind, detect_ports},
    error::{Error, Result},
    image::FirmwareImage,
    port::{Port, SerialConfig},
    protocol::{Ack, AckStatus, Command, Frame, FrameSync, crc32},
    update::{
        LogKind, LogLine, SessionState, UpdateConfig, UpdateEvent, UpdateReport, Updater,
        query_version, run_update,
    },
};
