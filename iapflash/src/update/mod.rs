//! Firmware update sessions.
//!
//! ## Example
//!
//! ```rust,no_run
//! use iapflash::{FirmwareImage, NativePort, UpdateConfig, UpdateEvent, run_update};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("app.bin")?;
//!     let port = NativePort::open_simple("/dev/ttyUSB0", 115200)?;
//!
//!     let report = run_update(port, &image, 0x0001_0001, &UpdateConfig::default(), &mut |event| {
//!         if let UpdateEvent::Log(line) = event {
//!             eprintln!("{line}");
//!         }
//!     })?;
//!     println!("Sent {} bytes to {}", report.image_size, report.device);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod event;
pub mod session;

pub use {
    config::UpdateConfig,
    event::{LogKind, LogLine, SessionState, UpdateEvent},
    session::{UpdateReport, Updater, query_version, run_update},
};
