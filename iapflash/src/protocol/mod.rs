//! IAP bootloader wire protocol.
//!
//! Layers, bottom-up: [`crc`] checksums, [`frame`] encodes and validates
//! single frames, [`sync`] finds frames in a raw byte stream, and [`link`]
//! couples a port with a synchronizer to exchange whole frames under a
//! deadline.

pub mod crc;
pub mod frame;
pub mod link;
pub mod sync;

pub use {
    crc::{Crc32, crc32},
    frame::{Ack, AckStatus, Command, Frame},
    link::Link,
    sync::{FrameSync, SyncState},
};
