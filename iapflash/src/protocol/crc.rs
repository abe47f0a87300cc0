//! CRC-32/ISO-HDLC checksum.
//!
//! Reflected polynomial 0xEDB88320, initial value 0xFFFFFFFF, final XOR
//! 0xFFFFFFFF. This is the same CRC the bootloader uses for both frame
//! integrity and whole-image verification.

/// Incremental CRC-32 hasher.
pub use crc32fast::Hasher as Crc32;

/// Compute the CRC-32 of `data`.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
