//! Error types for iapflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for iapflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for iapflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The transport could not be opened.
    #[error("Failed to open port {port}: {source}")]
    TransportOpen {
        /// Port name/path.
        port: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No reply to the handshake frame.
    #[error("Handshake timed out: no reply from bootloader")]
    HandshakeTimeout,

    /// The device answered the handshake with a different command.
    #[error("Handshake rejected: device replied with command 0x{command:02X}")]
    HandshakeRejected {
        /// Command byte of the reply.
        command: u8,
    },

    /// No valid frame arrived while waiting for a reply.
    #[error("Timed out waiting for reply to command 0x{command:02X} (seq {sequence})")]
    FrameTimeout {
        /// Command awaiting a reply.
        command: u8,
        /// Sequence awaiting a reply.
        sequence: u8,
    },

    /// A valid frame arrived that is not the expected reply.
    #[error("Unexpected frame: cmd=0x{command:02X}, seq={sequence}")]
    UnexpectedFrame {
        /// Command byte of the received frame.
        command: u8,
        /// Sequence of the received frame.
        sequence: u8,
    },

    /// ACK payload shorter than status + echoed command + echoed sequence.
    #[error("Malformed ACK: payload length {len}")]
    MalformedAck {
        /// Received payload length.
        len: usize,
    },

    /// ACK echoes a different command or sequence.
    #[error(
        "ACK echo mismatch: expected cmd=0x{expected_command:02X} seq={expected_sequence}, \
         got cmd=0x{command:02X} seq={sequence}"
    )]
    AckMismatch {
        /// Command we were waiting for.
        expected_command: u8,
        /// Sequence we were waiting for.
        expected_sequence: u8,
        /// Echoed command.
        command: u8,
        /// Echoed sequence.
        sequence: u8,
    },

    /// Device reported a non-OK status.
    #[error("Device returned status {status} for cmd=0x{command:02X} seq={sequence}")]
    AckStatus {
        /// Acknowledged command.
        command: u8,
        /// Acknowledged sequence.
        sequence: u8,
        /// Reported status.
        status: crate::protocol::AckStatus,
    },

    /// A frame was sent the maximum number of times without a valid ACK.
    #[error("Gave up on cmd=0x{command:02X} seq={sequence} after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Command of the abandoned frame.
        command: u8,
        /// Sequence of the abandoned frame.
        sequence: u8,
        /// Number of attempts made.
        attempts: u32,
        /// Failure of the last attempt.
        #[source]
        source: Box<Error>,
    },

    /// The firmware image has no bytes.
    #[error("Firmware image is empty")]
    EmptyImage,

    /// The firmware image could not be read.
    #[error("Failed to read firmware image {}: {source}", path.display())]
    ImageRead {
        /// Image path.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// Image size does not fit the 32-bit size field.
    #[error("Firmware image too large: {len} bytes")]
    ImageTooLarge {
        /// Image length.
        len: usize,
    },

    /// Frame payload exceeds the 16-bit length field.
    #[error("Frame payload too large: {len} bytes (max 65535)")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
    },

    /// Frame checksum mismatch.
    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    FrameCrc {
        /// CRC carried by the frame.
        expected: u32,
        /// CRC computed over the received bytes.
        actual: u32,
    },

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The embedding application requested cancellation.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this error means "the expected reply did not arrive".
    ///
    /// These are the failures a retrying step absorbs before giving up.
    pub fn is_ack_failure(&self) -> bool {
        matches!(
            self,
            Self::FrameTimeout { .. }
                | Self::UnexpectedFrame { .. }
                | Self::MalformedAck { .. }
                | Self::AckMismatch { .. }
                | Self::AckStatus { .. }
        )
    }

    /// Whether this error comes from the transport rather than the protocol.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::TransportOpen { .. } | Self::Io(_) => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}
