//! IAP bootloader frame codec.
//!
//! ## Frame Format
//!
//! ```text
//! +------+------+-----+-----+-------+-------+-------------+---------+
//! | 0x55 | 0xAA | CMD | SEQ | LEN_L | LEN_H |   PAYLOAD   |  CRC32  |
//! +------+------+-----+-----+-------+-------+-------------+---------+
//! |  1   |  1   |  1  |  1  |   1   |   1   |  LEN bytes  | 4 (LE)  |
//! +------+------+-----+-----+-------+-------+-------------+---------+
//! ```
//!
//! The CRC covers `CMD ∥ SEQ ∥ LEN_L ∥ LEN_H ∥ PAYLOAD`; the two marker
//! bytes are excluded.

use {
    crate::{
        error::{Error, Result},
        protocol::crc::Crc32,
    },
    byteorder::{LittleEndian, WriteBytesExt},
    std::fmt,
};

/// Two-byte synchronization marker that starts every frame.
pub const MARKER: [u8; 2] = [0x55, 0xAA];

/// Length of the CRC-covered header (`CMD`, `SEQ`, `LEN_L`, `LEN_H`).
pub const HEADER_LEN: usize = 4;

/// Length of the trailing checksum.
pub const CRC_LEN: usize = 4;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Sequence number reserved for the handshake request.
pub const HANDSHAKE_SEQUENCE: u8 = 0;

/// Identifying payload sent with the handshake request.
pub const HANDSHAKE_PAYLOAD: &[u8] = b"PC_HANDSHAKE";

/// Protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Command {
    /// Establish the session (0x01).
    Handshake = 0x01,
    /// Declare image size, CRC and version (0x02).
    StartUpdate = 0x02,
    /// One chunk of image data (0x03).
    Data = 0x03,
    /// Finish the transfer (0x04).
    EndUpdate = 0x04,
    /// Read the version recorded by the bootloader (0x05).
    QueryVersion = 0x05,
    /// Acknowledgment from the device (0x06).
    Ack = 0x06,
}

impl Command {
    /// Wire name of the command.
    pub fn name(self) -> &'static str {
        match self {
            Self::Handshake => "HANDSHAKE",
            Self::StartUpdate => "START_UPDATE",
            Self::Data => "DATA",
            Self::EndUpdate => "END_UPDATE",
            Self::QueryVersion => "QUERY_VERSION",
            Self::Ack => "ACK",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Handshake),
            0x02 => Ok(Self::StartUpdate),
            0x03 => Ok(Self::Data),
            0x04 => Ok(Self::EndUpdate),
            0x05 => Ok(Self::QueryVersion),
            0x06 => Ok(Self::Ack),
            other => Err(other),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status code carried in byte 0 of an ACK payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AckStatus {
    /// Request accepted (0x00).
    Ok,
    /// Device saw a frame CRC error (0x01).
    FrameCrcError,
    /// Invalid request parameters (0x02).
    ParamError,
    /// Flash erase/program failed (0x03).
    FlashError,
    /// Request not valid in the device's current state (0x04).
    StateError,
    /// Status code this host does not know.
    Unknown(u8),
}

impl AckStatus {
    /// Raw status byte.
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0x00,
            Self::FrameCrcError => 0x01,
            Self::ParamError => 0x02,
            Self::FlashError => 0x03,
            Self::StateError => 0x04,
            Self::Unknown(code) => code,
        }
    }
}

impl From<u8> for AckStatus {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::FrameCrcError,
            0x02 => Self::ParamError,
            0x03 => Self::FlashError,
            0x04 => Self::StateError,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::FrameCrcError => "FRAME_CRC_ERROR",
            Self::ParamError => "PARAM_ERROR",
            Self::FlashError => "FLASH_ERROR",
            Self::StateError => "STATE_ERROR",
            Self::Unknown(_) => "UNKNOWN",
        };
        write!(f, "{name} (0x{:02X})", self.code())
    }
}

/// One decoded (or to-be-encoded) protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw command byte. Kept raw so unknown device opcodes still surface.
    pub command: u8,
    /// Sequence number.
    pub sequence: u8,
    /// Command-specific payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a frame for a known command.
    pub fn new(command: Command, sequence: u8, payload: Vec<u8>) -> Self {
        Self {
            command: command as u8,
            sequence,
            payload,
        }
    }

    /// Handshake request (always sequence 0).
    pub fn handshake(ident: &[u8]) -> Self {
        Self::new(Command::Handshake, HANDSHAKE_SEQUENCE, ident.to_vec())
    }

    /// START_UPDATE request: `size ∥ crc ∥ version`, little-endian.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn start_update(sequence: u8, image_size: u32, image_crc: u32, version: u32) -> Self {
        let mut payload = Vec::with_capacity(12);
        payload
            .write_u32::<LittleEndian>(image_size)
            .unwrap();
        payload
            .write_u32::<LittleEndian>(image_crc)
            .unwrap();
        payload
            .write_u32::<LittleEndian>(version)
            .unwrap();
        Self::new(Command::StartUpdate, sequence, payload)
    }

    /// DATA request: `offset ∥ chunk`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn data(sequence: u8, offset: u32, chunk: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(4 + chunk.len());
        payload
            .write_u32::<LittleEndian>(offset)
            .unwrap();
        payload.extend_from_slice(chunk);
        Self::new(Command::Data, sequence, payload)
    }

    /// END_UPDATE request with its one-byte placeholder payload.
    pub fn end_update(sequence: u8) -> Self {
        Self::new(Command::EndUpdate, sequence, vec![0x00])
    }

    /// QUERY_VERSION request.
    pub fn query_version(sequence: u8) -> Self {
        Self::new(Command::QueryVersion, sequence, Vec::new())
    }

    /// ACK frame as the device sends it.
    pub fn ack(status: AckStatus, command: u8, sequence: u8) -> Self {
        Self::new(Command::Ack, sequence, vec![status.code(), command, sequence])
    }

    /// The command, if it is one this host knows.
    pub fn kind(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    /// Check the command byte.
    pub fn is(&self, command: Command) -> bool {
        self.command == command as u8
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(self.command, self.sequence, &self.payload)
    }
}

/// Encode `(command, sequence, payload)` into a complete wire frame.
pub fn encode(command: u8, sequence: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge {
        len: payload.len(),
    })?;
    let [len_l, len_h] = len.to_le_bytes();
    let header = [command, sequence, len_l, len_h];

    let mut buf = Vec::with_capacity(MARKER.len() + HEADER_LEN + payload.len() + CRC_LEN);
    buf.extend_from_slice(&MARKER);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&checksum(&header, payload).to_le_bytes());
    Ok(buf)
}

/// Validate a marker-stripped frame body and return the frame it carries.
///
/// `body` is `CMD ∥ SEQ ∥ LEN_L ∥ LEN_H ∥ PAYLOAD ∥ CRC32`.
pub fn decode_body(body: &[u8]) -> Result<Frame> {
    if body.len() < HEADER_LEN + CRC_LEN {
        return Err(Error::Protocol(format!(
            "frame body too short: {} bytes",
            body.len()
        )));
    }

    let len = usize::from(u16::from_le_bytes([body[2], body[3]]));
    if body.len() != HEADER_LEN + len + CRC_LEN {
        return Err(Error::Protocol(format!(
            "frame body is {} bytes, header declares {len} payload bytes",
            body.len()
        )));
    }

    let (header, rest) = body.split_at(HEADER_LEN);
    let (payload, crc_bytes) = rest.split_at(len);
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual = checksum(header, payload);
    if expected != actual {
        return Err(Error::FrameCrc { expected, actual });
    }

    Ok(Frame {
        command: header[0],
        sequence: header[1],
        payload: payload.to_vec(),
    })
}

fn checksum(header: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = Crc32::new();
    hasher.update(header);
    hasher.update(payload);
    hasher.finalize()
}

/// Interpreted ACK payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    /// Device status.
    pub status: AckStatus,
    /// Echoed command byte.
    pub command: u8,
    /// Echoed sequence.
    pub sequence: u8,
}

impl Ack {
    /// Interpret a frame as an ACK without checking what it acknowledges.
    pub fn parse(frame: &Frame) -> Result<Self> {
        if !frame.is(Command::Ack) {
            return Err(Error::UnexpectedFrame {
                command: frame.command,
                sequence: frame.sequence,
            });
        }
        if frame.payload.len() < 3 {
            return Err(Error::MalformedAck {
                len: frame.payload.len(),
            });
        }
        Ok(Self {
            status: AckStatus::from(frame.payload[0]),
            command: frame.payload[1],
            sequence: frame.payload[2],
        })
    }

    /// Accept `frame` only if it is an OK ACK for `(command, sequence)`.
    pub fn expect(frame: &Frame, command: Command, sequence: u8) -> Result<Self> {
        let ack = Self::parse(frame)?;
        if ack.command != command as u8 || ack.sequence != sequence {
            return Err(Error::AckMismatch {
                expected_command: command as u8,
                expected_sequence: sequence,
                command: ack.command,
                sequence: ack.sequence,
            });
        }
        if ack.status != AckStatus::Ok {
            return Err(Error::AckStatus {
                command: ack.command,
                sequence: ack.sequence,
                status: ack.status,
            });
        }
        Ok(ack)
    }
}
