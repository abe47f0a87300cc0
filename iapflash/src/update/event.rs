//! Events reported while a session runs.

use std::fmt;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SessionState {
    /// Waiting for the bootloader to answer the handshake.
    Handshake,
    /// Negotiating image size, CRC and version.
    Start,
    /// Sending DATA frames.
    Transfer,
    /// Closing the transfer.
    End,
    /// Image accepted; the device verifies and reboots on its own.
    Done,
    /// Session aborted.
    Failed,
}

impl SessionState {
    /// `Done` or `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handshake => "HANDSHAKE",
            Self::Start => "START",
            Self::Transfer => "TRANSFER",
            Self::End => "END",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        })
    }
}

/// Category of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// A protocol step begins.
    Step,
    /// A step succeeded.
    Ok,
    /// A frame was sent.
    Send,
    /// A frame was acknowledged.
    Ack,
    /// A frame is being resent.
    Retry,
    /// The session failed.
    Error,
}

impl LogKind {
    /// Line prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Step => "[*]",
            Self::Ok | Self::Ack => "[OK ]",
            Self::Send => "[-->]",
            Self::Retry => "[!!]",
            Self::Error => "[ERR]",
        }
    }

    /// Level used when the line is mirrored to `log`.
    pub fn level(self) -> log::Level {
        match self {
            Self::Step | Self::Ok => log::Level::Info,
            Self::Send | Self::Ack => log::Level::Debug,
            Self::Retry => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }
}

/// Human-readable progress line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Category.
    pub kind: LogKind,
    /// Text without prefix.
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.prefix(), self.message)
    }
}

/// Event passed to the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// Log line.
    Log(LogLine),
    /// State transition.
    State(SessionState),
    /// Image bytes acknowledged so far.
    Progress {
        /// Bytes acknowledged.
        sent: usize,
        /// Image size.
        total: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_prefix_is_distinct() {
        let others = [
            LogKind::Step,
            LogKind::Ok,
            LogKind::Send,
            LogKind::Ack,
            LogKind::Retry,
        ];
        assert!(
            others
                .iter()
                .all(|k| k.prefix() != LogKind::Error.prefix())
        );
    }

    #[test]
    fn test_log_line_display() {
        let line = LogLine {
            kind: LogKind::Ok,
            message: "Handshake".into(),
        };
        assert_eq!(line.to_string(), "[OK ] Handshake");
    }
}
