//! Update session parameters.

use {
    crate::{
        error::{Error, Result},
        protocol::{
            frame::{HANDSHAKE_PAYLOAD, MAX_PAYLOAD_LEN},
            link::DEFAULT_POLL_INTERVAL,
        },
    },
    std::time::Duration,
};

/// Default DATA chunk size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Largest chunk that still fits a DATA payload after the 4-byte offset.
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_LEN - 4;

/// Default wait for an ACK.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default wait for the handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default attempts per DATA/END frame.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default START_UPDATE attempts.
pub const DEFAULT_START_ATTEMPTS: u32 = 1;

/// Default delay between opening the port and the handshake.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(500);

/// Update session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Image bytes per DATA frame.
    pub chunk_size: usize,
    /// Wait for each ACK.
    pub ack_timeout: Duration,
    /// Wait for the handshake reply. The handshake is never retried.
    pub handshake_timeout: Duration,
    /// Attempts per DATA and END_UPDATE frame, first send included.
    pub max_retries: u32,
    /// Attempts for START_UPDATE, first send included.
    pub start_attempts: u32,
    /// Per-byte read slice.
    pub poll_interval: Duration,
    /// Delay before the handshake; input is flushed afterwards.
    pub settle_time: Duration,
    /// Identifying payload of the handshake request.
    pub handshake_payload: Vec<u8>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            start_attempts: DEFAULT_START_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            settle_time: DEFAULT_SETTLE_TIME,
            handshake_payload: HANDSHAKE_PAYLOAD.to_vec(),
        }
    }
}

impl UpdateConfig {
    /// Set the DATA chunk size.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the ACK timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set attempts per DATA/END frame.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set START_UPDATE attempts.
    #[must_use]
    pub fn with_start_attempts(mut self, attempts: u32) -> Self {
        self.start_attempts = attempts;
        self
    }

    /// Set the per-byte read slice.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the settle delay.
    #[must_use]
    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// Set the handshake payload.
    #[must_use]
    pub fn with_handshake_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.handshake_payload = payload.into();
        self
    }

    /// Check that every parameter is usable.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::Config(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max retries must be at least 1".into()));
        }
        if self.start_attempts == 0 {
            return Err(Error::Config("start attempts must be at least 1".into()));
        }
        if self.ack_timeout.is_zero() || self.handshake_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".into()));
        }
        if self.handshake_payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::Config("handshake payload too long".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = UpdateConfig::default();
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.ack_timeout, Duration::from_secs(2));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.start_attempts, 1);
        assert_eq!(config.handshake_payload, b"PC_HANDSHAKE");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_size_bounds() {
        assert!(UpdateConfig::default().with_chunk_size(0).validate().is_err());
        assert!(UpdateConfig::default().with_chunk_size(65_531).validate().is_ok());
        assert!(matches!(
            UpdateConfig::default().with_chunk_size(65_532).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_attempts_and_timeouts() {
        assert!(UpdateConfig::default().with_max_retries(0).validate().is_err());
        assert!(UpdateConfig::default().with_start_attempts(0).validate().is_err());
        assert!(
            UpdateConfig::default()
                .with_ack_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
