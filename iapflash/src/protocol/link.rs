//! Frame-level link over a [`Port`].
//!
//! Pairs a port with a [`FrameSync`] so callers deal in whole frames: `send`
//! writes one encoded frame, `receive` returns the next valid frame or
//! `None` once a wall-clock deadline has passed. Reads are sliced to the
//! poll interval so the deadline and the interrupt flag are observed even
//! on a silent line. A wait that times out drops whatever partial frame it
//! collected, so the next wait starts scanning for a fresh marker.

use {
    crate::{
        error::{Error, Result},
        port::Port,
        protocol::{
            frame::Frame,
            sync::{FrameSync, SyncState},
        },
    },
    log::trace,
    std::time::{Duration, Instant},
};

/// Default per-byte read slice.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Port plus synchronizer.
pub struct Link<'a, P: Port + ?Sized> {
    port: &'a mut P,
    sync: FrameSync,
    poll_interval: Duration,
    interrupted: fn() -> bool,
}

impl<'a, P: Port + ?Sized> Link<'a, P> {
    /// Wrap `port` with a fresh synchronizer.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            sync: FrameSync::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Set the per-byte read slice.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[cfg(test)]
    fn with_interrupt_check(mut self, check: fn() -> bool) -> Self {
        self.interrupted = check;
        self
    }

    /// Underlying port.
    pub fn port(&mut self) -> &mut P {
        self.port
    }

    /// Synchronizer state, for diagnostics.
    pub fn sync(&self) -> &FrameSync {
        &self.sync
    }

    /// Drop any partially received frame.
    pub fn reset(&mut self) {
        self.sync.reset();
    }

    /// Encode and write one frame, flushing the port.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        trace!("TX {} bytes: {:02X?}", bytes.len(), bytes);
        self.port.write_all_bytes(&bytes)
    }

    /// Wait up to `timeout` for the next valid frame.
    ///
    /// Returns `Ok(None)` if the deadline passes first, leaving the
    /// synchronizer reset. Corrupt frames are skipped silently.
    pub fn receive(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;

        loop {
            if (self.interrupted)() {
                return Err(Error::Interrupted);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                if self.sync.state() != SyncState::Seek1 {
                    trace!("Dropping partial frame at deadline ({:?})", self.sync.state());
                }
                self.sync.reset();
                return Ok(None);
            }

            let slice = remaining.min(self.poll_interval);
            let Some(byte) = self.port.read_byte(slice)? else {
                continue;
            };
            if let Some(frame) = self.sync.push(byte) {
                return Ok(Some(frame));
            }
        }
    }
}
