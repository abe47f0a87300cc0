//! Update session state machine.
//!
//! ```text
//! HANDSHAKE --> START --> TRANSFER --> END --> DONE
//!     |           |          |          |
//!     +-----------+----------+----------+----> FAILED
//! ```
//!
//! Every request after the handshake is stop-and-wait: one frame out, one
//! ACK echoing its command and sequence back. DATA and END_UPDATE frames are
//! resent unchanged when the ACK does not arrive; the handshake never is,
//! and START_UPDATE only when configured.

use {
    crate::{
        error::{Error, Result},
        image::FirmwareImage,
        port::Port,
        protocol::{
            frame::{Ack, Command, Frame, HANDSHAKE_SEQUENCE},
            link::Link,
        },
        update::{
            config::UpdateConfig,
            event::{LogKind, LogLine, SessionState, UpdateEvent},
        },
    },
    byteorder::{ByteOrder, LittleEndian},
    log::{debug, log, trace, warn},
    std::{
        thread,
        time::{Duration, Instant},
    },
};

/// Outcome of a successful update.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UpdateReport {
    /// Image size sent in START_UPDATE.
    pub image_size: u32,
    /// Image CRC sent in START_UPDATE.
    pub image_crc: u32,
    /// Version sent in START_UPDATE.
    pub version: u32,
    /// Identification string from the handshake reply.
    pub device: String,
    /// DATA frames acknowledged.
    pub data_frames: usize,
    /// Frames sent more than once, counted per resend.
    pub retransmissions: u32,
    /// Sequence number of END_UPDATE.
    pub last_sequence: u8,
    /// Wall time from start to the END_UPDATE ACK.
    pub elapsed: Duration,
}

/// Drives update sessions over an owned port.
///
/// The port is closed when a session ends, successfully or not.
pub struct Updater<P: Port> {
    port: P,
    config: UpdateConfig,
    state: Option<SessionState>,
}

impl<P: Port> Updater<P> {
    /// Create an updater for an already opened port.
    pub fn new(port: P, config: UpdateConfig) -> Self {
        Self {
            port,
            config,
            state: None,
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// State the last session ended in.
    pub fn state(&self) -> Option<SessionState> {
        self.state
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the updater and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Send `image` to the bootloader, tagging it with `version`.
    pub fn update(
        &mut self,
        image: &FirmwareImage,
        version: u32,
        on_event: &mut dyn FnMut(UpdateEvent),
    ) -> Result<UpdateReport> {
        let started = Instant::now();
        let (result, state) = {
            let mut session = Session::new(&mut self.port, &self.config, on_event);
            let result = session.run_update(image, version, started);
            let state = session.finish(&result);
            (result, state)
        };
        self.state = Some(state);
        self.close_port();
        result
    }

    /// Handshake, then read the firmware version the bootloader has recorded.
    pub fn query_version(&mut self, on_event: &mut dyn FnMut(UpdateEvent)) -> Result<u32> {
        let (result, state) = {
            let mut session = Session::new(&mut self.port, &self.config, on_event);
            let result = session.run_query();
            let state = session.finish(&result);
            (result, state)
        };
        self.state = Some(state);
        self.close_port();
        result
    }

    fn close_port(&mut self) {
        if let Err(e) = self.port.close() {
            warn!("Failed to close {}: {e}", self.port.name());
        }
    }
}

/// Run one update session on `port`, closing it afterwards.
pub fn run_update<P: Port>(
    port: P,
    firmware: &FirmwareImage,
    version: u32,
    config: &UpdateConfig,
    on_event: &mut dyn FnMut(UpdateEvent),
) -> Result<UpdateReport> {
    Updater::new(port, config.clone()).update(firmware, version, on_event)
}

/// Read the bootloader's recorded version on `port`, closing it afterwards.
pub fn query_version<P: Port>(
    port: P,
    config: &UpdateConfig,
    on_event: &mut dyn FnMut(UpdateEvent),
) -> Result<u32> {
    Updater::new(port, config.clone()).query_version(on_event)
}

/// One handshake-to-end exchange.
struct Session<'a, P: Port, F: FnMut(UpdateEvent) + ?Sized> {
    link: Link<'a, P>,
    config: &'a UpdateConfig,
    on_event: &'a mut F,
    state: SessionState,
    sequence: u8,
    retransmissions: u32,
}

impl<'a, P: Port, F: FnMut(UpdateEvent) + ?Sized> Session<'a, P, F> {
    fn new(port: &'a mut P, config: &'a UpdateConfig, on_event: &'a mut F) -> Self {
        Self {
            link: Link::new(port).with_poll_interval(config.poll_interval),
            config,
            on_event,
            state: SessionState::Handshake,
            sequence: HANDSHAKE_SEQUENCE,
            retransmissions: 0,
        }
    }

    fn emit(&mut self, event: UpdateEvent) {
        (*self.on_event)(event);
    }

    fn log(&mut self, kind: LogKind, message: impl Into<String>) {
        let message = message.into();
        log!(kind.level(), "{message}");
        self.emit(UpdateEvent::Log(LogLine { kind, message }));
    }

    fn enter(&mut self, state: SessionState) {
        debug!("Session: {} -> {state}", self.state);
        self.state = state;
        self.emit(UpdateEvent::State(state));
    }

    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Move to the terminal state matching `result`.
    fn finish<T>(&mut self, result: &Result<T>) -> SessionState {
        match result {
            Ok(_) => self.enter(SessionState::Done),
            Err(e) => {
                self.enter(SessionState::Failed);
                self.log(LogKind::Error, e.to_string());
            },
        }
        self.state
    }

    fn run_update(
        &mut self,
        image: &FirmwareImage,
        version: u32,
        started: Instant,
    ) -> Result<UpdateReport> {
        self.prepare()?;
        let device = self.handshake()?;
        self.start(image, version)?;
        let data_frames = self.transfer(image)?;
        self.end()?;

        let elapsed = started.elapsed();
        debug!("Update took {elapsed:?}, {} retransmissions", self.retransmissions);

        Ok(UpdateReport {
            image_size: image.size(),
            image_crc: image.crc(),
            version,
            device,
            data_frames,
            retransmissions: self.retransmissions,
            last_sequence: self.sequence,
            elapsed,
        })
    }

    fn run_query(&mut self) -> Result<u32> {
        self.prepare()?;
        self.handshake()?;

        let sequence = self.next_sequence();
        self.log(LogKind::Step, "Querying bootloader version");
        self.link.send(&Frame::query_version(sequence))?;
        self.log(LogKind::Send, format!("{} seq={sequence}", Command::QueryVersion));

        let reply = self
            .link
            .receive(self.config.ack_timeout)?
            .ok_or(Error::FrameTimeout {
                command: Command::QueryVersion as u8,
                sequence,
            })?;
        if !reply.is(Command::QueryVersion) || reply.sequence != sequence || reply.payload.len() < 4 {
            return Err(Error::UnexpectedFrame {
                command: reply.command,
                sequence: reply.sequence,
            });
        }

        let version = LittleEndian::read_u32(&reply.payload);
        self.log(LogKind::Ok, format!("Bootloader reports version 0x{version:08X}"));
        Ok(version)
    }

    /// Validate the configuration, let the line settle and drop stale input.
    fn prepare(&mut self) -> Result<()> {
        self.config.validate()?;
        if !self.config.settle_time.is_zero() {
            trace!("Settling for {:?}", self.config.settle_time);
            thread::sleep(self.config.settle_time);
        }
        self.link.port().clear_buffers()?;
        self.link.reset();
        Ok(())
    }

    fn handshake(&mut self) -> Result<String> {
        self.enter(SessionState::Handshake);
        self.sequence = HANDSHAKE_SEQUENCE;

        let port_name = self.link.port().name().to_string();
        self.log(LogKind::Step, format!("Handshaking with bootloader on {port_name}"));

        let request = Frame::handshake(&self.config.handshake_payload);
        self.link.send(&request)?;
        self.log(
            LogKind::Send,
            format!(
                "{} seq={HANDSHAKE_SEQUENCE} \"{}\"",
                Command::Handshake,
                String::from_utf8_lossy(&request.payload)
            ),
        );

        match self.link.receive(self.config.handshake_timeout)? {
            None => Err(Error::HandshakeTimeout),
            Some(reply) if reply.is(Command::Handshake) => {
                let device = device_ident(&reply.payload);
                self.log(LogKind::Ok, format!("Handshake OK, device: {device}"));
                Ok(device)
            },
            Some(reply) => Err(Error::HandshakeRejected {
                command: reply.command,
            }),
        }
    }

    fn start(&mut self, image: &FirmwareImage, version: u32) -> Result<()> {
        self.enter(SessionState::Start);
        let sequence = self.next_sequence();
        self.log(
            LogKind::Step,
            format!(
                "Starting update: {} bytes, CRC32 0x{:08X}, version 0x{version:08X}",
                image.size(),
                image.crc()
            ),
        );

        let frame = Frame::start_update(sequence, image.size(), image.crc(), version);
        self.exchange(&frame, Command::StartUpdate, self.config.start_attempts)?;
        self.log(LogKind::Ok, "Bootloader accepted the image");
        Ok(())
    }

    fn transfer(&mut self, image: &FirmwareImage) -> Result<usize> {
        self.enter(SessionState::Transfer);
        let chunk_size = self.config.chunk_size;
        let total = image.len();
        self.log(
            LogKind::Step,
            format!(
                "Sending {total} bytes in {} chunks",
                image.chunk_count(chunk_size)
            ),
        );

        let mut data_frames = 0;
        for (offset, chunk) in image.chunks(chunk_size) {
            let sequence = self.next_sequence();
            let frame = Frame::data(sequence, offset, chunk);
            self.exchange(&frame, Command::Data, self.config.max_retries)?;

            data_frames += 1;
            self.emit(UpdateEvent::Progress {
                sent: offset as usize + chunk.len(),
                total,
            });
        }

        self.log(LogKind::Ok, format!("All {data_frames} chunks acknowledged"));
        Ok(data_frames)
    }

    fn end(&mut self) -> Result<()> {
        self.enter(SessionState::End);
        let sequence = self.next_sequence();
        self.log(LogKind::Step, "Finishing update");
        self.exchange(&Frame::end_update(sequence), Command::EndUpdate, self.config.max_retries)?;
        self.log(LogKind::Ok, "Update complete; device will verify the image and reboot");
        Ok(())
    }

    /// Send `frame` until its ACK arrives or `attempts` sends have failed.
    fn exchange(&mut self, frame: &Frame, command: Command, attempts: u32) -> Result<()> {
        let sequence = frame.sequence;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if let Some(e) = &last_error {
                self.retransmissions += 1;
                let message = format!("{command} seq={sequence}: {e}; resending ({attempt}/{attempts})");
                self.log(LogKind::Retry, message);
            }

            self.link.send(frame)?;
            self.log(
                LogKind::Send,
                format!("{command} seq={sequence} len={}", frame.payload.len()),
            );

            match self.await_ack(command, sequence) {
                Ok(()) => {
                    self.log(LogKind::Ack, format!("{command} seq={sequence} -> ACK"));
                    return Ok(());
                },
                Err(e) if e.is_ack_failure() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        let source = last_error.unwrap_or(Error::FrameTimeout {
            command: command as u8,
            sequence,
        });
        if attempts <= 1 {
            return Err(source);
        }
        Err(Error::RetriesExhausted {
            command: command as u8,
            sequence,
            attempts,
            source: Box::new(source),
        })
    }

    fn await_ack(&mut self, command: Command, sequence: u8) -> Result<()> {
        let started = Instant::now();
        let frame = self
            .link
            .receive(self.config.ack_timeout)?
            .ok_or(Error::FrameTimeout {
                command: command as u8,
                sequence,
            })?;
        Ack::expect(&frame, command, sequence)?;
        trace!("ACK {command} seq={sequence} after {:?}", started.elapsed());
        Ok(())
    }
}

/// Handshake reply payload as text, without trailing NULs.
fn device_ident(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::protocol::{crc::crc32, frame::AckStatus, sync::FrameSync},
        std::{
            collections::VecDeque,
            io::{self, Read, Write},
            sync::{Arc, Mutex},
        },
    };

    const VERSION: u32 = 0x0001_0001;
    const DEVICE_VERSION: u32 = 0x0002_0003;

    #[derive(Default)]
    struct Observed {
        frames: Vec<Frame>,
        closed: bool,
    }

    type Responder = Box<dyn FnMut(&Frame) -> Vec<u8> + Send>;

    /// Bootloader simulated behind a port: decodes what the host writes and
    /// queues whatever the responder returns as incoming bytes.
    struct SimBootloader {
        rx: FrameSync,
        tx: VecDeque<u8>,
        timeout: Duration,
        respond: Responder,
        observed: Arc<Mutex<Observed>>,
    }

    impl SimBootloader {
        fn new(respond: impl FnMut(&Frame) -> Vec<u8> + Send + 'static) -> (Self, Arc<Mutex<Observed>>) {
            let observed = Arc::new(Mutex::new(Observed::default()));
            let sim = Self {
                rx: FrameSync::new(),
                tx: VecDeque::new(),
                timeout: Duration::from_millis(5),
                respond: Box::new(respond),
                observed: Arc::clone(&observed),
            };
            (sim, observed)
        }

        fn is_closed(&self) -> bool {
            self.observed.lock().unwrap().closed
        }
    }

    impl Read for SimBootloader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.is_closed() {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            if self.tx.is_empty() {
                thread::sleep(self.timeout.min(Duration::from_millis(1)));
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timeout"));
            }
            let n = buf.len().min(self.tx.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.tx.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for SimBootloader {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.is_closed() {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            for &b in buf {
                if let Some(frame) = self.rx.push(b) {
                    let reply = (self.respond)(&frame);
                    self.tx.extend(reply);
                    self.observed.lock().unwrap().frames.push(frame);
                }
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for SimBootloader {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_baud_rate(&mut self, _baud_rate: u32) -> Result<()> {
            Ok(())
        }

        fn baud_rate(&self) -> u32 {
            115_200
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.tx.clear();
            Ok(())
        }

        fn name(&self) -> &str {
            "sim"
        }

        fn close(&mut self) -> Result<()> {
            self.observed.lock().unwrap().closed = true;
            Ok(())
        }
    }

    fn ack(status: AckStatus, frame: &Frame) -> Vec<u8> {
        Frame::ack(status, frame.command, frame.sequence)
            .encode()
            .unwrap()
    }

    /// What a healthy bootloader answers.
    fn reply(frame: &Frame) -> Vec<u8> {
        match frame.kind() {
            Some(Command::Handshake) => Frame::handshake(b"STM32F4-APP-BOOT\0").encode().unwrap(),
            Some(Command::QueryVersion) => Frame::new(
                Command::QueryVersion,
                frame.sequence,
                DEVICE_VERSION.to_le_bytes().to_vec(),
            )
            .encode()
            .unwrap(),
            _ => ack(AckStatus::Ok, frame),
        }
    }

    fn fast_config() -> UpdateConfig {
        UpdateConfig::default()
            .with_ack_timeout(Duration::from_millis(40))
            .with_handshake_timeout(Duration::from_millis(40))
            .with_poll_interval(Duration::from_millis(5))
            .with_settle_time(Duration::ZERO)
    }

    fn image(len: usize) -> FirmwareImage {
        FirmwareImage::from_bytes((0..len).map(|i| (i % 251) as u8).collect()).unwrap()
    }

    fn run(
        sim: SimBootloader,
        image: &FirmwareImage,
        config: &UpdateConfig,
    ) -> (Result<UpdateReport>, Vec<UpdateEvent>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut events = Vec::new();
        let result = run_update(sim, image, VERSION, config, &mut |e| events.push(e));
        (result, events)
    }

    fn frames_of(observed: &Arc<Mutex<Observed>>) -> Vec<Frame> {
        observed.lock().unwrap().frames.clone()
    }

    fn count_logs(events: &[UpdateEvent], kind: LogKind) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, UpdateEvent::Log(line) if line.kind == kind))
            .count()
    }

    #[test]
    fn test_end_to_end_1300_bytes() {
        let (sim, observed) = SimBootloader::new(reply);
        let image = image(1300);
        let (result, events) = run(sim, &image, &fast_config());

        let report = result.unwrap();
        assert_eq!(report.image_size, 1300);
        assert_eq!(report.image_crc, crc32(image.data()));
        assert_eq!(report.version, VERSION);
        assert_eq!(report.device, "STM32F4-APP-BOOT");
        assert_eq!(report.data_frames, 3);
        assert_eq!(report.retransmissions, 0);
        assert_eq!(report.last_sequence, 5);

        let frames = frames_of(&observed);
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0], Frame::handshake(b"PC_HANDSHAKE"));
        assert_eq!(
            frames[1],
            Frame::start_update(1, 1300, crc32(image.data()), VERSION)
        );
        let data = image.data();
        assert_eq!(frames[2], Frame::data(2, 0, &data[..512]));
        assert_eq!(frames[3], Frame::data(3, 512, &data[512..1024]));
        assert_eq!(frames[4], Frame::data(4, 1024, &data[1024..]));
        assert_eq!(frames[4].payload.len(), 4 + 276);
        assert_eq!(frames[5], Frame::end_update(5));
        assert!(observed.lock().unwrap().closed);

        let states: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::State(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Handshake,
                SessionState::Start,
                SessionState::Transfer,
                SessionState::End,
                SessionState::Done,
            ]
        );

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::Progress { sent, total } => Some((*sent, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(512, 1300), (1024, 1300), (1300, 1300)]);
        assert_eq!(count_logs(&events, LogKind::Error), 0);
    }

    #[test]
    fn test_handshake_rejected_sends_nothing_else() {
        let (sim, observed) = SimBootloader::new(|f| ack(AckStatus::Ok, f));
        let (result, events) = run(sim, &image(100), &fast_config());

        assert!(matches!(result, Err(Error::HandshakeRejected { command: 0x06 })));
        assert_eq!(frames_of(&observed).len(), 1);
        assert!(observed.lock().unwrap().closed);
        assert_eq!(count_logs(&events, LogKind::Error), 1);
    }

    #[test]
    fn test_handshake_timeout() {
        let (sim, observed) = SimBootloader::new(|_| Vec::new());
        let (result, _) = run(sim, &image(100), &fast_config());

        assert!(matches!(result, Err(Error::HandshakeTimeout)));
        assert_eq!(frames_of(&observed).len(), 1);
        assert!(observed.lock().unwrap().closed);
    }

    #[test]
    fn test_unanswered_data_is_sent_five_times() {
        let (sim, observed) = SimBootloader::new(|f| {
            if f.is(Command::Data) {
                Vec::new()
            } else {
                reply(f)
            }
        });
        let (result, events) = run(sim, &image(1300), &fast_config());

        match result {
            Err(Error::RetriesExhausted {
                command,
                sequence,
                attempts,
                source,
            }) => {
                assert_eq!(command, Command::Data as u8);
                assert_eq!(sequence, 2);
                assert_eq!(attempts, 5);
                assert!(matches!(*source, Error::FrameTimeout { .. }));
            },
            other => panic!("unexpected result: {other:?}"),
        }

        let frames = frames_of(&observed);
        let data: Vec<_> = frames.iter().filter(|f| f.is(Command::Data)).collect();
        assert_eq!(data.len(), 5);
        assert!(data.iter().all(|f| **f == *data[0]));
        assert!(!frames.iter().any(|f| f.is(Command::EndUpdate)));

        assert_eq!(count_logs(&events, LogKind::Retry), 4);
        assert_eq!(count_logs(&events, LogKind::Error), 1);
        assert_eq!(events.last().map(|e| matches!(e, UpdateEvent::Log(_))), Some(true));
        assert!(events.contains(&UpdateEvent::State(SessionState::Failed)));
        assert!(observed.lock().unwrap().closed);
    }

    #[test]
    fn test_unanswered_end_is_sent_five_times() {
        let (sim, observed) = SimBootloader::new(|f| {
            if f.is(Command::EndUpdate) {
                Vec::new()
            } else {
                reply(f)
            }
        });
        let (result, events) = run(sim, &image(1300), &fast_config());

        assert!(matches!(
            result,
            Err(Error::RetriesExhausted {
                command: 0x04,
                sequence: 5,
                attempts: 5,
                ..
            })
        ));

        let frames = frames_of(&observed);
        let end: Vec<_> = frames.iter().filter(|f| f.is(Command::EndUpdate)).collect();
        assert_eq!(end.len(), 5);
        assert!(end.iter().all(|f| **f == Frame::end_update(5)));
        assert_eq!(frames.last(), Some(&Frame::end_update(5)));

        assert_eq!(count_logs(&events, LogKind::Retry), 4);
        assert_eq!(count_logs(&events, LogKind::Error), 1);
        assert!(events.contains(&UpdateEvent::State(SessionState::Failed)));
        assert!(!events.contains(&UpdateEvent::State(SessionState::Done)));
        assert!(observed.lock().unwrap().closed);
    }

    #[test]
    fn test_truncated_ack_does_not_swallow_the_next_one() {
        let mut data_seen = 0;
        let (sim, observed) = SimBootloader::new(move |f| {
            if !f.is(Command::Data) {
                return reply(f);
            }
            data_seen += 1;
            if data_seen == 1 {
                ack(AckStatus::Ok, f)[..7].to_vec()
            } else {
                reply(f)
            }
        });
        let (result, _) = run(sim, &image(100), &fast_config());

        let report = result.unwrap();
        assert_eq!(report.retransmissions, 1);
        let data = frames_of(&observed)
            .into_iter()
            .filter(|f| f.is(Command::Data))
            .count();
        assert_eq!(data, 2);
    }

    #[test]
    fn test_every_accepted_ack_is_logged() {
        let (sim, _) = SimBootloader::new(reply);
        let (result, events) = run(sim, &image(1300), &fast_config());
        assert!(result.is_ok());

        // START, three DATA frames, END
        assert_eq!(count_logs(&events, LogKind::Ack), 5);
        assert!(events.contains(&UpdateEvent::Log(LogLine {
            kind: LogKind::Ack,
            message: format!("{} seq=3 -> ACK", Command::Data),
        })));
    }

    #[test]
    fn test_start_is_sent_once_by_default() {
        let (sim, observed) = SimBootloader::new(|f| {
            if f.is(Command::StartUpdate) {
                Vec::new()
            } else {
                reply(f)
            }
        });
        let (result, _) = run(sim, &image(100), &fast_config());

        assert!(matches!(
            result,
            Err(Error::FrameTimeout {
                command: 0x02,
                sequence: 1
            })
        ));
        let frames = frames_of(&observed);
        assert_eq!(frames.len(), 2);
        assert!(frames[1].is(Command::StartUpdate));
    }

    #[test]
    fn test_start_attempts_are_configurable() {
        let (sim, observed) = SimBootloader::new(|f| {
            if f.is(Command::StartUpdate) {
                Vec::new()
            } else {
                reply(f)
            }
        });
        let config = fast_config().with_start_attempts(3);
        let (result, _) = run(sim, &image(100), &config);

        assert!(matches!(
            result,
            Err(Error::RetriesExhausted { command: 0x02, attempts: 3, .. })
        ));
        assert_eq!(frames_of(&observed).len(), 4);
    }

    #[test]
    fn test_recovers_from_lost_nak_and_mismatched_acks() {
        let mut data_seen = 0;
        let (sim, observed) = SimBootloader::new(move |f| {
            if !f.is(Command::Data) {
                return reply(f);
            }
            data_seen += 1;
            match data_seen {
                1 => Vec::new(),
                2 => ack(AckStatus::FlashError, f),
                3 => Frame::ack(AckStatus::Ok, f.command, f.sequence.wrapping_add(1))
                    .encode()
                    .unwrap(),
                _ => reply(f),
            }
        });
        let (result, events) = run(sim, &image(1300), &fast_config());

        let report = result.unwrap();
        assert_eq!(report.retransmissions, 3);
        assert_eq!(report.data_frames, 3);
        let data: Vec<_> = frames_of(&observed)
            .into_iter()
            .filter(|f| f.is(Command::Data))
            .collect();
        assert_eq!(data.len(), 6);
        assert!(data[..4].iter().all(|f| f.sequence == 2));
        assert_eq!(count_logs(&events, LogKind::Retry), 3);
        assert_eq!(count_logs(&events, LogKind::Error), 0);
    }

    #[test]
    fn test_replies_survive_line_noise() {
        let (sim, _) = SimBootloader::new(|f| {
            let mut corrupt = ack(AckStatus::Ok, f);
            let last = corrupt.len() - 1;
            corrupt[last] ^= 0x5A;

            let mut bytes = vec![0x00, 0x55, 0x13, 0xAA, 0xFF];
            bytes.extend(corrupt);
            bytes.extend(reply(f));
            bytes
        });
        let (result, _) = run(sim, &image(1300), &fast_config());
        assert_eq!(result.unwrap().retransmissions, 0);
    }

    #[test]
    fn test_sequence_wraps_after_255() {
        let (sim, observed) = SimBootloader::new(reply);
        let config = fast_config().with_chunk_size(1);
        let (result, _) = run(sim, &image(300), &config);

        let report = result.unwrap();
        assert_eq!(report.data_frames, 300);
        assert_eq!(report.last_sequence, ((2 + 300) % 256) as u8);

        let frames = frames_of(&observed);
        let data: Vec<_> = frames.iter().filter(|f| f.is(Command::Data)).collect();
        for (i, frame) in data.iter().enumerate() {
            assert_eq!(frame.sequence, ((2 + i) % 256) as u8);
            assert_eq!(&frame.payload[..4], &(i as u32).to_le_bytes());
        }
        assert_eq!(data[253].sequence, 255);
        assert_eq!(data[254].sequence, 0);
    }

    #[test]
    fn test_query_version() {
        let (sim, observed) = SimBootloader::new(reply);
        let mut updater = Updater::new(sim, fast_config());

        assert_eq!(updater.query_version(&mut |_| {}).unwrap(), DEVICE_VERSION);
        assert_eq!(updater.state(), Some(SessionState::Done));
        assert!(updater.port().is_closed());
        assert_eq!(
            frames_of(&observed),
            vec![Frame::handshake(b"PC_HANDSHAKE"), Frame::query_version(1)]
        );
    }

    #[test]
    fn test_query_version_timeout() {
        let (sim, _) = SimBootloader::new(|f| {
            if f.is(Command::QueryVersion) {
                Vec::new()
            } else {
                reply(f)
            }
        });
        let result = query_version(sim, &fast_config(), &mut |_| {});
        assert!(matches!(
            result,
            Err(Error::FrameTimeout {
                command: 0x05,
                sequence: 1
            })
        ));
    }

    #[test]
    fn test_invalid_config_still_closes_port() {
        let (sim, observed) = SimBootloader::new(reply);
        let config = fast_config().with_chunk_size(0);
        let (result, _) = run(sim, &image(10), &config);

        assert!(matches!(result, Err(Error::Config(_))));
        assert!(frames_of(&observed).is_empty());
        assert!(observed.lock().unwrap().closed);
    }

    #[test]
    fn test_device_ident_trims_nuls() {
        assert_eq!(device_ident(b"BOOT\0\0"), "BOOT");
        assert_eq!(device_ident(b""), "");
    }
}
