//! Host stand-ins for the camera node peripherals.

use std::cell::RefCell;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use camnode_core::capture::{CapturePreset, FrameGeometry, FrameSource, SensorModel, SensorTuning};
use camnode_core::config::WifiCredentials;
use camnode_core::endpoint::Endpoint;
use camnode_core::link::RadioDriver;
use camnode_core::power::{PowerDomain, SleepController};
use camnode_core::telemetry::{
    DiagnosticSink, TelemetryInstant, TelemetryRecord, Timebase, TimestampMicros,
};
use camnode_core::upload::{HttpConnector, SocketError};
use crossterm::style::Stylize;

use crate::session::TranscriptLogger;

/// Time since the emulated boot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct HostInstant(Duration);

impl TelemetryInstant for HostInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }

    fn as_micros(&self) -> TimestampMicros {
        u64::try_from(self.0.as_micros()).unwrap_or(u64::MAX)
    }
}

/// Wall clock that can skip delays instead of sleeping through them.
pub struct HostClock {
    booted: Instant,
    skipped: Duration,
    realtime: bool,
}

impl HostClock {
    pub fn new(realtime: bool) -> Self {
        Self {
            booted: Instant::now(),
            skipped: Duration::ZERO,
            realtime,
        }
    }
}

impl Timebase for HostClock {
    type Instant = HostInstant;

    fn now(&self) -> HostInstant {
        HostInstant(self.booted.elapsed() + self.skipped)
    }

    async fn delay(&mut self, duration: Duration) {
        if self.realtime {
            thread::sleep(duration);
        } else {
            self.skipped += duration;
        }
    }
}

/// Station that associates after a fixed number of status polls.
pub struct SimRadio {
    associate_after: Option<u8>,
    polls: u8,
    started: bool,
}

impl SimRadio {
    /// `None` never associates.
    pub fn new(associate_after: Option<u8>) -> Self {
        Self {
            associate_after,
            polls: 0,
            started: false,
        }
    }
}

impl RadioDriver for SimRadio {
    type Error = &'static str;

    async fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error> {
        if credentials.ssid.is_empty() {
            return Err("empty ssid");
        }
        self.started = true;
        Ok(())
    }

    fn disable_power_save(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        if !self.started {
            return false;
        }
        match self.associate_after {
            Some(after) if self.polls >= after => true,
            Some(_) => {
                self.polls += 1;
                self.associate_after.is_some_and(|after| self.polls >= after)
            }
            None => false,
        }
    }

    fn rssi(&mut self) -> Option<i8> {
        self.started.then_some(-58)
    }

    fn ipv4_address(&mut self) -> Option<[u8; 4]> {
        self.started.then_some([127, 0, 0, 1])
    }

    async fn disconnect(&mut self, _forget_credentials: bool) -> Result<(), Self::Error> {
        self.polls = 0;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), Self::Error> {
        self.started = false;
        Ok(())
    }

    fn disable_short_range(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Camera that serves one fixed JPEG, or nothing at all.
pub struct SimCamera {
    image: Vec<u8>,
    model: SensorModel,
    deliver: bool,
    lent: bool,
    powered: bool,
}

impl SimCamera {
    pub fn new(image: Vec<u8>, model: SensorModel, deliver: bool) -> Self {
        Self {
            image,
            model,
            deliver,
            lent: false,
            powered: false,
        }
    }
}

impl FrameSource for SimCamera {
    type Error = &'static str;

    fn init(&mut self, _preset: &CapturePreset) -> Result<SensorModel, Self::Error> {
        self.powered = true;
        Ok(self.model)
    }

    fn apply_tuning(&mut self, _tuning: &SensorTuning) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn grab(&mut self) -> Option<FrameGeometry> {
        if !self.powered || !self.deliver || self.image.is_empty() {
            return None;
        }
        self.lent = true;
        let (width, height) = jpeg_dimensions(&self.image).unwrap_or((1600, 1200));
        Some(FrameGeometry { width, height })
    }

    fn frame(&self) -> &[u8] {
        if self.lent { &self.image } else { &[] }
    }

    fn give_back(&mut self) {
        self.lent = false;
    }

    fn deinit(&mut self) -> Result<(), Self::Error> {
        if self.lent {
            return Err("frame still lent");
        }
        Ok(())
    }

    fn assert_power_down(&mut self) {
        self.powered = false;
    }
}

/// Reads width and height from the first baseline or progressive SOF segment.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u16, u16)> {
    if bytes.get(..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut offset = 2;
    while offset + 4 <= bytes.len() {
        if bytes[offset] != 0xFF {
            return None;
        }
        let marker = bytes[offset + 1];
        let length = usize::from(u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]));
        if matches!(marker, 0xC0 | 0xC2) {
            let segment = bytes.get(offset + 4..offset + 9)?;
            let height = u16::from_be_bytes([segment[1], segment[2]]);
            let width = u16::from_be_bytes([segment[3], segment[4]]);
            return Some((width, height));
        }
        offset += 2 + length;
    }
    None
}

/// JPEG-framed filler (SOI, counting payload, EOI) used when no image is supplied.
pub fn synthetic_jpeg(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len.max(4)];
    bytes[..2].copy_from_slice(&[0xFF, 0xD8]);
    for (index, byte) in bytes.iter_mut().enumerate().skip(2) {
        *byte = u8::try_from(index % 251).unwrap_or(0);
    }
    let end = bytes.len();
    bytes[end - 2..].copy_from_slice(&[0xFF, 0xD9]);
    bytes
}

/// Blocking TCP transport.
#[derive(Default)]
pub struct TcpConnector {
    stream: Option<TcpStream>,
}

impl TcpConnector {
    fn stream(&mut self) -> Result<&mut TcpStream, SocketError> {
        self.stream.as_mut().ok_or(SocketError::Closed)
    }
}

fn socket_error(err: &io::Error) -> SocketError {
    match err.kind() {
        ErrorKind::ConnectionRefused => SocketError::Refused,
        ErrorKind::TimedOut | ErrorKind::WouldBlock => SocketError::TimedOut,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => SocketError::Closed,
        ErrorKind::NotFound | ErrorKind::AddrNotAvailable => SocketError::Unreachable,
        _ => SocketError::Other,
    }
}

impl HttpConnector for TcpConnector {
    async fn connect(&mut self, endpoint: &Endpoint, timeout: Duration) -> Result<(), SocketError> {
        let addr = (endpoint.host(), endpoint.port())
            .to_socket_addrs()
            .map_err(|_| SocketError::Unreachable)?
            .next()
            .ok_or(SocketError::Unreachable)?;
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|err| socket_error(&err))?;
        stream
            .set_read_timeout(Some(timeout))
            .and_then(|()| stream.set_write_timeout(Some(timeout)))
            .map_err(|err| socket_error(&err))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
        self.stream()?
            .write_all(bytes)
            .map_err(|err| socket_error(&err))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        self.stream()?.read(buf).map_err(|err| socket_error(&err))
    }

    async fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Sleep controller that reports what the hardware would do.
#[derive(Default)]
pub struct SimSleep {
    pub wake_after: Option<Duration>,
    pub disabled: Vec<PowerDomain>,
    pub suspended: bool,
}

impl SleepController for SimSleep {
    type Error = &'static str;

    fn disable_domain(&mut self, domain: PowerDomain) -> Result<(), Self::Error> {
        self.disabled.push(domain);
        Ok(())
    }

    fn arm_wake_timer(&mut self, after: Duration) -> Result<(), Self::Error> {
        if after.is_zero() {
            return Err("zero wake interval");
        }
        self.wake_after = Some(after);
        Ok(())
    }

    async fn flush_diagnostics(&mut self) {
        let _ = io::stdout().flush();
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }
}

/// Prints records to the console and mirrors them into a transcript.
pub struct ConsoleSink {
    color: bool,
    transcript: Option<Rc<RefCell<TranscriptLogger>>>,
}

impl ConsoleSink {
    pub fn new(color: bool, transcript: Option<Rc<RefCell<TranscriptLogger>>>) -> Self {
        Self { color, transcript }
    }

    fn write_line(&mut self, line: &str, warning: bool) {
        if self.color && warning {
            println!("{}", line.yellow());
        } else {
            println!("{line}");
        }
        let Some(transcript) = &self.transcript else {
            return;
        };
        if let Err(err) = transcript.borrow_mut().append(line) {
            eprintln!("transcript write failed: {err}");
        }
    }
}

impl DiagnosticSink<HostInstant> for ConsoleSink {
    fn emit(&mut self, record: &TelemetryRecord<HostInstant>) {
        self.write_line(&record.to_string(), record.event.is_warning());
    }

    fn server_response(&mut self, attempt: u8, body: &[u8]) {
        let text = String::from_utf8_lossy(body);
        self.write_line(
            &format!("  server response (attempt {attempt}): {}", text.trim_end()),
            false,
        );
    }
}
