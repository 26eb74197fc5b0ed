#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use camnode_core::capture::{CapturePreset, FrameGeometry, FrameSource, SensorModel, SensorTuning};
use camnode_core::config::{CycleTiming, DeviceConfig, WifiCredentials};
use camnode_core::endpoint::Endpoint;
use camnode_core::link::RadioDriver;
use camnode_core::power::{PowerDomain, SleepController};
use camnode_core::telemetry::{DiagnosticSink, TelemetryInstant, TelemetryRecord, Timebase};
use camnode_core::upload::{HttpConnector, SocketError};

/// Hardware interaction observed by the bench, in call order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    RadioBegin,
    RadioDisconnect { forget: bool },
    RadioStop,
    ShortRangeOff,
    CameraInit,
    CameraGrab,
    CameraGiveBack,
    CameraDeinit,
    CameraPowerDown,
    Connect,
    Close,
    DomainOff(PowerDomain),
    WakeArmed(Duration),
    Flush,
    Suspend,
    Delay(Duration),
}

/// One request as seen by the scripted endpoint.
#[derive(Clone, Debug, Default)]
pub struct Request {
    pub head: String,
    pub body: Vec<u8>,
}

#[derive(Default)]
pub struct Bench {
    pub calls: Vec<Call>,
    pub requests: Vec<Request>,
    pub lines: Vec<String>,
    pub responses: Vec<(u8, Vec<u8>)>,
}

pub type Shared = Rc<RefCell<Bench>>;

impl Bench {
    pub fn count(&self, call: &Call) -> usize {
        self.calls.iter().filter(|seen| *seen == call).count()
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls.iter().position(|seen| seen == call)
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                Call::Delay(duration) => Some(*duration),
                _ => None,
            })
            .collect()
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockInstant(u64);

impl TelemetryInstant for MockInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_sub(earlier.0))
    }

    fn as_micros(&self) -> u64 {
        self.0
    }
}

pub struct VirtualClock {
    bench: Shared,
    now: u64,
}

impl Timebase for VirtualClock {
    type Instant = MockInstant;

    fn now(&self) -> MockInstant {
        MockInstant(self.now)
    }

    async fn delay(&mut self, duration: Duration) {
        self.bench.borrow_mut().calls.push(Call::Delay(duration));
        self.now += u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    }
}

pub struct SimRadio {
    bench: Shared,
    /// Poll on which association succeeds; `None` never associates.
    pub associate_on_poll: Option<u8>,
    /// Associated probes answered before the link drops.
    pub drop_after_probes: Option<u8>,
    /// Single probe, counted from zero after association, that sees the link down.
    pub drop_on_probe: Option<u8>,
    pub fail_stop: bool,
    polls: u8,
    probes: u8,
}

impl RadioDriver for SimRadio {
    type Error = ();

    async fn begin(&mut self, _: &WifiCredentials) -> Result<(), ()> {
        self.bench.borrow_mut().calls.push(Call::RadioBegin);
        Ok(())
    }

    fn disable_power_save(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        let Some(on_poll) = self.associate_on_poll else {
            return false;
        };
        if self.polls < on_poll {
            self.polls += 1;
            return self.polls >= on_poll;
        }
        let probe = self.probes;
        self.probes = self.probes.saturating_add(1);
        let dropped = self.drop_after_probes.is_some_and(|limit| probe >= limit)
            || self.drop_on_probe == Some(probe);
        !dropped
    }

    fn rssi(&mut self) -> Option<i8> {
        Some(-55)
    }

    fn ipv4_address(&mut self) -> Option<[u8; 4]> {
        Some([192, 168, 4, 20])
    }

    async fn disconnect(&mut self, forget_credentials: bool) -> Result<(), ()> {
        self.bench.borrow_mut().calls.push(Call::RadioDisconnect {
            forget: forget_credentials,
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ()> {
        self.bench.borrow_mut().calls.push(Call::RadioStop);
        if self.fail_stop { Err(()) } else { Ok(()) }
    }

    fn disable_short_range(&mut self) -> Result<(), ()> {
        self.bench.borrow_mut().calls.push(Call::ShortRangeOff);
        Ok(())
    }
}

pub struct SimCamera {
    bench: Shared,
    /// Frames handed out in order; `None` is a capture without data.
    pub frames: VecDeque<Option<Vec<u8>>>,
    pub fail_init: bool,
    pub fail_deinit: bool,
    pub product_id: u16,
    current: Vec<u8>,
}

impl FrameSource for SimCamera {
    type Error = ();

    fn init(&mut self, _: &CapturePreset) -> Result<SensorModel, ()> {
        self.bench.borrow_mut().calls.push(Call::CameraInit);
        if self.fail_init {
            Err(())
        } else {
            Ok(SensorModel::from_product_id(self.product_id))
        }
    }

    fn apply_tuning(&mut self, _: &SensorTuning) -> Result<(), ()> {
        Ok(())
    }

    async fn grab(&mut self) -> Option<FrameGeometry> {
        self.bench.borrow_mut().calls.push(Call::CameraGrab);
        self.current = self.frames.pop_front().flatten()?;
        Some(FrameGeometry {
            width: 1600,
            height: 1200,
        })
    }

    fn frame(&self) -> &[u8] {
        &self.current
    }

    fn give_back(&mut self) {
        self.bench.borrow_mut().calls.push(Call::CameraGiveBack);
        self.current.clear();
    }

    fn deinit(&mut self) -> Result<(), ()> {
        self.bench.borrow_mut().calls.push(Call::CameraDeinit);
        if self.fail_deinit { Err(()) } else { Ok(()) }
    }

    fn assert_power_down(&mut self) {
        self.bench.borrow_mut().calls.push(Call::CameraPowerDown);
    }
}

/// What the endpoint does with one connection.
#[derive(Copy, Clone, Debug)]
pub enum Exchange {
    Refused,
    ConnectTimeout,
    /// Accepts the head, then resets on the first body chunk.
    DropMidBody,
    Respond(&'static str),
    /// Responds with one segment per transport read.
    Segments(&'static [&'static str]),
    /// Sends the segments, then fails the next read.
    SegmentsThenReset(&'static [&'static str]),
}

pub struct ScriptedConnector {
    bench: Shared,
    pub exchanges: VecDeque<Exchange>,
    current: Option<Exchange>,
    segments: VecDeque<Vec<u8>>,
    reset_after_segments: bool,
}

impl ScriptedConnector {
    fn request(&self) -> std::cell::RefMut<'_, Request> {
        std::cell::RefMut::map(self.bench.borrow_mut(), |bench| {
            bench.requests.last_mut().expect("connected request")
        })
    }
}

impl HttpConnector for ScriptedConnector {
    async fn connect(&mut self, _: &Endpoint, _: Duration) -> Result<(), SocketError> {
        self.bench.borrow_mut().calls.push(Call::Connect);
        let exchange = self.exchanges.pop_front().unwrap_or(Exchange::Refused);
        self.segments.clear();
        self.reset_after_segments = false;
        match exchange {
            Exchange::Refused => return Err(SocketError::Refused),
            Exchange::ConnectTimeout => return Err(SocketError::TimedOut),
            Exchange::DropMidBody => {}
            Exchange::Respond(response) => self.segments.push_back(response.as_bytes().to_vec()),
            Exchange::Segments(segments) => {
                self.segments = segments.iter().map(|segment| segment.as_bytes().to_vec()).collect();
            }
            Exchange::SegmentsThenReset(segments) => {
                self.segments = segments.iter().map(|segment| segment.as_bytes().to_vec()).collect();
                self.reset_after_segments = true;
            }
        }
        self.current = Some(exchange);
        self.bench.borrow_mut().requests.push(Request::default());
        Ok(())
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), SocketError> {
        let mut request = self.request();
        if request.head.is_empty() {
            request.head = String::from_utf8_lossy(bytes).into_owned();
            return Ok(());
        }
        if matches!(self.current, Some(Exchange::DropMidBody)) {
            return Err(SocketError::Closed);
        }
        request.body.extend_from_slice(bytes);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SocketError> {
        let Some(mut segment) = self.segments.pop_front() else {
            return if self.reset_after_segments {
                Err(SocketError::Closed)
            } else {
                Ok(0)
            };
        };
        let count = segment.len().min(buf.len());
        buf[..count].copy_from_slice(&segment[..count]);
        if count < segment.len() {
            self.segments.push_front(segment.split_off(count));
        }
        Ok(count)
    }

    async fn close(&mut self) {
        self.current = None;
        self.bench.borrow_mut().calls.push(Call::Close);
    }
}

pub struct SimSleep {
    bench: Shared,
    pub fail_domain: Option<PowerDomain>,
}

impl SleepController for SimSleep {
    type Error = ();

    fn disable_domain(&mut self, domain: PowerDomain) -> Result<(), ()> {
        self.bench.borrow_mut().calls.push(Call::DomainOff(domain));
        if self.fail_domain == Some(domain) {
            Err(())
        } else {
            Ok(())
        }
    }

    fn arm_wake_timer(&mut self, after: Duration) -> Result<(), ()> {
        self.bench.borrow_mut().calls.push(Call::WakeArmed(after));
        Ok(())
    }

    async fn flush_diagnostics(&mut self) {
        self.bench.borrow_mut().calls.push(Call::Flush);
    }

    fn suspend(&mut self) {
        self.bench.borrow_mut().calls.push(Call::Suspend);
    }
}

pub struct LogSink {
    bench: Shared,
}

impl DiagnosticSink<MockInstant> for LogSink {
    fn emit(&mut self, record: &TelemetryRecord<MockInstant>) {
        self.bench.borrow_mut().lines.push(record.to_string());
    }

    fn server_response(&mut self, attempt: u8, body: &[u8]) {
        self.bench
            .borrow_mut()
            .responses
            .push((attempt, body.to_vec()));
    }
}

/// Every simulated peripheral, wired to one shared bench.
pub struct Rig {
    pub bench: Shared,
    pub radio: SimRadio,
    pub camera: SimCamera,
    pub connector: ScriptedConnector,
    pub sleeper: SimSleep,
    pub clock: VirtualClock,
    pub sink: LogSink,
}

/// A rig whose link comes up on the third poll and whose camera yields one
/// 5000-byte frame.
pub fn rig() -> Rig {
    let bench = Shared::default();
    Rig {
        radio: SimRadio {
            bench: bench.clone(),
            associate_on_poll: Some(3),
            drop_after_probes: None,
            drop_on_probe: None,
            fail_stop: false,
            polls: 0,
            probes: 0,
        },
        camera: SimCamera {
            bench: bench.clone(),
            frames: VecDeque::from([Some(jpeg(5000))]),
            fail_init: false,
            fail_deinit: false,
            product_id: 0x2642,
            current: Vec::new(),
        },
        connector: ScriptedConnector {
            bench: bench.clone(),
            exchanges: VecDeque::new(),
            current: None,
            segments: VecDeque::new(),
            reset_after_segments: false,
        },
        sleeper: SimSleep {
            bench: bench.clone(),
            fail_domain: None,
        },
        clock: VirtualClock {
            bench: bench.clone(),
            now: 0,
        },
        sink: LogSink {
            bench: bench.clone(),
        },
        bench,
    }
}

/// Synthetic JPEG: SOI marker, a counting payload, EOI marker.
pub fn jpeg(len: usize) -> Vec<u8> {
    let mut bytes: Vec<u8> = (0..len)
        .map(|index| u8::try_from(index % 251).unwrap_or(0))
        .collect();
    if len >= 4 {
        bytes[..2].copy_from_slice(&[0xFF, 0xD8]);
        bytes[len - 2..].copy_from_slice(&[0xFF, 0xD9]);
    }
    bytes
}

pub fn config() -> DeviceConfig {
    DeviceConfig::from_parts(
        "field-net",
        "hunter22",
        "http://192.168.4.1:5000/upload",
        "ESP32_CAM_001",
        "test-key",
    )
    .expect("valid config")
    .with_timing(CycleTiming::DEFAULT)
}

pub const OK_RESPONSE: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 15\r\n\r\n{\"stored\":true}";
