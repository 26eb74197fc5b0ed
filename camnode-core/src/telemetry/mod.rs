//! Telemetry event catalog and payload structures shared by firmware and host targets.
//!
//! Every phase transition, retry, and outcome of the wake cycle is recorded as
//! a [`TelemetryRecord`] in a fixed-capacity ring and mirrored to a
//! [`DiagnosticSink`]. Records render as single human-readable lines through
//! their `Display` implementation, which is what both the firmware console and
//! the emulator print.

use core::{fmt, time::Duration};

use heapless::HistoryBuf;

use crate::capture::{AcquisitionError, FrameSize, SensorModel};
use crate::cycle::CyclePhase;
use crate::link::LinkState;
use crate::power::{PowerState, StepFault};
use crate::upload::{FailureReason, UploadOutcome};

/// Identifier used when tracking emitted telemetry events.
pub type EventId = u32;

/// Canonical timestamp units for telemetry records (microseconds).
pub type TimestampMicros = u64;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Trait implemented by monotonic instant wrappers used for telemetry tracking.
pub trait TelemetryInstant: Copy {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;

    /// Microseconds since boot.
    fn as_micros(&self) -> TimestampMicros;
}

/// Monotonic clock and delay source driving the cycle.
pub trait Timebase {
    type Instant: TelemetryInstant;

    fn now(&self) -> Self::Instant;

    async fn delay(&mut self, duration: Duration);
}

/// Discriminated telemetry events emitted during a wake cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    PhaseEntered(CyclePhase),
    LinkEstablished,
    LinkUnavailable,
    SensorConfigured,
    SensorInitFailed,
    CaptureFailed,
    FrameAcquired,
    UploadStarted,
    UploadSucceeded,
    UploadFailed,
    UploadSkipped,
    UploadsExhausted,
    FrameReleased,
    PowerStepEntered(PowerState),
    PowerStepFault(PowerState),
    CycleSummary,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::PhaseEntered(phase) => write!(f, "phase {phase}"),
            TelemetryEventKind::LinkEstablished => f.write_str("link-up"),
            TelemetryEventKind::LinkUnavailable => f.write_str("link-unavailable"),
            TelemetryEventKind::SensorConfigured => f.write_str("sensor-configured"),
            TelemetryEventKind::SensorInitFailed => f.write_str("sensor-init-failed"),
            TelemetryEventKind::CaptureFailed => f.write_str("capture-failed"),
            TelemetryEventKind::FrameAcquired => f.write_str("frame-acquired"),
            TelemetryEventKind::UploadStarted => f.write_str("upload-started"),
            TelemetryEventKind::UploadSucceeded => f.write_str("upload-succeeded"),
            TelemetryEventKind::UploadFailed => f.write_str("upload-failed"),
            TelemetryEventKind::UploadSkipped => f.write_str("upload-skipped"),
            TelemetryEventKind::UploadsExhausted => f.write_str("uploads-exhausted"),
            TelemetryEventKind::FrameReleased => f.write_str("frame-released"),
            TelemetryEventKind::PowerStepEntered(state) => write!(f, "power {state}"),
            TelemetryEventKind::PowerStepFault(state) => write!(f, "power-fault {state}"),
            TelemetryEventKind::CycleSummary => f.write_str("cycle-summary"),
        }
    }
}

impl TelemetryEventKind {
    /// Returns `true` for events that report a degraded or failed step.
    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            TelemetryEventKind::LinkUnavailable
                | TelemetryEventKind::SensorInitFailed
                | TelemetryEventKind::CaptureFailed
                | TelemetryEventKind::UploadFailed
                | TelemetryEventKind::UploadSkipped
                | TelemetryEventKind::UploadsExhausted
                | TelemetryEventKind::PowerStepFault(_)
        )
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TelemetryPayload {
    /// No additional metadata accompanies the event.
    None,
    Link(LinkTelemetry),
    Sensor(SensorTelemetry),
    Capture(CaptureTelemetry),
    Upload(UploadTelemetry),
    Power(PowerTelemetry),
    Cycle(CycleTelemetry),
}

impl TelemetryPayload {
    /// Convenience constructor when no payload data is needed.
    #[must_use]
    pub const fn none() -> Self {
        TelemetryPayload::None
    }
}

/// Association summary.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinkTelemetry {
    pub state: LinkState,
    pub polls: u8,
    pub rssi: Option<i8>,
    pub address: Option<[u8; 4]>,
}

/// Sensor configuration applied at boot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SensorTelemetry {
    pub model: SensorModel,
    pub frame_size: FrameSize,
    pub jpeg_quality: u8,
    pub buffer_count: u8,
    pub tuned: bool,
}

/// Capture attempt details.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CaptureTelemetry {
    pub attempt: u8,
    pub max_attempts: u8,
    pub width: u16,
    pub height: u16,
    pub len: usize,
    pub error: Option<AcquisitionError>,
}

impl CaptureTelemetry {
    #[must_use]
    pub const fn acquired(attempt: u8, max_attempts: u8, width: u16, height: u16, len: usize) -> Self {
        Self {
            attempt,
            max_attempts,
            width,
            height,
            len,
            error: None,
        }
    }

    #[must_use]
    pub const fn failed(attempt: u8, max_attempts: u8, error: AcquisitionError) -> Self {
        Self {
            attempt,
            max_attempts,
            width: 0,
            height: 0,
            len: 0,
            error: Some(error),
        }
    }
}

/// Upload attempt details.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UploadTelemetry {
    pub attempt: u8,
    pub max_attempts: u8,
    pub outcome: Option<UploadOutcome>,
    pub status: Option<u16>,
    pub bytes_sent: usize,
    pub elapsed: Option<Duration>,
}

impl UploadTelemetry {
    #[must_use]
    pub const fn started(attempt: u8, max_attempts: u8, len: usize) -> Self {
        Self {
            attempt,
            max_attempts,
            outcome: None,
            status: None,
            bytes_sent: len,
            elapsed: None,
        }
    }
}

/// Power-down step details.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PowerTelemetry {
    pub state: PowerState,
    pub fault: Option<StepFault>,
    /// Wake interval armed before suspending.
    pub wake_after: Option<Duration>,
}

/// Whole-cycle summary logged before powering down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CycleTelemetry {
    pub uploaded: bool,
    pub capture_attempts: u8,
    pub upload_attempts: u8,
    pub last_failure: Option<FailureReason>,
    pub active_for: Option<Duration>,
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TelemetryRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl<TInstant> fmt::Display for TelemetryRecord<TInstant>
where
    TInstant: TelemetryInstant,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let micros = self.timestamp.as_micros();
        write!(
            f,
            "[{:>4}.{:06}] {}",
            micros / 1_000_000,
            micros % 1_000_000,
            self.event
        )?;
        write_details(f, &self.details)
    }
}

fn write_details(f: &mut fmt::Formatter<'_>, details: &TelemetryPayload) -> fmt::Result {
    match details {
        TelemetryPayload::None => Ok(()),
        TelemetryPayload::Link(link) => {
            write!(f, " state={} polls={}", link.state, link.polls)?;
            if let Some(rssi) = link.rssi {
                write!(f, " rssi={rssi}dBm")?;
            }
            if let Some([a, b, c, d]) = link.address {
                write!(f, " ip={a}.{b}.{c}.{d}")?;
            }
            Ok(())
        }
        TelemetryPayload::Sensor(sensor) => {
            let (width, height) = sensor.frame_size.dimensions();
            write!(
                f,
                " sensor={} {}x{} quality={} buffers={}",
                sensor.model, width, height, sensor.jpeg_quality, sensor.buffer_count
            )?;
            if sensor.tuned {
                f.write_str(" tuned")?;
            }
            Ok(())
        }
        TelemetryPayload::Capture(capture) => {
            write!(f, " attempt={}/{}", capture.attempt, capture.max_attempts)?;
            match capture.error {
                Some(error) => write!(f, " error=\"{error}\""),
                None => write!(
                    f,
                    " {}x{} bytes={}",
                    capture.width, capture.height, capture.len
                ),
            }
        }
        TelemetryPayload::Upload(upload) => {
            write!(f, " attempt={}/{}", upload.attempt, upload.max_attempts)?;
            if let Some(status) = upload.status {
                write!(f, " status={status}")?;
            }
            write!(f, " bytes={}", upload.bytes_sent)?;
            if let Some(elapsed) = upload.elapsed {
                write!(f, " elapsed={}ms", elapsed.as_millis())?;
            }
            if let Some(outcome) = upload.outcome {
                write!(f, " outcome=\"{outcome}\"")?;
                if let Some(reason) = outcome.reason() {
                    write!(f, " hint=\"{}\"", reason.hint())?;
                }
            }
            Ok(())
        }
        TelemetryPayload::Power(power) => {
            if let Some(fault) = power.fault {
                write!(f, " fault=\"{fault}\"")?;
            }
            if let Some(wake_after) = power.wake_after {
                write!(f, " wake_in={}s", wake_after.as_secs())?;
            }
            Ok(())
        }
        TelemetryPayload::Cycle(cycle) => {
            write!(
                f,
                " result={} captures={} uploads={}",
                if cycle.uploaded { "success" } else { "failure" },
                cycle.capture_attempts,
                cycle.upload_attempts
            )?;
            if let Some(reason) = cycle.last_failure {
                write!(f, " last=\"{reason}\"")?;
            }
            if let Some(active_for) = cycle.active_for {
                write!(f, " active={}ms", active_for.as_millis())?;
            }
            Ok(())
        }
    }
}

/// Consumer of telemetry records producing the diagnostic log stream.
pub trait DiagnosticSink<TInstant>
where
    TInstant: TelemetryInstant,
{
    fn emit(&mut self, record: &TelemetryRecord<TInstant>);

    /// Receives the (possibly truncated) body of a server response.
    fn server_response(&mut self, _attempt: u8, _body: &[u8]) {}
}

/// Sink that discards every record.
#[derive(Copy, Clone, Debug, Default)]
pub struct NullSink;

impl<TInstant> DiagnosticSink<TInstant> for NullSink
where
    TInstant: TelemetryInstant,
{
    fn emit(&mut self, _: &TelemetryRecord<TInstant>) {}
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records telemetry events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent telemetry record, if available.
    pub fn latest(&self) -> Option<&TelemetryRecord<TInstant>> {
        self.ring.recent()
    }

    /// Returns the number of records currently stored.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns `true` when no telemetry records are stored.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records an arbitrary telemetry event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            details: payload,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: Copy + TelemetryInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Recorder paired with the sink that mirrors each record as it is written.
pub struct Telemetry<TInstant, S, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    recorder: TelemetryRecorder<TInstant, CAPACITY>,
    sink: S,
}

impl<TInstant, S, const CAPACITY: usize> Telemetry<TInstant, S, CAPACITY>
where
    TInstant: TelemetryInstant,
    S: DiagnosticSink<TInstant>,
{
    pub const fn new(sink: S) -> Self {
        Self {
            recorder: TelemetryRecorder::new(),
            sink,
        }
    }

    /// Records the event and forwards it to the sink.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        payload: TelemetryPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.recorder.record(event, payload, timestamp);
        if let Some(record) = self.recorder.latest() {
            self.sink.emit(record);
        }
        id
    }

    pub fn server_response(&mut self, attempt: u8, body: &[u8]) {
        self.sink.server_response(attempt, body);
    }

    pub fn recorder(&self) -> &TelemetryRecorder<TInstant, CAPACITY> {
        &self.recorder
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Splits into the recorded history and the sink.
    pub fn into_parts(self) -> (TelemetryRecorder<TInstant, CAPACITY>, S) {
        (self.recorder, self.sink)
    }
}
