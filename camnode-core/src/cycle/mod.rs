//! One wake cycle, from association to suspend.
//!
//! The controller is strictly linear: link up, configure the sensor, acquire
//! (bounded retries), upload (bounded retries, only with a link), release the
//! frame, then hand everything to the power-down sequencer. Every non-fatal
//! failure is absorbed here. The only error that escapes [`CycleController::run`]
//! is a sensor that cannot be initialised, which the platform answers with a
//! full restart.

use core::fmt;
use core::time::Duration;

use crate::capture::{AcquisitionUnit, FrameSource, ImageArtifact, MemoryClass, SensorSetup};
use crate::config::DeviceConfig;
use crate::link::{LinkPolicy, LinkReport, RadioDriver, RadioLink};
use crate::power::{PowerDownPlan, PowerDownReport, PowerDownSequencer, SleepController};
use crate::telemetry::{
    CaptureTelemetry, CycleTelemetry, DiagnosticSink, LinkTelemetry, SensorTelemetry,
    TELEMETRY_RING_CAPACITY, Telemetry, TelemetryEventKind, TelemetryInstant, TelemetryPayload,
    Timebase, UploadTelemetry,
};
use crate::upload::{FailureReason, HttpConnector, UploadClient};

/// Phases of a wake cycle. `Sleeping` is terminal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CyclePhase {
    Linking,
    Configuring,
    Acquiring,
    Uploading,
    Releasing,
    PoweringDown,
    Sleeping,
}

impl CyclePhase {
    pub const fn is_terminal(self) -> bool {
        matches!(self, CyclePhase::Sleeping)
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CyclePhase::Linking => "linking",
            CyclePhase::Configuring => "configuring",
            CyclePhase::Acquiring => "acquiring",
            CyclePhase::Uploading => "uploading",
            CyclePhase::Releasing => "releasing",
            CyclePhase::PoweringDown => "powering-down",
            CyclePhase::Sleeping => "sleeping",
        })
    }
}

/// How the cycle ended from the image's point of view.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// The endpoint answered 200.
    Uploaded { attempts: u8 },
    /// Every upload attempt failed.
    UploadFailed {
        attempts: u8,
        last: Option<FailureReason>,
    },
    /// A frame was captured but the link never came up.
    NoLink,
    /// Every capture attempt came back empty.
    NoImage,
}

impl CycleOutcome {
    pub const fn is_success(self) -> bool {
        matches!(self, CycleOutcome::Uploaded { .. })
    }

    const fn last_failure(self) -> Option<FailureReason> {
        match self {
            CycleOutcome::Uploaded { .. } | CycleOutcome::NoImage => None,
            CycleOutcome::UploadFailed { last, .. } => last,
            CycleOutcome::NoLink => Some(FailureReason::NoLink),
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Uploaded { attempts } => write!(f, "uploaded after {attempts} attempt(s)"),
            CycleOutcome::UploadFailed { attempts, .. } => {
                write!(f, "upload failed after {attempts} attempt(s)")
            }
            CycleOutcome::NoLink => f.write_str("no link, upload skipped"),
            CycleOutcome::NoImage => f.write_str("no image captured"),
        }
    }
}

/// Fatal conditions that end the cycle without powering down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleFault {
    /// The camera peripheral could not be initialised; restart the device.
    SensorInit,
}

impl fmt::Display for CycleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleFault::SensorInit => f.write_str("camera init failed, restart required"),
        }
    }
}

/// Everything a hosted caller needs to know about a completed cycle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub link: LinkReport,
    pub sensor: SensorSetup,
    pub capture_attempts: u8,
    pub upload_attempts: u8,
    /// Size of the captured frame, when one was acquired.
    pub artifact_len: Option<usize>,
    /// Body bytes written by the final upload attempt.
    pub body_bytes_sent: usize,
    /// Time spent before power-down started.
    pub active_for: Duration,
    pub power: PowerDownReport,
    pub phase: CyclePhase,
}

struct UploadSummary {
    outcome: CycleOutcome,
    attempts: u8,
    body_bytes_sent: usize,
}

/// Drives one wake cycle over the hardware abstractions.
pub struct CycleController<R, S, C, P, T, K>
where
    T: Timebase,
{
    config: DeviceConfig,
    memory: MemoryClass,
    link: RadioLink<R>,
    camera: AcquisitionUnit<S>,
    uploader: UploadClient<C>,
    sleeper: P,
    timebase: T,
    telemetry: Telemetry<T::Instant, K, TELEMETRY_RING_CAPACITY>,
    phase: CyclePhase,
}

impl<R, S, C, P, T, K> CycleController<R, S, C, P, T, K>
where
    R: RadioDriver,
    S: FrameSource,
    C: HttpConnector,
    P: SleepController,
    T: Timebase,
    K: DiagnosticSink<T::Instant>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DeviceConfig,
        memory: MemoryClass,
        radio: R,
        camera: S,
        connector: C,
        sleeper: P,
        timebase: T,
        sink: K,
    ) -> Self {
        let uploader = UploadClient::new(connector, &config);
        Self {
            config,
            memory,
            link: RadioLink::new(radio),
            camera: AcquisitionUnit::new(camera),
            uploader,
            sleeper,
            timebase,
            telemetry: Telemetry::new(sink),
            phase: CyclePhase::Linking,
        }
    }

    pub const fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Runs the cycle to its terminal state.
    ///
    /// On hardware the power-down never returns. Hosted targets get the report
    /// back and must start the next cycle from a fresh controller.
    ///
    /// # Errors
    ///
    /// [`CycleFault::SensorInit`] when the camera cannot be brought up.
    pub async fn run(mut self) -> Result<CycleReport, CycleFault> {
        let timing = self.config.timing;
        let started = self.timebase.now();

        self.enter(CyclePhase::Linking);
        let link = self
            .link
            .connect(
                &self.config.credentials,
                LinkPolicy::from_timing(&timing),
                &mut self.timebase,
            )
            .await;
        let link_event = if link.state.is_connected() {
            TelemetryEventKind::LinkEstablished
        } else {
            TelemetryEventKind::LinkUnavailable
        };
        self.record(
            link_event,
            TelemetryPayload::Link(LinkTelemetry {
                state: link.state,
                polls: link.polls,
                rssi: link.rssi,
                address: link.address,
            }),
        );

        self.enter(CyclePhase::Configuring);
        let Ok(sensor) = self.camera.configure(self.memory) else {
            self.record(TelemetryEventKind::SensorInitFailed, TelemetryPayload::none());
            return Err(CycleFault::SensorInit);
        };
        self.record(
            TelemetryEventKind::SensorConfigured,
            TelemetryPayload::Sensor(SensorTelemetry {
                model: sensor.model,
                frame_size: sensor.preset.frame_size,
                jpeg_quality: sensor.preset.jpeg_quality,
                buffer_count: sensor.preset.buffer_count,
                tuned: sensor.tuning.is_some(),
            }),
        );

        self.enter(CyclePhase::Acquiring);
        let (artifact, capture_attempts) = self.acquire().await;

        let mut artifact_len = None;
        let mut summary = UploadSummary {
            outcome: CycleOutcome::NoImage,
            attempts: 0,
            body_bytes_sent: 0,
        };
        if let Some(artifact) = artifact {
            artifact_len = Some(artifact.len());
            if link.state.is_connected() {
                self.enter(CyclePhase::Uploading);
                summary = self.upload(&artifact).await;
            } else {
                self.record(TelemetryEventKind::UploadSkipped, TelemetryPayload::none());
                summary.outcome = CycleOutcome::NoLink;
            }

            self.enter(CyclePhase::Releasing);
            let released = CaptureTelemetry::acquired(
                capture_attempts,
                timing.capture_attempts,
                artifact.width(),
                artifact.height(),
                artifact.len(),
            );
            self.camera.release(artifact);
            self.record(
                TelemetryEventKind::FrameReleased,
                TelemetryPayload::Capture(released),
            );
        }

        let active_for = self.timebase.now().saturating_duration_since(started);
        self.record(
            TelemetryEventKind::CycleSummary,
            TelemetryPayload::Cycle(CycleTelemetry {
                uploaded: summary.outcome.is_success(),
                capture_attempts,
                upload_attempts: summary.attempts,
                last_failure: summary.outcome.last_failure(),
                active_for: Some(active_for),
            }),
        );

        self.enter(CyclePhase::PoweringDown);
        let power = PowerDownSequencer::new(PowerDownPlan::from_timing(&timing))
            .execute(
                &mut self.camera,
                &mut self.link,
                &mut self.sleeper,
                &mut self.timebase,
                &mut self.telemetry,
            )
            .await;
        self.phase = CyclePhase::Sleeping;

        Ok(CycleReport {
            outcome: summary.outcome,
            link,
            sensor,
            capture_attempts,
            upload_attempts: summary.attempts,
            artifact_len,
            body_bytes_sent: summary.body_bytes_sent,
            active_for,
            power,
            phase: self.phase,
        })
    }

    async fn acquire(&mut self) -> (Option<ImageArtifact>, u8) {
        let timing = self.config.timing;
        let max = timing.capture_attempts;
        for attempt in 1..=max {
            match self.camera.acquire().await {
                Ok(artifact) => {
                    self.record(
                        TelemetryEventKind::FrameAcquired,
                        TelemetryPayload::Capture(CaptureTelemetry::acquired(
                            attempt,
                            max,
                            artifact.width(),
                            artifact.height(),
                            artifact.len(),
                        )),
                    );
                    return (Some(artifact), attempt);
                }
                Err(error) => {
                    self.record(
                        TelemetryEventKind::CaptureFailed,
                        TelemetryPayload::Capture(CaptureTelemetry::failed(attempt, max, error)),
                    );
                    if attempt < max {
                        self.timebase.delay(timing.retry_delay).await;
                    }
                }
            }
        }
        (None, max)
    }

    async fn upload(&mut self, artifact: &ImageArtifact) -> UploadSummary {
        let timing = self.config.timing;
        let max = timing.upload_attempts;
        let mut summary = UploadSummary {
            outcome: CycleOutcome::UploadFailed {
                attempts: 0,
                last: None,
            },
            attempts: 0,
            body_bytes_sent: 0,
        };

        for attempt in 1..=max {
            self.record(
                TelemetryEventKind::UploadStarted,
                TelemetryPayload::Upload(UploadTelemetry::started(attempt, max, artifact.len())),
            );
            let begun = self.timebase.now();
            let image = self.camera.bytes(artifact);
            let report = self.uploader.upload(&mut self.link, image, attempt).await;
            let elapsed = self.timebase.now().saturating_duration_since(begun);

            let body = self.uploader.last_response_body();
            if !body.is_empty() {
                self.telemetry.server_response(attempt, body);
            }

            summary.attempts = attempt;
            summary.body_bytes_sent = report.body_bytes_sent;
            let event = if report.outcome.is_success() {
                TelemetryEventKind::UploadSucceeded
            } else {
                TelemetryEventKind::UploadFailed
            };
            self.record(
                event,
                TelemetryPayload::Upload(UploadTelemetry {
                    attempt,
                    max_attempts: max,
                    outcome: Some(report.outcome),
                    status: report.status,
                    bytes_sent: report.body_bytes_sent,
                    elapsed: Some(elapsed),
                }),
            );

            if report.outcome.is_success() {
                summary.outcome = CycleOutcome::Uploaded { attempts: attempt };
                return summary;
            }
            summary.outcome = CycleOutcome::UploadFailed {
                attempts: attempt,
                last: report.outcome.reason(),
            };
            if attempt < max {
                self.timebase.delay(timing.retry_delay).await;
            }
        }

        self.record(TelemetryEventKind::UploadsExhausted, TelemetryPayload::none());
        summary
    }

    fn enter(&mut self, phase: CyclePhase) {
        self.phase = phase;
        self.record(TelemetryEventKind::PhaseEntered(phase), TelemetryPayload::none());
    }

    fn record(&mut self, event: TelemetryEventKind, payload: TelemetryPayload) {
        let now = self.timebase.now();
        self.telemetry.record(event, payload, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sleeping_is_terminal() {
        for phase in [
            CyclePhase::Linking,
            CyclePhase::Configuring,
            CyclePhase::Acquiring,
            CyclePhase::Uploading,
            CyclePhase::Releasing,
            CyclePhase::PoweringDown,
        ] {
            assert!(!phase.is_terminal(), "{phase}");
        }
        assert!(CyclePhase::Sleeping.is_terminal());
    }

    #[test]
    fn outcome_reports_last_failure() {
        let failed = CycleOutcome::UploadFailed {
            attempts: 3,
            last: Some(FailureReason::ConnectionRefused),
        };
        assert!(!failed.is_success());
        assert_eq!(failed.last_failure(), Some(FailureReason::ConnectionRefused));
        assert_eq!(CycleOutcome::NoLink.last_failure(), Some(FailureReason::NoLink));
        assert!(CycleOutcome::Uploaded { attempts: 1 }.is_success());
        assert_eq!(CycleOutcome::NoImage.last_failure(), None);
    }
}
