//! Power-down sequencing shared by firmware and host targets.
//!
//! The sequencer is a one-way state machine driven by the plan's step table.
//! It walks `Active -> SensorShutdown -> RadioShutdown -> DomainShutdown ->
//! Sleeping` exactly once; a failing step is recorded and the walk continues,
//! so the device always reaches the suspended state.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::capture::{AcquisitionUnit, FrameSource};
use crate::link::{RadioDriver, RadioLink};
use crate::telemetry::{
    DiagnosticSink, PowerTelemetry, Telemetry, TelemetryEventKind, TelemetryPayload, Timebase,
};

pub mod plan;

pub use plan::{POWER_DOWN_STEPS, PowerDomain, PowerDownPlan, PowerDownStep, SLEEP_DISABLED_DOMAINS};

/// Upper bound on faults a single power-down can record.
pub const MAX_STEP_FAULTS: usize = 8;

/// Power-down progress.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerState {
    Active,
    SensorShutdown,
    RadioShutdown,
    DomainShutdown,
    Sleeping,
}

impl PowerState {
    /// The only state reachable from `self`.
    pub const fn next(self) -> Option<Self> {
        match self {
            PowerState::Active => Some(PowerState::SensorShutdown),
            PowerState::SensorShutdown => Some(PowerState::RadioShutdown),
            PowerState::RadioShutdown => Some(PowerState::DomainShutdown),
            PowerState::DomainShutdown => Some(PowerState::Sleeping),
            PowerState::Sleeping => None,
        }
    }

    /// Returns `true` when the state represents a terminal outcome.
    pub const fn is_terminal(self) -> bool {
        matches!(self, PowerState::Sleeping)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerState::Active => "active",
            PowerState::SensorShutdown => "sensor-shutdown",
            PowerState::RadioShutdown => "radio-shutdown",
            PowerState::DomainShutdown => "domain-shutdown",
            PowerState::Sleeping => "sleeping",
        })
    }
}

/// A power-down step that reported an error.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepFault {
    SensorDeinit,
    RadioDisconnect,
    RadioStop,
    ShortRangeRadio,
    Domain(PowerDomain),
    WakeTimer,
}

impl fmt::Display for StepFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFault::SensorDeinit => f.write_str("camera deinit failed"),
            StepFault::RadioDisconnect => f.write_str("wifi disconnect failed"),
            StepFault::RadioStop => f.write_str("wifi stop failed"),
            StepFault::ShortRangeRadio => f.write_str("bluetooth disable failed"),
            StepFault::Domain(domain) => write!(f, "{domain} power-down failed"),
            StepFault::WakeTimer => f.write_str("wake timer arm failed"),
        }
    }
}

/// Sleep-related hardware: power domains, the wake timer, and suspend.
pub trait SleepController {
    /// Driver-specific failure detail.
    type Error: fmt::Debug;

    fn disable_domain(&mut self, domain: PowerDomain) -> Result<(), Self::Error>;

    fn arm_wake_timer(&mut self, after: Duration) -> Result<(), Self::Error>;

    /// Drains buffered diagnostic output.
    async fn flush_diagnostics(&mut self);

    /// Enters the lowest-power state.
    ///
    /// Does not return on hardware: the next wake restarts the program. Hosted
    /// implementations return so the caller can exit or build a fresh cycle.
    fn suspend(&mut self);
}

/// What the power-down did, for hosted callers and tests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PowerDownReport {
    pub final_state: PowerState,
    /// States entered, in order.
    pub visited: Vec<PowerState, 4>,
    pub faults: Vec<StepFault, MAX_STEP_FAULTS>,
}

/// Executes a [`PowerDownPlan`] once.
pub struct PowerDownSequencer {
    plan: PowerDownPlan,
    state: PowerState,
    report: PowerDownReport,
}

impl PowerDownSequencer {
    pub const fn new(plan: PowerDownPlan) -> Self {
        Self {
            plan,
            state: PowerState::Active,
            report: PowerDownReport {
                final_state: PowerState::Active,
                visited: Vec::new(),
                faults: Vec::new(),
            },
        }
    }

    pub const fn state(&self) -> PowerState {
        self.state
    }

    pub const fn plan(&self) -> &PowerDownPlan {
        &self.plan
    }

    /// Runs every step in order and suspends.
    ///
    /// Consumes the sequencer: a power-down cannot be restarted or rolled back.
    pub async fn execute<S, R, P, T, K, const CAPACITY: usize>(
        mut self,
        camera: &mut AcquisitionUnit<S>,
        link: &mut RadioLink<R>,
        sleeper: &mut P,
        timebase: &mut T,
        telemetry: &mut Telemetry<T::Instant, K, CAPACITY>,
    ) -> PowerDownReport
    where
        S: FrameSource,
        R: RadioDriver,
        P: SleepController,
        T: Timebase,
        K: DiagnosticSink<T::Instant>,
    {
        for step in self.plan.steps() {
            if self.state.next() != Some(step.enters) {
                continue;
            }
            self.enter(step.enters, timebase, telemetry);
            match step.enters {
                PowerState::SensorShutdown => {
                    if camera.shut_down().is_err() {
                        self.fault(StepFault::SensorDeinit, timebase, telemetry);
                    }
                }
                PowerState::RadioShutdown => {
                    let faults = link.shut_down().await;
                    if faults.disconnect {
                        self.fault(StepFault::RadioDisconnect, timebase, telemetry);
                    }
                    if faults.stop {
                        self.fault(StepFault::RadioStop, timebase, telemetry);
                    }
                    if faults.short_range {
                        self.fault(StepFault::ShortRangeRadio, timebase, telemetry);
                    }
                }
                PowerState::DomainShutdown => {
                    for &domain in self.plan.domains {
                        if sleeper.disable_domain(domain).is_err() {
                            self.fault(StepFault::Domain(domain), timebase, telemetry);
                        }
                    }
                }
                PowerState::Sleeping => {
                    if sleeper.arm_wake_timer(self.plan.wake_interval).is_err() {
                        self.fault(StepFault::WakeTimer, timebase, telemetry);
                    }
                    sleeper.flush_diagnostics().await;
                    timebase.delay(self.plan.settle).await;
                    sleeper.suspend();
                }
                PowerState::Active => {}
            }
        }

        self.report.final_state = self.state;
        self.report
    }

    fn enter<T, K, const CAPACITY: usize>(
        &mut self,
        next: PowerState,
        timebase: &T,
        telemetry: &mut Telemetry<T::Instant, K, CAPACITY>,
    ) where
        T: Timebase,
        K: DiagnosticSink<T::Instant>,
    {
        self.state = next;
        let _ = self.report.visited.push(next);
        let wake_after = next.is_terminal().then_some(self.plan.wake_interval);
        telemetry.record(
            TelemetryEventKind::PowerStepEntered(next),
            TelemetryPayload::Power(PowerTelemetry {
                state: next,
                fault: None,
                wake_after,
            }),
            timebase.now(),
        );
    }

    fn fault<T, K, const CAPACITY: usize>(
        &mut self,
        fault: StepFault,
        timebase: &T,
        telemetry: &mut Telemetry<T::Instant, K, CAPACITY>,
    ) where
        T: Timebase,
        K: DiagnosticSink<T::Instant>,
    {
        let _ = self.report.faults.push(fault);
        telemetry.record(
            TelemetryEventKind::PowerStepFault(self.state),
            TelemetryPayload::Power(PowerTelemetry {
                state: self.state,
                fault: Some(fault),
                wake_after: None,
            }),
            timebase.now(),
        );
    }
}
