//! Power-down plan executed once at the end of every cycle.
//!
//! Steps run strictly in catalog order: sensor, radio, retained domains, then
//! the timed suspend. The plan also carries the wake interval and the settle
//! time that lets buffered diagnostics drain before the CPU stops.

use core::fmt;
use core::time::Duration;

use super::PowerState;
use crate::config::CycleTiming;

/// Retained-memory and peripheral domains switched off for sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PowerDomain {
    RtcPeripherals,
    RtcSlowMemory,
    RtcFastMemory,
}

impl fmt::Display for PowerDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerDomain::RtcPeripherals => "rtc-peripherals",
            PowerDomain::RtcSlowMemory => "rtc-slow-memory",
            PowerDomain::RtcFastMemory => "rtc-fast-memory",
        })
    }
}

/// Domains disabled during [`PowerState::DomainShutdown`].
pub const SLEEP_DISABLED_DOMAINS: [PowerDomain; 3] = [
    PowerDomain::RtcPeripherals,
    PowerDomain::RtcSlowMemory,
    PowerDomain::RtcFastMemory,
];

/// One ordered step of the power-down sequence.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerDownStep {
    /// State entered when the step starts.
    pub enters: PowerState,
    pub summary: &'static str,
}

impl PowerDownStep {
    pub const fn new(enters: PowerState, summary: &'static str) -> Self {
        Self { enters, summary }
    }
}

/// Ordered steps that take the device from active to sleeping.
pub const POWER_DOWN_STEPS: [PowerDownStep; 4] = [
    // De-initialise the camera, then hold it in power-down.
    PowerDownStep::new(PowerState::SensorShutdown, "sensor off"),
    // Leave the network, forget the association, stop both radios.
    PowerDownStep::new(PowerState::RadioShutdown, "radio off"),
    PowerDownStep::new(PowerState::DomainShutdown, "retained domains off"),
    // Arm the wake timer, flush diagnostics, settle, suspend.
    PowerDownStep::new(PowerState::Sleeping, "suspend"),
];

/// Plan assembled once per cycle and executed exactly once.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerDownPlan {
    steps: &'static [PowerDownStep],
    pub domains: &'static [PowerDomain],
    pub wake_interval: Duration,
    pub settle: Duration,
}

impl PowerDownPlan {
    pub const fn new(wake_interval: Duration, settle: Duration) -> Self {
        Self {
            steps: &POWER_DOWN_STEPS,
            domains: &SLEEP_DISABLED_DOMAINS,
            wake_interval,
            settle,
        }
    }

    pub const fn from_timing(timing: &CycleTiming) -> Self {
        Self::new(timing.wake_interval, timing.pre_sleep_settle)
    }

    /// Steps in execution order.
    pub const fn steps(&self) -> &'static [PowerDownStep] {
        self.steps
    }

    /// Returns the number of steps contained in the plan.
    pub const fn step_count(&self) -> usize {
        self.steps.len()
    }
}
