//! Wireless link management shared by firmware and host targets.
//!
//! [`RadioLink`] owns the station driver for the whole cycle: it associates at
//! wake, answers connectivity probes before every upload attempt, and is torn
//! down by the power-down sequencer.

use core::fmt;
use core::time::Duration;

use crate::config::{CycleTiming, WifiCredentials};
use crate::telemetry::{TelemetryInstant, Timebase};

/// Association state of the station interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// The poll budget ran out without association. Not fatal to the cycle.
    Failed,
}

impl LinkState {
    /// Returns `true` when uploads may be attempted.
    pub const fn is_connected(self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Failed => "failed",
        })
    }
}

/// Abstraction over the wireless station hardware.
pub trait RadioDriver {
    /// Driver-specific failure detail.
    type Error: fmt::Debug;

    /// Configures station mode for `credentials` and powers the radio up.
    async fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), Self::Error>;

    /// Drives the association handshake for at most `window`, then reports
    /// whether the station is associated.
    ///
    /// Drivers that associate in the background only need `is_associated`.
    async fn associate(&mut self, _window: Duration) -> bool {
        self.is_associated()
    }

    /// Keeps the radio fully awake for the short active window.
    fn disable_power_save(&mut self) -> Result<(), Self::Error>;

    /// Reports whether the station is associated and holds an address.
    fn is_associated(&mut self) -> bool;

    /// Received signal strength of the associated access point in dBm.
    fn rssi(&mut self) -> Option<i8> {
        None
    }

    /// Address assigned to the station, when known.
    fn ipv4_address(&mut self) -> Option<[u8; 4]> {
        None
    }

    /// Leaves the network; `forget_credentials` drops the stored association.
    async fn disconnect(&mut self, forget_credentials: bool) -> Result<(), Self::Error>;

    /// Powers down the wireless subsystem.
    async fn stop(&mut self) -> Result<(), Self::Error>;

    /// Disables the co-located short-range (Bluetooth) controller.
    fn disable_short_range(&mut self) -> Result<(), Self::Error>;
}

/// Read-only connectivity probe used before network I/O.
pub trait LinkStatus {
    fn is_connected(&mut self) -> bool;
}

/// Status polling budget for association.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkPolicy {
    pub poll_interval: Duration,
    pub max_polls: u8,
}

impl LinkPolicy {
    pub const fn new(poll_interval: Duration, max_polls: u8) -> Self {
        Self {
            poll_interval,
            max_polls,
        }
    }

    pub const fn from_timing(timing: &CycleTiming) -> Self {
        Self::new(timing.link_poll_interval, timing.link_max_polls)
    }
}

/// Result of a connection attempt, including diagnostics for the log stream.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkReport {
    pub state: LinkState,
    /// Status polls spent before the verdict.
    pub polls: u8,
    pub rssi: Option<i8>,
    pub address: Option<[u8; 4]>,
    /// `false` when the driver refused to leave power-save mode.
    pub power_save_disabled: bool,
}

impl LinkReport {
    const fn failed(polls: u8, power_save_disabled: bool) -> Self {
        Self {
            state: LinkState::Failed,
            polls,
            rssi: None,
            address: None,
            power_save_disabled,
        }
    }
}

/// Steps of the radio teardown that reported an error.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RadioShutdownFaults {
    pub disconnect: bool,
    pub stop: bool,
    pub short_range: bool,
}

impl RadioShutdownFaults {
    /// Returns `true` when every teardown step succeeded.
    pub const fn is_clean(&self) -> bool {
        !(self.disconnect || self.stop || self.short_range)
    }
}

/// Owner of the station driver and its association state.
pub struct RadioLink<R> {
    driver: R,
    state: LinkState,
    /// Set once `connect` associated; cleared by `shut_down`.
    established: bool,
}

impl<R> RadioLink<R>
where
    R: RadioDriver,
{
    pub const fn new(driver: R) -> Self {
        Self {
            driver,
            state: LinkState::Disconnected,
            established: false,
        }
    }

    /// Last state observed by the manager.
    pub const fn state(&self) -> LinkState {
        self.state
    }

    pub fn driver_mut(&mut self) -> &mut R {
        &mut self.driver
    }

    /// Associates with the network, polling status at a fixed interval.
    ///
    /// Each poll gives the driver one interval for its handshake; time the
    /// handshake spends is taken out of the following delay, so the whole
    /// attempt stays within `max_polls * poll_interval`. Exhausting the poll
    /// budget yields [`LinkState::Failed`]; the caller is expected to continue
    /// the cycle without uploading.
    pub async fn connect<T>(
        &mut self,
        credentials: &WifiCredentials,
        policy: LinkPolicy,
        timebase: &mut T,
    ) -> LinkReport
    where
        T: Timebase,
    {
        self.state = LinkState::Connecting;
        self.established = false;

        if self.driver.begin(credentials).await.is_err() {
            self.state = LinkState::Failed;
            return LinkReport::failed(0, false);
        }
        let power_save_disabled = self.driver.disable_power_save().is_ok();

        for poll in 1..=policy.max_polls {
            let started = timebase.now();
            if self.driver.associate(policy.poll_interval).await {
                self.state = LinkState::Connected;
                self.established = true;
                return LinkReport {
                    state: LinkState::Connected,
                    polls: poll,
                    rssi: self.driver.rssi(),
                    address: self.driver.ipv4_address(),
                    power_save_disabled,
                };
            }
            let spent = timebase.now().saturating_duration_since(started);
            let remaining = policy.poll_interval.saturating_sub(spent);
            if poll < policy.max_polls && !remaining.is_zero() {
                timebase.delay(remaining).await;
            }
        }

        self.state = LinkState::Failed;
        LinkReport::failed(policy.max_polls, power_save_disabled)
    }

    /// Re-checks the association against the driver.
    ///
    /// The link may drop and come back between phases, so after a successful
    /// `connect` every call asks the driver and updates the state both ways.
    pub fn is_connected(&mut self) -> bool {
        if !self.established {
            return false;
        }
        self.state = if self.driver.is_associated() {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        };
        self.state.is_connected()
    }

    /// Disconnects (dropping saved credentials) and powers the radios down.
    ///
    /// Every step runs even when an earlier one fails.
    pub async fn shut_down(&mut self) -> RadioShutdownFaults {
        let mut faults = RadioShutdownFaults::default();
        if self.state == LinkState::Connected || self.driver.is_associated() {
            faults.disconnect = self.driver.disconnect(true).await.is_err();
        }
        faults.stop = self.driver.stop().await.is_err();
        faults.short_range = self.driver.disable_short_range().is_err();
        self.state = LinkState::Disconnected;
        self.established = false;
        faults
    }
}

impl<R> LinkStatus for RadioLink<R>
where
    R: RadioDriver,
{
    fn is_connected(&mut self) -> bool {
        RadioLink::is_connected(self)
    }
}
