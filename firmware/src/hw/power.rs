//! Deep-sleep entry through the RTC controller.

use core::time::Duration;

use camnode_core::power::{PowerDomain, SleepController};
use embassy_time::Timer;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;
use heapless::Vec;

#[derive(Debug)]
pub enum SleepError {
    /// The same domain was requested twice.
    DomainRepeated(PowerDomain),
    ZeroWakeInterval,
}

/// Deep-sleep controller.
///
/// `sleep_deep` gates every RTC domain no wake source holds, so disabling a
/// domain only records the request for the log.
pub struct RtcSleep {
    rtc: Rtc<'static>,
    wake: Option<TimerWakeupSource>,
    /// Used when arming failed so the node still wakes up.
    fallback_wake: Duration,
    disabled: Vec<PowerDomain, 3>,
}

impl RtcSleep {
    pub fn new(rtc: Rtc<'static>, fallback_wake: Duration) -> Self {
        Self {
            rtc,
            wake: None,
            fallback_wake,
            disabled: Vec::new(),
        }
    }
}

impl SleepController for RtcSleep {
    type Error = SleepError;

    fn disable_domain(&mut self, domain: PowerDomain) -> Result<(), SleepError> {
        if self.disabled.contains(&domain) {
            return Err(SleepError::DomainRepeated(domain));
        }
        self.disabled
            .push(domain)
            .map_err(|_| SleepError::DomainRepeated(domain))?;
        defmt::debug!("power: {} off", defmt::Display2Format(&domain));
        Ok(())
    }

    fn arm_wake_timer(&mut self, after: Duration) -> Result<(), SleepError> {
        if after.is_zero() {
            return Err(SleepError::ZeroWakeInterval);
        }
        self.wake = Some(TimerWakeupSource::new(after));
        Ok(())
    }

    async fn flush_diagnostics(&mut self) {
        defmt::flush();
        // Let the UART FIFO drain behind the logger.
        Timer::after_millis(5).await;
    }

    fn suspend(&mut self) {
        let timer = self
            .wake
            .take()
            .unwrap_or_else(|| TimerWakeupSource::new(self.fallback_wake));
        self.rtc.sleep_deep(&[&timer]);
    }
}
