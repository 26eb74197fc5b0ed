//! Device configuration supplied at startup.
//!
//! Firmware assembles a [`DeviceConfig`] from build-time environment values and
//! the emulator from its command line; nothing in the cycle reads literals.

use core::fmt;
use core::time::Duration;

use heapless::String;

use crate::endpoint::{Endpoint, EndpointError};

/// Longest SSID accepted by 802.11.
pub const MAX_SSID_LEN: usize = 32;
/// Longest WPA2 passphrase.
pub const MAX_PASSPHRASE_LEN: usize = 64;
/// Longest device identifier sent in the `Device-ID` header.
pub const MAX_DEVICE_ID_LEN: usize = 32;
/// Longest API key sent in the `X-API-Key` header.
pub const MAX_API_KEY_LEN: usize = 64;

/// Wireless network credentials.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WifiCredentials {
    pub ssid: String<MAX_SSID_LEN>,
    pub passphrase: String<MAX_PASSPHRASE_LEN>,
}

impl WifiCredentials {
    /// Validates and copies the SSID and passphrase.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the SSID is empty or either value exceeds
    /// its capacity.
    pub fn new(ssid: &str, passphrase: &str) -> Result<Self, ConfigError> {
        if ssid.is_empty() {
            return Err(ConfigError::MissingSsid);
        }
        Ok(Self {
            ssid: String::try_from(ssid).map_err(|_| ConfigError::SsidTooLong)?,
            passphrase: String::try_from(passphrase)
                .map_err(|_| ConfigError::PassphraseTooLong)?,
        })
    }
}

/// Timing and retry budgets for one wake cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CycleTiming {
    /// Interval between association status polls.
    pub link_poll_interval: Duration,
    /// Number of status polls before the link is declared failed.
    pub link_max_polls: u8,
    pub capture_attempts: u8,
    pub upload_attempts: u8,
    /// Fixed delay between capture or upload attempts.
    pub retry_delay: Duration,
    /// Bound on a single upload request.
    pub request_timeout: Duration,
    /// Sleep duration armed on the wake timer.
    pub wake_interval: Duration,
    /// Pause after flushing diagnostics before suspending.
    pub pre_sleep_settle: Duration,
}

impl CycleTiming {
    pub const DEFAULT: Self = Self {
        link_poll_interval: Duration::from_millis(500),
        link_max_polls: 30,
        capture_attempts: 3,
        upload_attempts: 3,
        retry_delay: Duration::from_secs(2),
        request_timeout: Duration::from_secs(30),
        wake_interval: Duration::from_secs(60),
        pre_sleep_settle: Duration::from_millis(100),
    };

    /// Returns a copy with a different wake interval.
    #[must_use]
    pub const fn with_wake_interval(mut self, wake_interval: Duration) -> Self {
        self.wake_interval = wake_interval;
        self
    }

    /// Upper bound on time spent associating before giving up.
    #[must_use]
    pub fn link_budget(&self) -> Duration {
        self.link_poll_interval * u32::from(self.link_max_polls)
    }
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Everything the cycle needs that differs between deployments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceConfig {
    pub credentials: WifiCredentials,
    pub endpoint: Endpoint,
    pub device_id: String<MAX_DEVICE_ID_LEN>,
    pub api_key: String<MAX_API_KEY_LEN>,
    pub timing: CycleTiming,
}

impl DeviceConfig {
    /// Builds a configuration from raw strings using default timing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when any value is missing, too long, or the
    /// endpoint URL does not parse.
    pub fn from_parts(
        ssid: &str,
        passphrase: &str,
        endpoint: &str,
        device_id: &str,
        api_key: &str,
    ) -> Result<Self, ConfigError> {
        let credentials = WifiCredentials::new(ssid, passphrase)?;
        let endpoint = Endpoint::parse(endpoint).map_err(ConfigError::Endpoint)?;
        if device_id.is_empty() {
            return Err(ConfigError::MissingDeviceId);
        }
        if !is_header_safe(device_id) {
            return Err(ConfigError::InvalidHeaderValue);
        }
        if !is_header_safe(api_key) {
            return Err(ConfigError::InvalidHeaderValue);
        }

        Ok(Self {
            credentials,
            endpoint,
            device_id: String::try_from(device_id).map_err(|_| ConfigError::DeviceIdTooLong)?,
            api_key: String::try_from(api_key).map_err(|_| ConfigError::ApiKeyTooLong)?,
            timing: CycleTiming::DEFAULT,
        })
    }

    /// Replaces the timing budgets.
    #[must_use]
    pub fn with_timing(mut self, timing: CycleTiming) -> Self {
        self.timing = timing;
        self
    }
}

/// Header values must not be able to terminate the header block early.
fn is_header_safe(value: &str) -> bool {
    value.bytes().all(|b| b == b' ' || b.is_ascii_graphic())
}

/// Rejections raised while assembling a [`DeviceConfig`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    MissingSsid,
    SsidTooLong,
    PassphraseTooLong,
    MissingDeviceId,
    DeviceIdTooLong,
    ApiKeyTooLong,
    /// A header value contains control characters.
    InvalidHeaderValue,
    Endpoint(EndpointError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingSsid => f.write_str("wifi ssid is empty"),
            ConfigError::SsidTooLong => f.write_str("wifi ssid too long"),
            ConfigError::PassphraseTooLong => f.write_str("wifi passphrase too long"),
            ConfigError::MissingDeviceId => f.write_str("device id is empty"),
            ConfigError::DeviceIdTooLong => f.write_str("device id too long"),
            ConfigError::ApiKeyTooLong => f.write_str("api key too long"),
            ConfigError::InvalidHeaderValue => {
                f.write_str("device id or api key contains control characters")
            }
            ConfigError::Endpoint(err) => write!(f, "endpoint: {err}"),
        }
    }
}
