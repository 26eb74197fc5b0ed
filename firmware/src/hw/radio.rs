//! Station-mode Wi-Fi bound to the core link manager.

use camnode_core::config::WifiCredentials;
use camnode_core::link::RadioDriver;
use embassy_net::Stack;
use embassy_time::with_timeout;
use esp_radio::wifi::{ClientConfig, ModeConfig, PowerSaveMode, WifiController, WifiError};

/// Station interface plus the network stack riding on it.
///
/// The BLE controller is never initialised, so disabling short-range radio
/// has nothing to switch off.
pub struct WifiStation {
    controller: WifiController<'static>,
    stack: Stack<'static>,
}

impl WifiStation {
    pub fn new(controller: WifiController<'static>, stack: Stack<'static>) -> Self {
        Self { controller, stack }
    }
}

impl RadioDriver for WifiStation {
    type Error = WifiError;

    async fn begin(&mut self, credentials: &WifiCredentials) -> Result<(), WifiError> {
        let mode = ModeConfig::Client(
            ClientConfig::default()
                .with_ssid(credentials.ssid.as_str().into())
                .with_password(credentials.passphrase.as_str().into()),
        );
        self.controller.set_config(&mode)?;
        if !matches!(self.controller.is_started(), Ok(true)) {
            self.controller.start_async().await?;
        }
        Ok(())
    }

    async fn associate(&mut self, window: core::time::Duration) -> bool {
        // Association holds while DHCP finishes; only re-issue the handshake
        // when the station has dropped off the access point.
        if !matches!(self.controller.is_connected(), Ok(true)) {
            let window = embassy_time::Duration::try_from(window)
                .unwrap_or(embassy_time::Duration::from_millis(500));
            match with_timeout(window, self.controller.connect_async()).await {
                Ok(Ok(())) => defmt::debug!("wifi: associated"),
                Ok(Err(err)) => defmt::debug!("wifi: association attempt failed: {:?}", err),
                Err(_) => defmt::trace!("wifi: association pending"),
            }
        }
        self.is_associated()
    }

    fn disable_power_save(&mut self) -> Result<(), WifiError> {
        self.controller.set_power_saving(PowerSaveMode::None)
    }

    fn is_associated(&mut self) -> bool {
        matches!(self.controller.is_connected(), Ok(true))
            && self.stack.is_link_up()
            && self.stack.config_v4().is_some()
    }

    fn rssi(&mut self) -> Option<i8> {
        self.controller
            .rssi()
            .ok()
            .and_then(|rssi| i8::try_from(rssi).ok())
    }

    fn ipv4_address(&mut self) -> Option<[u8; 4]> {
        self.stack
            .config_v4()
            .map(|config| config.address.address().octets())
    }

    async fn disconnect(&mut self, forget_credentials: bool) -> Result<(), WifiError> {
        let result = self.controller.disconnect_async().await;
        if forget_credentials {
            self.controller
                .set_config(&ModeConfig::Client(ClientConfig::default()))?;
        }
        result
    }

    async fn stop(&mut self) -> Result<(), WifiError> {
        self.controller.stop_async().await
    }

    fn disable_short_range(&mut self) -> Result<(), WifiError> {
        Ok(())
    }
}
