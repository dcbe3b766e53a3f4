//! WiFi station-mode adapter.
//!
//! Implements [`LinkDriver`] for the connectivity FSM.  The radio stack
//! runs on the protocol core; this adapter only starts association and
//! reports progress, it never blocks the Connect job.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: `esp_idf_svc::wifi::EspWifi` in STA mode.
//! - **all other targets**: simulated association that completes after a
//!   fixed number of polls.

use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

use crate::app::ports::{LinkDriver, LinkStatus};
use crate::error::ConnectivityError;

#[cfg(target_os = "espidf")]
use esp_idf_svc::wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi};

// ───────────────────────────────────────────────────────────────
// ESP-IDF
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub struct WifiLink {
    wifi: EspWifi<'static>,
    pending: bool,
}

#[cfg(target_os = "espidf")]
impl WifiLink {
    pub fn new(wifi: EspWifi<'static>) -> Self {
        Self { wifi, pending: false }
    }
}

#[cfg(target_os = "espidf")]
impl LinkDriver for WifiLink {
    fn begin_connect(&mut self, ssid: &str, password: &str) -> Result<(), ConnectivityError> {
        let auth_method = if password.is_empty() { AuthMethod::None } else { AuthMethod::WPA2Personal };
        let config = Configuration::Client(ClientConfiguration {
            ssid: ssid.try_into().map_err(|_| ConnectivityError::InvalidSsid)?,
            password: password.try_into().map_err(|_| ConnectivityError::InvalidPassword)?,
            auth_method,
            ..Default::default()
        });
        self.wifi.set_configuration(&config).map_err(|e| {
            warn!("WiFi: set_configuration failed ({})", e);
            ConnectivityError::AuthFailed
        })?;
        if !self.wifi.is_started().unwrap_or(false) {
            self.wifi.start().map_err(|e| {
                warn!("WiFi: start failed ({})", e);
                ConnectivityError::LinkLost
            })?;
        }
        // Returns immediately; association completes on the radio core.
        self.wifi.connect().map_err(|e| {
            warn!("WiFi: connect request failed ({})", e);
            ConnectivityError::AuthFailed
        })?;
        self.pending = true;
        info!("WiFi: associating with '{}'", ssid);
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        match self.wifi.is_up() {
            Ok(true) => {
                self.pending = false;
                LinkStatus::Up
            }
            Ok(false) if self.pending => LinkStatus::Pending,
            Ok(false) => LinkStatus::Down,
            Err(e) => {
                warn!("WiFi: status query failed ({})", e);
                self.pending = false;
                LinkStatus::Failed(ConnectivityError::LinkLost)
            }
        }
    }

    fn disconnect(&mut self) {
        self.pending = false;
        if let Err(e) = self.wifi.disconnect() {
            warn!("WiFi: disconnect failed ({})", e);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
pub struct WifiLink {
    polls_to_up: u32,
    /// Polls left until the pending attempt completes.
    remaining: Option<u32>,
    up: bool,
}

#[cfg(not(target_os = "espidf"))]
impl WifiLink {
    /// Every attempt completes after `polls_to_up` status polls.
    pub fn sim(polls_to_up: u32) -> Self {
        Self { polls_to_up, remaining: None, up: false }
    }
}

#[cfg(not(target_os = "espidf"))]
impl LinkDriver for WifiLink {
    fn begin_connect(&mut self, ssid: &str, _password: &str) -> Result<(), ConnectivityError> {
        info!("WiFi(sim): associating with '{}'", ssid);
        self.up = false;
        self.remaining = Some(self.polls_to_up);
        Ok(())
    }

    fn status(&mut self) -> LinkStatus {
        match self.remaining {
            Some(0) => {
                self.remaining = None;
                self.up = true;
                info!("WiFi(sim): link up");
                LinkStatus::Up
            }
            Some(n) => {
                self.remaining = Some(n - 1);
                LinkStatus::Pending
            }
            None if self.up => LinkStatus::Up,
            None => LinkStatus::Down,
        }
    }

    fn disconnect(&mut self) {
        self.remaining = None;
        self.up = false;
    }
}
