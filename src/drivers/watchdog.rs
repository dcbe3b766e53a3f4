//! Task Watchdog Timer (TWDT) driver.
//!
//! Resets the device if the Main job stops feeding it.  The calling task
//! is subscribed on the first `feed()`, so the watchdog can be built on the
//! boot thread and moved into the job that owns it.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

use log::{info, warn};

pub struct Watchdog {
    timeout_ms: u32,
    /// Subscription attempted (once, from the feeding task).
    attempted: bool,
    armed: bool,
    feeds: u32,
}

impl Watchdog {
    pub fn new(timeout_ms: u32) -> Self {
        Self { timeout_ms, attempted: false, armed: false, feeds: 0 }
    }

    /// Feed the watchdog from the supervised task.
    pub fn feed(&mut self) {
        if !self.attempted {
            self.attempted = true;
            self.armed = self.subscribe();
        }
        #[cfg(target_os = "espidf")]
        if self.armed {
            // SAFETY: the calling task was added in subscribe().
            unsafe {
                esp_task_wdt_reset();
            }
        }
        self.feeds = self.feeds.wrapping_add(1);
    }

    pub fn feeds(&self) -> u32 {
        self.feeds
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    #[cfg(target_os = "espidf")]
    fn subscribe(&self) -> bool {
        // SAFETY: plain config calls; a null handle means "current task".
        unsafe {
            let cfg = esp_task_wdt_config_t {
                timeout_ms: self.timeout_ms,
                idle_core_mask: 0,
                trigger_panic: true,
            };
            let ret = esp_task_wdt_reconfigure(&cfg);
            if ret != ESP_OK {
                warn!("Watchdog: reconfigure returned {} (may already be configured)", ret);
            }
            let ret = esp_task_wdt_add(core::ptr::null_mut());
            if ret == ESP_OK {
                info!("Watchdog: subscribed ({} ms timeout, panic on trigger)", self.timeout_ms);
                true
            } else {
                warn!("Watchdog: failed to subscribe ({})", ret);
                false
            }
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn subscribe(&self) -> bool {
        if self.timeout_ms == 0 {
            warn!("Watchdog(sim): zero timeout");
        }
        info!("Watchdog(sim): no-op ({} ms)", self.timeout_ms);
        true
    }
}
