//! One-shot boot hook: firmware update from removable media.
//!
//! Runs on the boot thread before any job starts.  Nothing here can stop
//! the charger from booting; every outcome is logged and boot continues.

use log::{error, info, warn};

use crate::app::ports::BootstrapPort;
use crate::error::BootstrapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// No media inserted; normal boot.
    NoMedia,
    /// Media present but the update did not complete.
    UpdateFailed(BootstrapError),
    /// Image flashed from media.
    Updated,
}

pub fn run_bootstrap(port: &mut impl BootstrapPort) -> BootOutcome {
    if !port.storage_detected() {
        warn!("Boot: {}, skipping update", BootstrapError::NoMedia);
        return BootOutcome::NoMedia;
    }
    info!("Boot: update media detected");
    match port.run_firmware_update() {
        Ok(()) => {
            info!("Boot: firmware update applied");
            BootOutcome::Updated
        }
        Err(e) => {
            error!("Boot: firmware update failed ({}), continuing with current image", e);
            BootOutcome::UpdateFailed(e)
        }
    }
}
