//! Log-based display adapter.
//!
//! Implements [`DisplayPort`] by writing the display contents to the
//! logger (UART / USB-CDC in production).  A panel driver would implement
//! the same trait.  Only changed frames are logged so the 250 ms refresh
//! does not flood the console.

use log::info;

use crate::app::ports::DisplayPort;
use crate::telemetry::ConnectivityStatus;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Frame {
    /// Tenths of a degree / percent; finer changes are not shown.
    temperature_dc: i32,
    fulfillment_dpct: i32,
    status: ConnectivityStatus,
}

#[derive(Default)]
pub struct LogDisplay {
    last: Option<Frame>,
    frames: u32,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames actually written.
    pub fn frames(&self) -> u32 {
        self.frames
    }
}

impl DisplayPort for LogDisplay {
    fn render(&mut self, temperature_c: f32, fulfillment_pct: f32, status: ConnectivityStatus) {
        let frame = Frame {
            temperature_dc: (temperature_c * 10.0).round() as i32,
            fulfillment_dpct: (fulfillment_pct * 10.0).round() as i32,
            status,
        };
        if self.last == Some(frame) {
            return;
        }
        self.last = Some(frame);
        self.frames += 1;
        info!(
            "DISP | T={:.1}\u{00b0}C | charged={:.1}% | net={:?}",
            temperature_c, fulfillment_pct, status
        );
    }
}
