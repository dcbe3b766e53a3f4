//! Voltage range auto-selection and key-ladder decoding.

use crate::config::KeyBand;
use crate::telemetry::{Key, VoltageRange};

/// Chooses between the high-gain and low-gain voltage taps.
///
/// Stays on the high-gain (`Low`) range while it has headroom and
/// switches with hysteresis so a reading near the boundary does not
/// chatter between ranges.
#[derive(Debug)]
pub struct RangeSelector {
    range: VoltageRange,
    up_raw: u16,
    down_raw: u16,
}

impl RangeSelector {
    pub fn new(up_raw: u16, down_raw: u16) -> Self {
        Self { range: VoltageRange::Low, up_raw, down_raw }
    }

    pub fn range(&self) -> VoltageRange {
        self.range
    }

    /// Update from this cycle's raw taps.  Returns `true` on a switch.
    pub fn select(&mut self, lo_raw: u16, hi_raw: u16) -> bool {
        let next = match self.range {
            VoltageRange::Low if lo_raw >= self.up_raw => VoltageRange::High,
            VoltageRange::High if hi_raw <= self.down_raw => VoltageRange::Low,
            current => current,
        };
        let switched = next != self.range;
        self.range = next;
        switched
    }
}

/// Decodes and debounces the resistor-ladder key input.
#[derive(Debug)]
pub struct KeyDecoder {
    bands: heapless::Vec<KeyBand, 8>,
    debounce: u8,
    candidate: Key,
    count: u8,
    stable: Key,
}

impl KeyDecoder {
    pub fn new(bands: heapless::Vec<KeyBand, 8>, debounce: u8) -> Self {
        Self {
            bands,
            debounce: debounce.max(1),
            candidate: Key::None,
            count: 0,
            stable: Key::None,
        }
    }

    fn decode(&self, raw: u16) -> Key {
        self.bands
            .iter()
            .find(|b| raw <= b.max_raw)
            .map_or(Key::None, |b| b.key)
    }

    /// Feed one raw sample; returns the debounced key.
    pub fn push(&mut self, raw: u16) -> Key {
        let key = self.decode(raw);
        if key == self.candidate {
            self.count = self.count.saturating_add(1);
        } else {
            self.candidate = key;
            self.count = 1;
        }
        if self.count >= self.debounce {
            self.stable = self.candidate;
        }
        self.stable
    }
}
