//! Per-channel noise filters.
//!
//! Both filters operate on raw counts (as `f32`) ahead of linearisation.
//! The moving average keeps a fixed-size ring buffer, no heap.

use crate::config::FilterKind;

/// Largest supported moving-average window.
pub const MAX_WINDOW: usize = 32;

#[derive(Debug, Clone)]
pub enum ChannelFilter {
    MovingAverage {
        ring: [f32; MAX_WINDOW],
        window: usize,
        head: usize,
        count: usize,
    },
    Exponential {
        alpha: f32,
        state: Option<f32>,
    },
}

impl ChannelFilter {
    pub fn new(kind: FilterKind) -> Self {
        match kind {
            FilterKind::MovingAverage { window } => Self::MovingAverage {
                ring: [0.0; MAX_WINDOW],
                window: (window as usize).clamp(1, MAX_WINDOW),
                head: 0,
                count: 0,
            },
            FilterKind::Exponential { alpha } => Self::Exponential {
                alpha: alpha.clamp(f32::MIN_POSITIVE, 1.0),
                state: None,
            },
        }
    }

    /// Feed one sample, return the filtered value.
    pub fn push(&mut self, sample: f32) -> f32 {
        match self {
            Self::MovingAverage { ring, window, head, count } => {
                ring[*head] = sample;
                *head = (*head + 1) % *window;
                if *count < *window {
                    *count += 1;
                }
                let sum: f32 = ring[..*count].iter().sum();
                sum / *count as f32
            }
            Self::Exponential { alpha, state } => {
                let y = match *state {
                    Some(prev) => prev + *alpha * (sample - prev),
                    // Seed with the first sample rather than ramping from zero.
                    None => sample,
                };
                *state = Some(y);
                y
            }
        }
    }

    /// Last filtered value without feeding a new sample.
    pub fn value(&self) -> Option<f32> {
        match self {
            Self::MovingAverage { ring, count, .. } => {
                if *count == 0 {
                    None
                } else {
                    Some(ring[..*count].iter().sum::<f32>() / *count as f32)
                }
            }
            Self::Exponential { state, .. } => *state,
        }
    }

    /// The window is full (moving average) or seeded (exponential).
    pub fn is_warm(&self) -> bool {
        match self {
            Self::MovingAverage { window, count, .. } => count == window,
            Self::Exponential { state, .. } => state.is_some(),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::MovingAverage { head, count, .. } => {
                *head = 0;
                *count = 0;
            }
            Self::Exponential { state, .. } => *state = None,
        }
    }
}
