//! Network connectivity state machine.
//!
//! Runs on the Connect job (10 ms).  Each [`ConnectivityFsm::run`] call
//! advances at most one transition and never waits on the radio: the
//! link driver is polled, not awaited.
//!
//! ```text
//!                 begin_connect
//!  Disconnected ────────────────▶ Connecting ── Up ──▶ Connected
//!       ▲   ▲                        │                    │
//!       │   └─── failure (< N) ──────┤                    │ lost
//!       │                            │ failure (≥ N)      │
//!       │                            ▼                    │
//!       │                       RetryBackoff              │
//!       │                     (at next_retry_ms)          │
//!       │                       └──▶ Connecting           │
//!       └─────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use log::{debug, info, warn};

use crate::app::ports::{LinkDriver, LinkStatus};
use crate::config::ConnectivityConfig;
use crate::diagnostics::Diagnostics;
use crate::error::ConnectivityError;
use crate::telemetry::{ConnectivityStatus, TelemetryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { attempt: u32, deadline_ms: u64 },
    Connected,
    RetryBackoff { attempt: u32, next_retry_ms: u64 },
}

impl ConnectionState {
    pub fn status(self) -> ConnectivityStatus {
        match self {
            Self::Disconnected => ConnectivityStatus::Offline,
            Self::Connecting { .. } => ConnectivityStatus::Connecting,
            Self::Connected => ConnectivityStatus::Online,
            Self::RetryBackoff { .. } => ConnectivityStatus::Backoff,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

pub fn validate_ssid(ssid: &str) -> Result<(), ConnectivityError> {
    if ssid.is_empty() {
        return Err(ConnectivityError::NoCredentials);
    }
    if ssid.len() > 32 || !is_printable_ascii(ssid) {
        return Err(ConnectivityError::InvalidSsid);
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ConnectivityError> {
    // Empty = open network.
    if password.is_empty() {
        return Ok(());
    }
    if password.len() < 8 || password.len() > 64 {
        return Err(ConnectivityError::InvalidPassword);
    }
    Ok(())
}

/// Delay before backoff round `attempt` (1-based), capped.
pub fn backoff_ms(config: &ConnectivityConfig, attempt: u32) -> u32 {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    config.initial_backoff_ms.saturating_mul(factor).min(config.max_backoff_ms)
}

// ───────────────────────────────────────────────────────────────
// FSM
// ───────────────────────────────────────────────────────────────

pub struct ConnectivityFsm<L: LinkDriver> {
    link: L,
    config: ConnectivityConfig,
    store: TelemetryStore,
    diagnostics: Arc<Diagnostics>,
    state: ConnectionState,
    /// Consecutive failed attempts since the last success.
    failures: u32,
    /// Why we are not even trying, if so.
    blocked: Option<ConnectivityError>,
    published: Option<ConnectivityStatus>,
}

impl<L: LinkDriver> ConnectivityFsm<L> {
    pub fn new(link: L, config: ConnectivityConfig, store: TelemetryStore, diagnostics: Arc<Diagnostics>) -> Self {
        let blocked = match validate_ssid(&config.ssid).and_then(|()| validate_password(&config.password)) {
            Ok(()) => None,
            Err(ConnectivityError::NoCredentials) => {
                info!("Connect: no credentials configured, staying offline");
                Some(ConnectivityError::NoCredentials)
            }
            Err(e) => {
                warn!("Connect: {}, staying offline", e);
                Some(e)
            }
        };
        Self {
            link,
            config,
            store,
            diagnostics,
            state: ConnectionState::Disconnected,
            failures: 0,
            blocked,
            published: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// One Connect tick.
    pub fn run(&mut self, now_ms: u64) -> ConnectionState {
        self.state = match self.state {
            ConnectionState::Disconnected if self.blocked.is_some() => ConnectionState::Disconnected,
            ConnectionState::Disconnected => self.start_attempt(now_ms, self.failures + 1),
            ConnectionState::Connecting { attempt, deadline_ms } => match self.link.status() {
                LinkStatus::Up => {
                    info!("Connect: online after {} attempt(s)", attempt);
                    self.failures = 0;
                    ConnectionState::Connected
                }
                LinkStatus::Failed(e) => self.fail(now_ms, e),
                LinkStatus::Pending | LinkStatus::Down if now_ms >= deadline_ms => {
                    self.fail(now_ms, ConnectivityError::Timeout)
                }
                LinkStatus::Pending | LinkStatus::Down => self.state,
            },
            ConnectionState::Connected => match self.link.status() {
                LinkStatus::Up => ConnectionState::Connected,
                other => {
                    warn!("Connect: link lost ({:?})", other);
                    self.diagnostics.record(ConnectivityError::LinkLost.into());
                    ConnectionState::Disconnected
                }
            },
            ConnectionState::RetryBackoff { attempt, next_retry_ms } if now_ms >= next_retry_ms => {
                debug!("Connect: backoff round {} over, retrying", attempt);
                self.start_attempt(now_ms, self.failures + 1)
            }
            s @ ConnectionState::RetryBackoff { .. } => s,
        };
        self.publish();
        self.state
    }

    fn start_attempt(&mut self, now_ms: u64, attempt: u32) -> ConnectionState {
        match self.link.begin_connect(&self.config.ssid, &self.config.password) {
            Ok(()) => {
                debug!("Connect: attempt {} to '{}'", attempt, self.config.ssid);
                ConnectionState::Connecting {
                    attempt,
                    deadline_ms: now_ms + u64::from(self.config.connect_timeout_ms),
                }
            }
            Err(e) => self.fail(now_ms, e),
        }
    }

    fn fail(&mut self, now_ms: u64, err: ConnectivityError) -> ConnectionState {
        self.diagnostics.record(err.into());
        self.link.disconnect();
        self.failures = self.failures.saturating_add(1);

        if self.failures < self.config.failures_before_backoff {
            debug!("Connect: attempt {} failed ({})", self.failures, err);
            return ConnectionState::Disconnected;
        }
        let round = self.failures - self.config.failures_before_backoff + 1;
        let delay = backoff_ms(&self.config, round);
        warn!("Connect: {} consecutive failures ({}), backing off {} ms", self.failures, err, delay);
        ConnectionState::RetryBackoff {
            attempt: round,
            next_retry_ms: now_ms + u64::from(delay),
        }
    }

    fn publish(&mut self) {
        let status = self.state.status();
        if self.published != Some(status) {
            self.store.set_connectivity(status);
            self.published = Some(status);
        }
    }
}
