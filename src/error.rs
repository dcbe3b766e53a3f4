//! Unified error types for the charger firmware.
//!
//! A single `Error` enum that every subsystem can convert into, with one
//! sub-enum per fault category.  All variants are `Copy` so they can be
//! passed through the measurement pipeline, the dispatcher and the job
//! runners without allocation.
//!
//! | Category      | Recovery                                         |
//! |---------------|--------------------------------------------------|
//! | `Sensor`      | sample clamped or discarded for that cycle       |
//! | `Safety`      | dispatcher enters the terminal `Fault` mode      |
//! | `Connectivity`| retry / backoff inside the connectivity FSM      |
//! | `Scheduling`  | counted and logged, never touches the integral   |
//! | `Bootstrap`   | skipped, normal boot continues                   |
//! | `Actuator`    | command retried, then dropped                    |

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A raw reading was implausible or out of range.
    Sensor(SensorFault),
    /// A safety limit was violated.
    Safety(SafetyFault),
    /// Network association failed or the link dropped.
    Connectivity(ConnectivityError),
    /// A periodic job overran its period.
    Scheduling(SchedulingOverrun),
    /// The one-shot firmware update step could not run.
    Bootstrap(BootstrapError),
    /// The output stage rejected a command.
    Actuator(ActuatorError),
    /// Peripheral initialisation failed.
    Init(&'static str),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor(e) => write!(f, "sensor: {e}"),
            Self::Safety(e) => write!(f, "safety: {e}"),
            Self::Connectivity(e) => write!(f, "connectivity: {e}"),
            Self::Scheduling(e) => write!(f, "scheduling: {e}"),
            Self::Bootstrap(e) => write!(f, "bootstrap: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Sensor faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorFault {
    /// Raw count above the converter's full scale; sample discarded.
    OutOfRange { channel: Channel, raw: u16 },
    /// Converted value outside the plausible physical range; clamped.
    Clamped(Channel),
    /// Gap between two successful cycles exceeded the integration limit.
    IntegrationGap { gap_ms: u32 },
}

/// Analog input channel identifier, used in fault reports and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Voltage,
    Current,
    Temperature,
    Keys,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voltage => write!(f, "voltage"),
            Self::Current => write!(f, "current"),
            Self::Temperature => write!(f, "temperature"),
            Self::Keys => write!(f, "keys"),
        }
    }
}

impl fmt::Display for SensorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { channel, raw } => {
                write!(f, "{channel} raw {raw} above full scale")
            }
            Self::Clamped(channel) => write!(f, "{channel} clamped to plausible range"),
            Self::IntegrationGap { gap_ms } => write!(f, "integration gap of {gap_ms} ms"),
        }
    }
}

impl From<SensorFault> for Error {
    fn from(e: SensorFault) -> Self {
        Self::Sensor(e)
    }
}

// ---------------------------------------------------------------------------
// Safety faults
// ---------------------------------------------------------------------------

/// Safety faults are accumulated in a bitfield by the safety supervisor so
/// that multiple simultaneous faults can be reported together.  Any latched
/// bit sends the dispatcher into `Fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SafetyFault {
    /// Heatsink / battery temperature above the hard limit.
    OverTemperature = 0b0000_0001,
    /// Output current magnitude above the hard limit.
    OverCurrent = 0b0000_0010,
    /// Output voltage above the hard limit.
    OverVoltage = 0b0000_0100,
}

impl SafetyFault {
    pub const ALL: [Self; 3] = [Self::OverTemperature, Self::OverCurrent, Self::OverVoltage];

    /// Return the bitmask for this fault.
    pub const fn mask(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OverTemperature => write!(f, "over temperature"),
            Self::OverCurrent => write!(f, "over current"),
            Self::OverVoltage => write!(f, "over voltage"),
        }
    }
}

impl From<SafetyFault> for Error {
    fn from(e: SafetyFault) -> Self {
        Self::Safety(e)
    }
}

// ---------------------------------------------------------------------------
// Connectivity errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityError {
    NoCredentials,
    InvalidSsid,
    InvalidPassword,
    AuthFailed,
    Timeout,
    LinkLost,
}

impl fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoCredentials => write!(f, "no WiFi credentials configured"),
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
            Self::AuthFailed => write!(f, "association rejected"),
            Self::Timeout => write!(f, "association timed out"),
            Self::LinkLost => write!(f, "link lost"),
        }
    }
}

impl From<ConnectivityError> for Error {
    fn from(e: ConnectivityError) -> Self {
        Self::Connectivity(e)
    }
}

// ---------------------------------------------------------------------------
// Scheduling overruns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingOverrun {
    pub job: &'static str,
    /// Grid slots skipped to get back onto the schedule.
    pub skipped_slots: u32,
}

impl fmt::Display for SchedulingOverrun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job '{}' overran, skipped {} slot(s)", self.job, self.skipped_slots)
    }
}

impl From<SchedulingOverrun> for Error {
    fn from(e: SchedulingOverrun) -> Self {
        Self::Scheduling(e)
    }
}

// ---------------------------------------------------------------------------
// Bootstrap errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapError {
    /// No removable storage present.
    NoMedia,
    /// Update image missing or corrupt.
    ImageInvalid,
    /// Flash write failed part way.
    WriteFailed,
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMedia => write!(f, "no update media present"),
            Self::ImageInvalid => write!(f, "update image missing or corrupt"),
            Self::WriteFailed => write!(f, "update write failed"),
        }
    }
}

impl From<BootstrapError> for Error {
    fn from(e: BootstrapError) -> Self {
        Self::Bootstrap(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// The output stage refused the command (busy, interlocked).
    Rejected,
    /// PWM duty-cycle write failed.
    PwmWriteFailed,
    /// Requested value outside the stage's hardware limits.
    OutOfLimits,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "command rejected"),
            Self::PwmWriteFailed => write!(f, "PWM write failed"),
            Self::OutOfLimits => write!(f, "value outside hardware limits"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
