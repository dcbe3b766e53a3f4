//! GPIO / peripheral pin assignments for the charger main board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin or channel numbers.

// ---------------------------------------------------------------------------
// Analog front end (ADC1, 12-bit)
// ---------------------------------------------------------------------------

/// Voltage divider, high-gain tap (low range). GPIO 36.
pub const ADC1_CH_VOLTAGE_LO: u32 = 0;
/// Voltage divider, low-gain tap (high range). GPIO 39.
pub const ADC1_CH_VOLTAGE_HI: u32 = 3;
/// Resistor-ladder keypad. GPIO 32.
pub const ADC1_CH_KEYS: u32 = 4;
/// Shunt amplifier, mid-scale = 0 A. GPIO 34.
pub const ADC1_CH_CURRENT: u32 = 6;
/// Heat-sink NTC divider. GPIO 35.
pub const ADC1_CH_TEMPERATURE: u32 = 7;

pub const ADC1_CHANNELS: [u32; 5] = [
    ADC1_CH_VOLTAGE_LO,
    ADC1_CH_VOLTAGE_HI,
    ADC1_CH_KEYS,
    ADC1_CH_CURRENT,
    ADC1_CH_TEMPERATURE,
];

// ---------------------------------------------------------------------------
// Power output stage
// ---------------------------------------------------------------------------

/// PWM into the RC filter that sets the regulator voltage reference.
pub const VOLTAGE_REF_PWM_GPIO: i32 = 25;
/// PWM into the RC filter that sets the current limit reference.
pub const CURRENT_REF_PWM_GPIO: i32 = 26;
/// Digital output: HIGH connects the output stage.
pub const OUTPUT_ENABLE_GPIO: i32 = 27;
/// Digital output: HIGH switches the stage to sink (discharge load).
pub const OUTPUT_SINK_GPIO: i32 = 14;

/// Reference full scale: 100 % PWM on the voltage reference.
pub const VOLTAGE_REF_FULL_SCALE_V: f32 = 30.0;
/// Reference full scale: 100 % PWM on the current reference.
pub const CURRENT_REF_FULL_SCALE_A: f32 = 10.0;

// ---------------------------------------------------------------------------
// Cooling
// ---------------------------------------------------------------------------

pub const FAN_PWM_GPIO: i32 = 13;

// ---------------------------------------------------------------------------
// Update media
// ---------------------------------------------------------------------------

/// SD card-detect switch, LOW = card present.
pub const SD_DETECT_GPIO: i32 = 4;
/// SD card on SPI2 (mounted at `/sdcard` during boot).
pub const SD_SPI_SCLK_GPIO: i32 = 18;
pub const SD_SPI_MOSI_GPIO: i32 = 23;
pub const SD_SPI_MISO_GPIO: i32 = 19;
pub const SD_SPI_CS_GPIO: i32 = 5;

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// Reference PWM: 20 kHz, 10-bit.
pub const REF_PWM_FREQ_HZ: u32 = 20_000;
pub const REF_PWM_MAX_DUTY: u32 = (1 << 10) - 1;
/// Fan PWM: 25 kHz (inaudible), 8-bit.
pub const FAN_PWM_FREQ_HZ: u32 = 25_000;
pub const FAN_PWM_MAX_DUTY: u32 = (1 << 8) - 1;
