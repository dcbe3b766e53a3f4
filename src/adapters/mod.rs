//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter     | Implements      | Connects to                     |
//! |-------------|-----------------|---------------------------------|
//! | `hardware`  | BoardPort       | ESP32 ADC1 (sim: injected counts)|
//! |             | ActuatorPort    | Output stage PWM/GPIO, fan PWM  |
//! | `log_sink`  | DisplayPort     | Serial log output               |
//! | `sd_update` | BootstrapPort   | SD card + OTA partition         |
//! | `time`      | Clock           | ESP32 high-resolution timer     |
//! | `wifi`      | LinkDriver      | ESP-IDF WiFi STA                |

pub mod hardware;
pub mod log_sink;
pub mod sd_update;
pub mod time;
pub mod wifi;
