//! Driver configuration
//!
//! [`Config`] is a plain struct with serde defaults so embedding
//! applications can deserialize it straight out of their own config files:
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! tx_power = 5
//! led_mode = "off"
//!
//! [timeouts]
//! sreq_secs = 15
//! arsp_secs = 30
//! ```

use crate::error::{Error, Result};
use crate::types::LedMode;
use serde::Deserialize;
use std::time::Duration;

/// TX power limits accepted by the supported chips, in dBm. Individual
/// chips support a narrower range; the firmware clamps or rejects values
/// it cannot apply.
pub const TX_POWER_MIN: i8 = -22;
pub const TX_POWER_MAX: i8 = 19;

/// Serial flow control selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    Hardware,
    Software,
}

impl FlowControl {
    pub fn to_serialport(self) -> serialport::FlowControl {
        match self {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
            FlowControl::Software => serialport::FlowControl::Software,
        }
    }
}

/// Cap on concurrently outstanding data requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    /// 16 on chips with plenty of TX buffers (aligned-struct builds),
    /// 2 on the memory-starved CC2531.
    #[default]
    Auto,
    #[serde(untagged)]
    Fixed(usize),
}

/// Request timeouts, all configurable separately.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Timeouts {
    /// SRSP deadline for synchronous requests
    #[serde(default = "default_sreq_secs")]
    pub sreq_secs: u64,

    /// Indication deadline for request/callback pairs
    #[serde(default = "default_arsp_secs")]
    pub arsp_secs: u64,
}

fn default_sreq_secs() -> u64 {
    15
}

fn default_arsp_secs() -> u64 {
    30
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            sreq_secs: default_sreq_secs(),
            arsp_secs: default_arsp_secs(),
        }
    }
}

impl Timeouts {
    pub fn sreq(&self) -> Duration {
        Duration::from_secs(self.sreq_secs)
    }

    pub fn arsp(&self) -> Duration {
        Duration::from_secs(self.arsp_secs)
    }
}

/// Root configuration for [`crate::Driver`].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    ///
    /// **Required**: Yes
    pub port: String,

    /// Baud rate
    ///
    /// **Default**: 115200 (every known ZNP build)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Serial flow control
    ///
    /// **Default**: none
    #[serde(default)]
    pub flow_control: FlowControl,

    /// Radio TX power in dBm, applied during startup
    ///
    /// **Valid range**: -22 to 19 (chip dependent)
    /// **Default**: leave the firmware setting untouched
    #[serde(default)]
    pub tx_power: Option<i8>,

    /// Board LED behaviour, applied during startup
    ///
    /// **Default**: off (LEDs leak light and information)
    #[serde(default = "default_led_mode", deserialize_with = "de_led_mode")]
    pub led_mode: Option<LedMode>,

    /// Write bootloader skip bytes on connect
    ///
    /// **Default**: true. Disable only to intentionally enter the CC2531
    /// serial bootloader for flashing.
    #[serde(default = "default_true")]
    pub skip_bootloader: bool,

    /// RTS pin levels stepped through on connect, 100 ms apart
    #[serde(default = "default_rts_states")]
    pub connect_rts_states: Vec<bool>,

    /// DTR pin levels stepped through on connect, paired with the RTS steps
    #[serde(default = "default_dtr_states")]
    pub connect_dtr_states: Vec<bool>,

    /// Request timeouts
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Delay between reconnect attempts after a connection loss
    ///
    /// **Default**: 5 s
    #[serde(default = "default_reconnect_secs")]
    pub auto_reconnect_retry_delay_secs: u64,

    /// Watchdog ping interval; repeated failures mark the bus disconnected
    ///
    /// **Default**: 30 s
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_interval_secs: u64,

    /// Cap on concurrently outstanding data requests
    #[serde(default)]
    pub max_concurrent_requests: Concurrency,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_led_mode() -> Option<LedMode> {
    Some(LedMode::Off)
}

/// Accept `"off"`, `"on"`, `"blink"`, `"flash"`, `"toggle"` or null.
fn de_led_mode<'de, D>(deserializer: D) -> std::result::Result<Option<LedMode>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;

    match text.as_deref() {
        None => Ok(None),
        Some("off") => Ok(Some(LedMode::Off)),
        Some("on") => Ok(Some(LedMode::On)),
        Some("blink") => Ok(Some(LedMode::Blink)),
        Some("flash") => Ok(Some(LedMode::Flash)),
        Some("toggle") => Ok(Some(LedMode::Toggle)),
        Some(other) => Err(serde::de::Error::custom(format!(
            "unknown LED mode {:?}",
            other
        ))),
    }
}

fn default_true() -> bool {
    true
}

fn default_rts_states() -> Vec<bool> {
    vec![false, true, false]
}

fn default_dtr_states() -> Vec<bool> {
    vec![false, false, false]
}

fn default_reconnect_secs() -> u64 {
    5
}

fn default_watchdog_secs() -> u64 {
    30
}

impl Config {
    /// A configuration with every option at its default.
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: default_baud_rate(),
            flow_control: FlowControl::default(),
            tx_power: None,
            led_mode: default_led_mode(),
            skip_bootloader: true,
            connect_rts_states: default_rts_states(),
            connect_dtr_states: default_dtr_states(),
            timeouts: Timeouts::default(),
            auto_reconnect_retry_delay_secs: default_reconnect_secs(),
            watchdog_interval_secs: default_watchdog_secs(),
            max_concurrent_requests: Concurrency::Auto,
        }
    }

    /// Validate option ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if let Some(dbm) = self.tx_power {
            if !(TX_POWER_MIN..=TX_POWER_MAX).contains(&dbm) {
                return Err(Error::Config(format!(
                    "tx_power must be between {} and {} dBm (got {})",
                    TX_POWER_MIN, TX_POWER_MAX, dbm
                )));
            }
        }

        if self.connect_rts_states.len() != self.connect_dtr_states.len() {
            return Err(Error::Config(format!(
                "connect pin sequences must pair up ({} RTS states, {} DTR states)",
                self.connect_rts_states.len(),
                self.connect_dtr_states.len()
            )));
        }

        if let Concurrency::Fixed(0) = self.max_concurrent_requests {
            return Err(Error::Config(
                "max_concurrent_requests cannot be zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.auto_reconnect_retry_delay_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::new("/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 115_200);
        assert!(config.skip_bootloader);
        assert_eq!(config.timeouts.sreq(), Duration::from_secs(15));
        assert_eq!(config.timeouts.arsp(), Duration::from_secs(30));
        assert_eq!(config.connect_rts_states, vec![false, true, false]);
        assert_eq!(config.connect_dtr_states, vec![false, false, false]);
        config.validate().unwrap();
    }

    #[test]
    fn test_tx_power_range() {
        let mut config = Config::new("/dev/ttyUSB0");
        config.tx_power = Some(20);
        assert!(config.validate().is_err());
        config.tx_power = Some(19);
        config.validate().unwrap();
    }

    #[test]
    fn test_deserialize_minimal() {
        let config: Config = serde_json::from_str(r#"{"port": "/dev/ttyACM0"}"#).unwrap();
        assert_eq!(config.port, "/dev/ttyACM0");
        assert_eq!(config.max_concurrent_requests, Concurrency::Auto);
    }

    #[test]
    fn test_deserialize_fixed_concurrency() {
        let config: Config =
            serde_json::from_str(r#"{"port": "COM3", "max_concurrent_requests": 4}"#).unwrap();
        assert_eq!(config.max_concurrent_requests, Concurrency::Fixed(4));
    }

    #[test]
    fn test_deserialize_led_mode() {
        let config: Config =
            serde_json::from_str(r#"{"port": "COM3", "led_mode": "blink"}"#).unwrap();
        assert_eq!(config.led_mode, Some(LedMode::Blink));

        let config: Config =
            serde_json::from_str(r#"{"port": "COM3", "led_mode": null}"#).unwrap();
        assert_eq!(config.led_mode, None);

        assert!(
            serde_json::from_str::<Config>(r#"{"port": "COM3", "led_mode": "rainbow"}"#).is_err()
        );
    }
}
