use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

pub const ESC_SENSOR_TASK_FREQ_HZ: u16 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EscProtocol {
    /// Request/response, 10-byte CRC8 frames.
    #[default]
    Kiss,
    /// Hobbywing V4 free-running stream.
    Hw4,
}

impl std::str::FromStr for EscProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kiss" => Ok(Self::Kiss),
            "hw4" => Ok(Self::Hw4),
            other => Err(format!("unknown esc sensor protocol '{other}'")),
        }
    }
}

/// Static telemetry configuration. Gains and offset are tenths-scaled
/// integers as they are stored in the flight controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EscSensorConfig {
    pub protocol: EscProtocol,
    pub half_duplex: bool,
    pub update_hz: u16,
    pub hw4_current_offset: u16,
    pub hw4_current_gain: u16,
    pub hw4_voltage_gain: u16,
}

impl Default for EscSensorConfig {
    fn default() -> Self {
        Self {
            protocol: EscProtocol::Kiss,
            half_duplex: false,
            update_hz: ESC_SENSOR_TASK_FREQ_HZ,
            hw4_current_offset: 15,
            hw4_current_gain: 100,
            hw4_voltage_gain: 110,
        }
    }
}

impl EscSensorConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hw4_current_gain == 0 {
            return Err(ConfigError::ZeroCurrentGain);
        }
        if self.update_hz == 0 {
            return Err(ConfigError::ZeroUpdateRate);
        }
        Ok(())
    }
}
