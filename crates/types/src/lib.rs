use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of logical sensors polled each cycle.
pub const SENSOR_COUNT: usize = 15;

/// Logical sensors exposed by the inverter, in poll order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorName {
    #[serde(rename = "Inverter_Frequency")]
    Frequency,
    #[serde(rename = "Inverter_Power")]
    Power,
    #[serde(rename = "Inverter_Voltage")]
    Voltage,
    #[serde(rename = "Inverter_Current")]
    Current,
    #[serde(rename = "Inverter_Grid_Voltage")]
    GridVoltage,
    #[serde(rename = "Inverter_Grid_Current")]
    GridCurrent,
    #[serde(rename = "Inverter_Grid_Power")]
    GridPower,
    #[serde(rename = "Inverter_Battery_Voltage")]
    BatteryVoltage,
    #[serde(rename = "Inverter_Battery_Current")]
    BatteryCurrent,
    #[serde(rename = "Inverter_Battery_Temp")]
    BatteryTemp,
    #[serde(rename = "Inverter_MOSFET1_Temp")]
    Mosfet1Temp,
    #[serde(rename = "Inverter_MOSFET2_Temp")]
    Mosfet2Temp,
    #[serde(rename = "Inverter_Transformer_Temp")]
    TransformerTemp,
    #[serde(rename = "Inverter_Power_Status")]
    PowerStatus,
    #[serde(rename = "Inverter_Charger_Status")]
    ChargerStatus,
}

impl SensorName {
    pub const ALL: [SensorName; SENSOR_COUNT] = [
        SensorName::Frequency,
        SensorName::Power,
        SensorName::Voltage,
        SensorName::Current,
        SensorName::GridVoltage,
        SensorName::GridCurrent,
        SensorName::GridPower,
        SensorName::BatteryVoltage,
        SensorName::BatteryCurrent,
        SensorName::BatteryTemp,
        SensorName::Mosfet1Temp,
        SensorName::Mosfet2Temp,
        SensorName::TransformerTemp,
        SensorName::PowerStatus,
        SensorName::ChargerStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorName::Frequency => "Inverter_Frequency",
            SensorName::Power => "Inverter_Power",
            SensorName::Voltage => "Inverter_Voltage",
            SensorName::Current => "Inverter_Current",
            SensorName::GridVoltage => "Inverter_Grid_Voltage",
            SensorName::GridCurrent => "Inverter_Grid_Current",
            SensorName::GridPower => "Inverter_Grid_Power",
            SensorName::BatteryVoltage => "Inverter_Battery_Voltage",
            SensorName::BatteryCurrent => "Inverter_Battery_Current",
            SensorName::BatteryTemp => "Inverter_Battery_Temp",
            SensorName::Mosfet1Temp => "Inverter_MOSFET1_Temp",
            SensorName::Mosfet2Temp => "Inverter_MOSFET2_Temp",
            SensorName::TransformerTemp => "Inverter_Transformer_Temp",
            SensorName::PowerStatus => "Inverter_Power_Status",
            SensorName::ChargerStatus => "Inverter_Charger_Status",
        }
    }

    /// Host entity id, e.g. `sensor.inverter_power`.
    pub fn entity_id(&self) -> String {
        format!("sensor.{}", self.as_str().to_lowercase())
    }

    /// Position in poll order.
    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|name| name == self)
            .unwrap_or(SENSOR_COUNT)
    }

    /// The target whose on/off state is derived from this sensor, if any.
    pub fn status_target(&self) -> Option<Target> {
        match self {
            SensorName::PowerStatus => Some(Target::Inverter),
            SensorName::ChargerStatus => Some(Target::Charger),
            _ => None,
        }
    }
}

impl fmt::Display for SensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown sensor name {0}")]
pub struct UnknownSensor(pub String);

impl FromStr for SensorName {
    type Err = UnknownSensor;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == value)
            .ok_or_else(|| UnknownSensor(value.to_string()))
    }
}

/// A switchable part of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Inverter,
    Charger,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::Inverter, Target::Charger];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Inverter => "inverter",
            Target::Charger => "charger",
        }
    }

    /// Applies the device threshold rule to a raw status reading.
    ///
    /// The charger reports `CHAOFF`, so its polarity is inverted: 0 means charging.
    pub fn state_from_raw(&self, raw: f64) -> SwitchState {
        let on = match self {
            Target::Inverter => raw == 1.0,
            Target::Charger => raw == 0.0,
        };
        if on {
            SwitchState::On
        } else {
            SwitchState::Off
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown target {0}")]
pub struct UnknownTarget(pub String);

impl FromStr for Target {
    type Err = UnknownTarget;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "inverter" => Ok(Target::Inverter),
            "charger" => Ok(Target::Charger),
            other => Err(UnknownTarget(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    On,
    #[default]
    Off,
}

impl SwitchState {
    pub fn toggled(self) -> Self {
        match self {
            SwitchState::On => SwitchState::Off,
            SwitchState::Off => SwitchState::On,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validity {
    Valid,
    Unavailable,
}

/// Last-known value of one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub name: SensorName,
    pub value: f64,
    pub validity: Validity,
}

impl SensorReading {
    pub fn unavailable(name: SensorName) -> Self {
        Self {
            name,
            value: 0.0,
            validity: Validity::Unavailable,
        }
    }

    /// The value as seen by the host: `None` while unavailable.
    pub fn current(&self) -> Option<f64> {
        match self.validity {
            Validity::Valid => Some(self.value),
            Validity::Unavailable => None,
        }
    }
}

/// Whether the serial line is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Available,
    Unavailable,
}
