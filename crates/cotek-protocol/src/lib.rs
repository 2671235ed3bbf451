use thiserror::Error;
use tracing::trace;

use types::{SensorName, SwitchState, Target};

/// Terminator appended to every command line.
pub const LINE_TERMINATOR: &str = "\r\n";
/// Marks the end of every device response.
pub const RESPONSE_DELIMITER: &[u8] = b"=>";

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("response does not end with the => delimiter")]
    MissingDelimiter,
    #[error("response is not valid utf-8")]
    InvalidUtf8,
    #[error("response value {0:?} is not a number")]
    NotANumber(String),
}

/// Writes that change the device's on/off state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommand {
    InverterOn,
    InverterOff,
    ChargerOn,
    ChargerOff,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 4] = [
        ControlCommand::InverterOn,
        ControlCommand::InverterOff,
        ControlCommand::ChargerOn,
        ControlCommand::ChargerOff,
    ];

    /// The command that drives `target` into `state`.
    pub fn for_state(target: Target, state: SwitchState) -> Self {
        match (target, state) {
            (Target::Inverter, SwitchState::On) => ControlCommand::InverterOn,
            (Target::Inverter, SwitchState::Off) => ControlCommand::InverterOff,
            (Target::Charger, SwitchState::On) => ControlCommand::ChargerOn,
            (Target::Charger, SwitchState::Off) => ControlCommand::ChargerOff,
        }
    }

    pub fn target(&self) -> Target {
        match self {
            ControlCommand::InverterOn | ControlCommand::InverterOff => Target::Inverter,
            ControlCommand::ChargerOn | ControlCommand::ChargerOff => Target::Charger,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::InverterOn => "inverter_on",
            ControlCommand::InverterOff => "inverter_off",
            ControlCommand::ChargerOn => "charger_on",
            ControlCommand::ChargerOff => "charger_off",
        }
    }

    pub fn wire(&self) -> &'static str {
        match self {
            ControlCommand::InverterOn => "POWER 1",
            ControlCommand::InverterOff => "POWER 0",
            // CHAOFF is "charger off", so 0 enables charging.
            ControlCommand::ChargerOn => "CHAOFF 0",
            ControlCommand::ChargerOff => "CHAOFF 1",
        }
    }
}

/// Query text for a sensor.
///
/// Both MOSFET channels are read with `TMOS1?`; the device table has no
/// separate query for the second channel.
pub fn query_wire(name: SensorName) -> &'static str {
    match name {
        SensorName::Frequency => "FRQ?",
        SensorName::Power => "PINV?",
        SensorName::Voltage => "VINV?",
        SensorName::Current => "IINV?",
        SensorName::GridVoltage => "VGRID?",
        SensorName::GridCurrent => "IGRID?",
        SensorName::GridPower => "PGRID?",
        SensorName::BatteryVoltage => "VBAT?",
        SensorName::BatteryCurrent => "IBAT?",
        SensorName::BatteryTemp => "TBAT?",
        SensorName::Mosfet1Temp => "TMOS1?",
        SensorName::Mosfet2Temp => "TMOS1?",
        SensorName::TransformerTemp => "TTR?",
        SensorName::PowerStatus => "POWER ?",
        SensorName::ChargerStatus => "CHAOFF ?",
    }
}

/// Looks up wire text by logical name: a sensor display name such as
/// `Inverter_Power`, or a control name such as `inverter_on`.
pub fn encode(command_name: &str) -> Result<&'static str, ProtocolError> {
    if let Ok(sensor) = command_name.parse::<SensorName>() {
        return Ok(query_wire(sensor));
    }

    ControlCommand::ALL
        .iter()
        .find(|command| command.name() == command_name)
        .map(|command| command.wire())
        .ok_or_else(|| ProtocolError::UnknownCommand(command_name.to_string()))
}

/// Wire text plus line terminator, ready to write.
pub fn frame(wire: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(wire.len() + LINE_TERMINATOR.len());
    bytes.extend_from_slice(wire.as_bytes());
    bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());
    bytes
}

/// Decodes a raw response such as `1234.5=>` into its numeric reading.
pub fn decode(raw: &[u8]) -> Result<f64, ProtocolError> {
    let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
    let body = text
        .trim()
        .strip_suffix("=>")
        .ok_or(ProtocolError::MissingDelimiter)?
        .trim();

    let value = body
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| ProtocolError::NotANumber(body.to_string()))?;

    trace!(response = %text.trim(), value, "decoded response");
    Ok(value)
}
